//! Namespace URIs and node names used by XEP-0084 over PubSub.

/// XMPP client namespace
pub const JABBER_CLIENT: &str = "jabber:client";

/// Stanza error namespace (RFC 6120 Section 8.3)
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Main PubSub namespace (XEP-0060).
pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";

/// PubSub event namespace for notifications.
pub const PUBSUB_EVENT: &str = "http://jabber.org/protocol/pubsub#event";

/// Namespace for avatar data (raw image payload).
pub const AVATAR_DATA: &str = "urn:xmpp:avatar:data";

/// Namespace for avatar metadata.
pub const AVATAR_METADATA: &str = "urn:xmpp:avatar:metadata";

/// PEP node for avatar data.
pub const NODE_AVATAR_DATA: &str = AVATAR_DATA;

/// PEP node for avatar metadata.
pub const NODE_AVATAR_METADATA: &str = AVATAR_METADATA;
