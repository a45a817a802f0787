use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, crate::error::EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(crate::error::EventBusError::InvalidChannel(name))
        }
    }

    /// Check if a channel name is valid.
    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        // Must be lowercase and only contain a-z, 0-9, and dots
        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        matches!(
            name.split('.').next(),
            Some("system" | "xmpp" | "socket")
        )
    }

    /// Get the domain of the channel.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// Get the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// Channel carrying decoded XEP-0084 metadata notifications.
pub const AVATAR_PUSH_METADATA: &str = "xmpp.avatar.push.metadata";

/// Channel for client errors that have no continuation to travel through.
pub const CLIENT_ERROR: &str = "xmpp.error.client";

/// The standard event envelope wrapping all events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "xmpp.avatar.push.metadata")
    pub channel: Channel,

    /// When the event was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Unique identifier for this event
    pub id: Uuid,

    /// Optional correlation ID linking related events
    pub correlation_id: Option<Uuid>,

    /// Source component that emitted this event
    pub source: EventSource,

    /// The typed event payload
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a given channel and payload.
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            correlation_id: None,
            source,
            payload,
        }
    }

    /// Create a new event with a correlation ID.
    pub fn with_correlation(
        channel: Channel,
        source: EventSource,
        payload: EventPayload,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::new(channel, source, payload)
        }
    }
}

/// Identifies the source of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// Core system component
    System(String),
    /// XMPP subsystem
    Xmpp,
    /// Caller-facing event socket
    Socket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── System events ──────────────────────────────────────────────
    GatewayStarted {
        jid: String,
    },
    GatewayStopped {
        reason: String,
    },

    // ── XMPP avatar events ────────────────────────────────────────
    AvatarMetadataPushed {
        push: MetadataPush,
    },
    ClientErrorReported {
        error: ClientError,
    },
}

/// A client-side validation failure, reported before any stanza is sent.
///
/// Serializes to `{type, condition, description, request}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub condition: String,
    pub description: String,
    pub request: serde_json::Value,
}

impl ClientError {
    pub const TYPE: &'static str = "modify";
    pub const CONDITION: &'static str = "client-error";

    pub fn new(description: impl Into<String>, request: serde_json::Value) -> Self {
        Self {
            error_type: Self::TYPE.to_string(),
            condition: Self::CONDITION.to_string(),
            description: description.into(),
            request,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}

/// Structured entity address split out of a JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl From<&jid::Jid> for EntityAddress {
    fn from(jid: &jid::Jid) -> Self {
        Self {
            user: jid.node().map(|n| n.to_string()),
            domain: jid.domain().as_str().to_string(),
            resource: jid.resource().map(|r| r.to_string()),
        }
    }
}

/// One `<info/>` record from an avatar metadata element.
///
/// Attribute values are kept verbatim; only attributes present on the
/// element are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A decoded metadata notification from a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataPush {
    pub from: EntityAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avatars: Vec<AvatarRecord>,
    /// Legacy single-avatar view, populated only by [`MetadataPush::flatten_single`].
    #[serde(flatten)]
    pub inline: Option<AvatarRecord>,
}

impl MetadataPush {
    pub fn disabled(from: EntityAddress) -> Self {
        Self {
            from,
            disabled: Some(true),
            avatars: Vec::new(),
            inline: None,
        }
    }

    pub fn with_avatars(from: EntityAddress, avatars: Vec<AvatarRecord>) -> Self {
        Self {
            from,
            disabled: None,
            avatars,
            inline: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled == Some(true)
    }

    /// Copy the only avatar inline when exactly one is present.
    pub fn flatten_single(mut self) -> Self {
        if let [only] = self.avatars.as_slice() {
            self.inline = Some(only.clone());
        }
        self
    }
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError>;

    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError>;
}

#[derive(Clone)]
pub struct BroadcastEventBus {
    system_sender: broadcast::Sender<Event>,
    xmpp_sender: broadcast::Sender<Event>,
    socket_sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (system_sender, _) = broadcast::channel(capacity);
        let (xmpp_sender, _) = broadcast::channel(capacity);
        let (socket_sender, _) = broadcast::channel(capacity);

        Self {
            system_sender,
            xmpp_sender,
            socket_sender,
        }
    }

    fn sender_for_domain(&self, domain: &str) -> Option<&broadcast::Sender<Event>> {
        match domain {
            "system" => Some(&self.system_sender),
            "xmpp" => Some(&self.xmpp_sender),
            "socket" => Some(&self.socket_sender),
            _ => None,
        }
    }

    fn receivers_for_pattern(
        &self,
        pattern: &str,
    ) -> std::result::Result<DomainReceivers, crate::error::EventBusError> {
        let first_segment = pattern.split('.').next().unwrap_or_default();
        if first_segment.is_empty() {
            return Err(crate::error::EventBusError::InvalidPattern(
                pattern.to_string(),
            ));
        }

        if has_glob_meta(first_segment) {
            return Ok(DomainReceivers {
                system: Some(self.system_sender.subscribe()),
                xmpp: Some(self.xmpp_sender.subscribe()),
                socket: Some(self.socket_sender.subscribe()),
            });
        }

        let sender = self.sender_for_domain(first_segment).ok_or_else(|| {
            crate::error::EventBusError::InvalidPattern(pattern.to_string())
        })?;

        let mut receivers = DomainReceivers::default();
        match first_segment {
            "system" => receivers.system = Some(sender.subscribe()),
            "xmpp" => receivers.xmpp = Some(sender.subscribe()),
            _ => receivers.socket = Some(sender.subscribe()),
        }
        Ok(receivers)
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError> {
        let sender = self
            .sender_for_domain(event.channel.domain())
            .ok_or_else(|| {
                crate::error::EventBusError::InvalidChannel(event.channel.to_string())
            })?;

        // No subscribers is not an error.
        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| crate::error::EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        let receivers = self.receivers_for_pattern(pattern)?;

        Ok(EventSubscription { matcher, receivers })
    }
}

#[derive(Default)]
struct DomainReceivers {
    system: Option<broadcast::Receiver<Event>>,
    xmpp: Option<broadcast::Receiver<Event>>,
    socket: Option<broadcast::Receiver<Event>>,
}

pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: DomainReceivers,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> std::result::Result<Event, crate::error::EventBusError> {
        loop {
            let system_receiver = self.receivers.system.as_mut();
            let xmpp_receiver = self.receivers.xmpp.as_mut();
            let socket_receiver = self.receivers.socket.as_mut();

            let received = tokio::select! {
                result = recv_from_domain(system_receiver) => result,
                result = recv_from_domain(xmpp_receiver) => result,
                result = recv_from_domain(socket_receiver) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(crate::error::EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(crate::error::EventBusError::Lagged(count));
                }
            }
        }
    }
}

async fn recv_from_domain(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> std::result::Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn has_glob_meta(segment: &str) -> bool {
    segment.contains('*')
        || segment.contains('?')
        || segment.contains('[')
        || segment.contains(']')
        || segment.contains('{')
        || segment.contains('}')
        || segment.contains('!')
}

/// Publish a payload on a named channel.
pub fn publish_on(
    bus: &dyn EventBus,
    channel: &str,
    source: EventSource,
    payload: EventPayload,
) -> std::result::Result<(), crate::error::EventBusError> {
    bus.publish(Event::new(Channel::new(channel)?, source, payload))
}


#[cfg(test)]
mod event_bus_tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn push_event() -> Event {
        Event::new(
            Channel::new(AVATAR_PUSH_METADATA).unwrap(),
            EventSource::Xmpp,
            EventPayload::AvatarMetadataPushed {
                push: MetadataPush::disabled(EntityAddress {
                    user: None,
                    domain: "example.com".into(),
                    resource: None,
                }),
            },
        )
    }

    #[tokio::test]
    async fn publish_to_xmpp_routes_to_xmpp_subscriber() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.**").unwrap();

        bus.publish(push_event()).unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), AVATAR_PUSH_METADATA);
    }

    #[tokio::test]
    async fn xmpp_event_not_received_by_system_subscriber() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("system.**").unwrap();

        bus.publish(push_event()).unwrap();

        let result = timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "system subscriber should not receive xmpp events");
    }

    #[tokio::test]
    async fn glob_filters_within_a_domain() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.error.*").unwrap();

        bus.publish(push_event()).unwrap();
        publish_on(
            &bus,
            CLIENT_ERROR,
            EventSource::Xmpp,
            EventPayload::ClientErrorReported {
                error: ClientError::new("Missing callback", serde_json::json!({})),
            },
        )
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), CLIENT_ERROR);
    }

    #[tokio::test]
    async fn wildcard_domain_receives_everything() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("**").unwrap();

        publish_on(
            &bus,
            "system.gateway.started",
            EventSource::System("test".into()),
            EventPayload::GatewayStarted {
                jid: "juliet@example.com".into(),
            },
        )
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(event.channel.as_str(), "system.gateway.started");
    }

    #[tokio::test]
    async fn publish_succeeds_with_no_subscribers() {
        let bus = BroadcastEventBus::default();
        assert!(bus.publish(push_event()).is_ok());
    }

    #[test]
    fn subscribe_rejects_unknown_domain() {
        let bus = BroadcastEventBus::default();
        assert!(matches!(
            bus.subscribe("ui.**"),
            Err(crate::error::EventBusError::InvalidPattern(_))
        ));
    }
}
