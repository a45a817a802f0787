//! Recognition and decoding of avatar metadata push notifications.

use std::sync::Arc;

use avatar_core::event::{
    publish_on, AvatarRecord, EntityAddress, EventBus, EventPayload, EventSource, MetadataPush,
    AVATAR_PUSH_METADATA,
};
use jid::Jid;
use minidom::Element;
use tracing::{debug, warn};

use crate::ns;
use crate::pipeline::{ProcessorResult, StanzaProcessor};

/// The `<item/>` of a metadata `<items/>` wrapper. Accepts both the
/// avatar-metadata namespaced wrapper and the XEP-0060 `node=` form.
fn metadata_item(items: &Element) -> Option<&Element> {
    if items.is("items", ns::AVATAR_METADATA) {
        items.get_child("item", ns::AVATAR_METADATA)
    } else if items.is("items", ns::PUBSUB_EVENT)
        && items.attr("node") == Some(ns::NODE_AVATAR_METADATA)
    {
        items.get_child("item", ns::PUBSUB_EVENT)
    } else {
        None
    }
}

/// The `<metadata/>` payload of the first metadata item, if the stanza is
/// an avatar metadata notification.
fn metadata_payload(stanza: &Element) -> Option<&Element> {
    if stanza.name() != "message" {
        return None;
    }
    stanza
        .get_child("event", ns::PUBSUB_EVENT)?
        .children()
        .find_map(metadata_item)?
        .get_child("metadata", ns::AVATAR_METADATA)
}

/// True for a `<message/>` carrying an avatar metadata notification.
pub fn is_metadata_push(stanza: &Element) -> bool {
    metadata_payload(stanza).is_some()
}

fn avatar_record(info: &Element) -> AvatarRecord {
    let attr = |name: &str| info.attr(name).map(String::from);
    AvatarRecord {
        id: attr("id"),
        width: attr("width"),
        height: attr("height"),
        mime_type: attr("type"),
        bytes: attr("bytes"),
        url: attr("url"),
    }
}

/// Decode a metadata notification. Returns `None` for anything that is not
/// one, or whose sender address cannot be parsed.
pub fn decode_metadata_push(stanza: &Element) -> Option<MetadataPush> {
    let metadata = metadata_payload(stanza)?;
    let from = Jid::new(stanza.attr("from")?).ok()?;
    let from = EntityAddress::from(&from);

    if metadata.children().next().is_none() {
        return Some(MetadataPush::disabled(from));
    }

    let avatars: Vec<AvatarRecord> = metadata
        .children()
        .filter(|child| child.is("info", ns::AVATAR_METADATA))
        .map(avatar_record)
        .collect();
    Some(MetadataPush::with_avatars(from, avatars))
}

/// Publishes decoded metadata pushes on the event bus.
pub struct MetadataPushProcessor {
    event_bus: Arc<dyn EventBus>,
    flatten_single: bool,
}

impl MetadataPushProcessor {
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            event_bus,
            flatten_single: false,
        }
    }

    /// Also expose a lone avatar through the legacy inline fields.
    pub fn flatten_single(mut self, enabled: bool) -> Self {
        self.flatten_single = enabled;
        self
    }
}

impl StanzaProcessor for MetadataPushProcessor {
    fn name(&self) -> &str {
        "avatar-metadata-push"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn process_inbound(&self, stanza: &Element) -> ProcessorResult {
        let Some(mut push) = decode_metadata_push(stanza) else {
            return ProcessorResult::Continue;
        };
        if self.flatten_single {
            push = push.flatten_single();
        }

        debug!(
            domain = %push.from.domain,
            disabled = push.is_disabled(),
            avatars = push.avatars.len(),
            "avatar metadata push received"
        );

        if let Err(error) = publish_on(
            self.event_bus.as_ref(),
            AVATAR_PUSH_METADATA,
            EventSource::Xmpp,
            EventPayload::AvatarMetadataPushed { push },
        ) {
            warn!(%error, "failed to publish avatar metadata push");
        }
        ProcessorResult::Handled
    }
}
