//! Outbound IQ construction for avatar operations.
//!
//! Builders are pure; the caller supplies the stanza id.

use jid::{BareJid, Jid};
use minidom::{Element, Node};

use crate::ns;
use crate::request::{AvatarInfo, DataRequest, MetadataRequest, UploadRequest};

fn iq(id: &str, iq_type: &str, to: Option<&Jid>, payload: Element) -> Element {
    let mut builder = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", iq_type)
        .attr("id", id);
    if let Some(to) = to {
        builder = builder.attr("to", to.to_string());
    }
    builder.append(payload).build()
}

fn pubsub(child: Element) -> Element {
    Element::builder("pubsub", ns::PUBSUB).append(child).build()
}

fn publish(node: &str, item: Element) -> Element {
    pubsub(
        Element::builder("publish", ns::PUBSUB)
            .attr("node", node)
            .append(item)
            .build(),
    )
}

/// Publish raw content to the avatar data node under `item_id`.
pub fn upload_stanza(id: &str, upload: &UploadRequest) -> Element {
    let data = Element::builder("data", ns::AVATAR_DATA)
        .append(Node::Text(upload.content.clone()))
        .build();
    let item = Element::builder("item", ns::PUBSUB)
        .attr("id", upload.resolved_id())
        .append(data)
        .build();
    iq(id, "set", None, publish(ns::NODE_AVATAR_DATA, item))
}

/// Render one `<info/>` record.
pub fn info_element(info: &AvatarInfo) -> Element {
    info.attributes()
        .into_iter()
        .fold(Element::builder("info", ns::AVATAR_METADATA), |b, (k, v)| {
            b.attr(k, v)
        })
        .build()
}

/// Publish avatar metadata, or an empty metadata element when disabling.
pub fn metadata_stanza(id: &str, request: &MetadataRequest) -> Element {
    let metadata = Element::builder("metadata", ns::AVATAR_METADATA);
    let item = Element::builder("item", ns::PUBSUB);

    let item = match request {
        MetadataRequest::Disable => item.append(metadata.build()),
        MetadataRequest::Publish {
            primary,
            additional,
        } => {
            let metadata = std::iter::once(primary)
                .chain(additional)
                .fold(metadata, |b, info| b.append(info_element(info)));
            item.attr("id", primary.id.as_str()).append(metadata.build())
        }
    };

    iq(id, "set", None, publish(ns::NODE_AVATAR_METADATA, item.build()))
}

/// Retrieve one item from a contact's avatar data node.
pub fn data_stanza(id: &str, request: &DataRequest) -> Element {
    let items = Element::builder("items", ns::PUBSUB)
        .attr("node", ns::NODE_AVATAR_DATA)
        .append(
            Element::builder("item", ns::PUBSUB)
                .attr("id", request.id.as_str())
                .build(),
        )
        .build();
    iq(id, "get", Some(&request.of), pubsub(items))
}

fn subscription_stanza(id: &str, action: &str, of: &Jid, subscriber: &BareJid) -> Element {
    let child = Element::builder(action, ns::PUBSUB)
        .attr("node", ns::NODE_AVATAR_METADATA)
        .attr("jid", subscriber.to_string())
        .build();
    iq(id, "set", Some(of), pubsub(child))
}

pub fn subscribe_stanza(id: &str, of: &Jid, subscriber: &BareJid) -> Element {
    subscription_stanza(id, "subscribe", of, subscriber)
}

pub fn unsubscribe_stanza(id: &str, of: &Jid, subscriber: &BareJid) -> Element {
    subscription_stanza(id, "unsubscribe", of, subscriber)
}

/// Text of `pubsub/items/item/data` in a data fetch result, or empty.
pub fn data_content(response: &Element) -> String {
    response
        .get_child("pubsub", ns::PUBSUB)
        .and_then(|p| p.get_child("items", ns::PUBSUB))
        .and_then(|items| items.get_child("item", ns::PUBSUB))
        .and_then(|item| item.get_child("data", ns::AVATAR_DATA))
        .map(|data| data.text())
        .unwrap_or_default()
}
