//! Typed avatar requests and the continuation that carries their reply.

use jid::Jid;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::sync::oneshot;

use crate::error::AvatarError;

/// SHA-1 hex digest of raw avatar content, used as the default item id.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Avatar operations exposed on the event socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Metadata,
    Data,
    Subscribe,
    Unsubscribe,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Upload,
        Operation::Metadata,
        Operation::Data,
        Operation::Subscribe,
        Operation::Unsubscribe,
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            Operation::Upload => "xmpp.avatar.upload",
            Operation::Metadata => "xmpp.avatar.metadata",
            Operation::Data => "xmpp.avatar.data",
            Operation::Subscribe => "xmpp.avatar.subscribe",
            Operation::Unsubscribe => "xmpp.avatar.unsubscribe",
        }
    }

    pub fn from_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.event_name() == name)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Publish raw image content to the avatar data node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub content: String,
    pub id: Option<String>,
}

impl UploadRequest {
    /// The explicit id, or the content hash when none was given.
    pub fn resolved_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => content_hash(&self.content),
        }
    }
}

/// One avatar record as rendered into an `<info/>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvatarInfo {
    pub id: String,
    pub bytes: String,
    pub mime_type: String,
    pub url: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl AvatarInfo {
    /// Attributes in wire order, skipping the ones that were not supplied.
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        let mut attrs = vec![("id", self.id.as_str())];
        if let Some(width) = &self.width {
            attrs.push(("width", width));
        }
        if let Some(height) = &self.height {
            attrs.push(("height", height));
        }
        attrs.push(("type", self.mime_type.as_str()));
        attrs.push(("bytes", self.bytes.as_str()));
        if let Some(url) = &self.url {
            attrs.push(("url", url));
        }
        attrs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRequest {
    /// Publish an empty metadata element, signalling that avatars are off.
    Disable,
    Publish {
        primary: AvatarInfo,
        additional: Vec<AvatarInfo>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub of: Jid,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub of: Jid,
}

/// A request that passed validation and is ready to be turned into a stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarRequest {
    Upload(UploadRequest),
    Metadata(MetadataRequest),
    Data(DataRequest),
    Subscribe(SubscriptionRequest),
    Unsubscribe(SubscriptionRequest),
}

impl AvatarRequest {
    pub fn operation(&self) -> Operation {
        match self {
            AvatarRequest::Upload(_) => Operation::Upload,
            AvatarRequest::Metadata(_) => Operation::Metadata,
            AvatarRequest::Data(_) => Operation::Data,
            AvatarRequest::Subscribe(_) => Operation::Subscribe,
            AvatarRequest::Unsubscribe(_) => Operation::Unsubscribe,
        }
    }
}

/// What a continuation is eventually invoked with.
pub type Reply = Result<Value, AvatarError>;

/// One-shot reply handle supplied by the caller alongside a request.
#[derive(Debug)]
pub struct Continuation(oneshot::Sender<Reply>);

impl Continuation {
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// False once the caller has dropped its receiving side.
    pub fn is_invokable(&self) -> bool {
        !self.0.is_closed()
    }

    /// Deliver the reply. Returns false if the caller already went away.
    pub fn resolve(self, reply: Reply) -> bool {
        self.0.send(reply).is_ok()
    }
}

/// A raw request as it arrives from the event socket.
#[derive(Debug)]
pub struct SocketRequest {
    pub event: String,
    pub payload: Value,
    pub continuation: Option<Continuation>,
}

impl SocketRequest {
    /// A request without a continuation.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            continuation: None,
        }
    }

    /// A request paired with the receiver its reply will arrive on.
    pub fn with_reply(
        event: impl Into<String>,
        payload: Value,
    ) -> (Self, oneshot::Receiver<Reply>) {
        let (continuation, rx) = Continuation::channel();
        let request = Self {
            event: event.into(),
            payload,
            continuation: Some(continuation),
        };
        (request, rx)
    }
}
