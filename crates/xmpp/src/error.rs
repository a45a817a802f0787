//! Error types for avatar operations.

use minidom::Element;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use avatar_core::event::ClientError;

/// A stanza error returned by the remote entity, `{type, condition}` taken
/// verbatim from the `<error/>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub condition: String,
}

impl ProtocolError {
    pub const DEFAULT_TYPE: &'static str = "cancel";
    pub const DEFAULT_CONDITION: &'static str = "undefined-condition";

    /// Extract the error from a `type='error'` stanza.
    ///
    /// The condition is the first child of `<error/>` that is not `<text/>`.
    pub fn from_stanza(stanza: &Element) -> Self {
        let error = stanza.children().find(|child| child.name() == "error");

        let error_type = error
            .and_then(|e| e.attr("type"))
            .unwrap_or(Self::DEFAULT_TYPE)
            .to_string();
        let condition = error
            .and_then(|e| e.children().find(|child| child.name() != "text"))
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| Self::DEFAULT_CONDITION.to_string());

        Self {
            error_type,
            condition,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.error_type, self.condition)
    }
}

/// Failure of a single avatar operation. Serializes to the payload handed
/// to the caller's continuation.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(untagged)]
pub enum AvatarError {
    /// The request was rejected before anything was sent.
    #[error("{0}")]
    Client(ClientError),

    /// The remote entity answered with an IQ error.
    #[error("stanza error: {0}")]
    Protocol(ProtocolError),

    /// The stanza could not be handed to the transport.
    #[error("transport error: {description}")]
    Transport { description: String },

    /// A successful response could not be encoded as a reply payload.
    #[error("failed to encode reply: {description}")]
    Encoding { description: String },

    /// The pending entry was dropped before a response arrived.
    #[error("request {id} abandoned before a response arrived")]
    Abandoned { id: String },
}

impl AvatarError {
    pub fn client(description: impl Into<String>, request: &serde_json::Value) -> Self {
        Self::Client(ClientError::new(description, request.clone()))
    }

    pub fn transport(description: impl Into<String>) -> Self {
        Self::Transport {
            description: description.into(),
        }
    }
}

impl From<ConnectionError> for AvatarError {
    fn from(error: ConnectionError) -> Self {
        Self::transport(error.to_string())
    }
}

impl From<serde_json::Error> for AvatarError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encoding {
            description: error.to_string(),
        }
    }
}

impl From<ClientError> for AvatarError {
    fn from(error: ClientError) -> Self {
        Self::Client(error)
    }
}

impl From<ProtocolError> for AvatarError {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }
}

/// Failure handing a stanza to the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("outbound channel closed")]
    ChannelClosed,
}
