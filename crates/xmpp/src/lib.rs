//! XEP-0084 User Avatar over PubSub.
//!
//! Socket requests are validated, turned into IQ stanzas, and correlated
//! with their responses through an injected [`Connection`]. Inbound metadata
//! notifications are decoded and republished on the event bus.

pub mod connection;
pub mod correlator;
pub mod error;
pub mod gateway;
pub mod id;
pub mod notification;
pub mod ns;
pub mod pipeline;
pub mod request;
pub mod stanza;
pub mod subscription;
pub mod validate;

pub use connection::{ChannelConnection, Connection, PendingIqs, ResponseHandler, ResponseRouter};
pub use correlator::{OperationState, ResponseCorrelator};
pub use error::{AvatarError, ClientError, ConnectionError, ProtocolError};
pub use gateway::AvatarGateway;
pub use id::IdGenerator;
pub use notification::{decode_metadata_push, is_metadata_push, MetadataPushProcessor};
pub use pipeline::{ProcessorResult, StanzaPipeline, StanzaProcessor};
pub use request::{
    content_hash, AvatarInfo, AvatarRequest, Continuation, DataRequest, MetadataRequest,
    Operation, Reply, SocketRequest, SubscriptionRequest, UploadRequest,
};
pub use subscription::{PubSubSubscriptions, SubscriptionResult, SubscriptionService};
pub use validate::{require_continuation, validate};
