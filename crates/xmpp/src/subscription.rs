//! Subscriptions to a contact's avatar metadata node.

use async_trait::async_trait;
use jid::Jid;
use minidom::Element;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::correlator::ResponseCorrelator;
use crate::error::AvatarError;
use crate::ns;
use crate::stanza::{subscribe_stanza, unsubscribe_stanza};

/// Subscription state reported by the PubSub service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subid: Option<String>,
}

impl SubscriptionResult {
    /// Assumed when the service acknowledges without a `<subscription/>`.
    pub const DEFAULT_STATE: &'static str = "subscribed";

    pub fn from_response(response: &Element) -> Self {
        let subscription = response
            .get_child("pubsub", ns::PUBSUB)
            .and_then(|pubsub| pubsub.get_child("subscription", ns::PUBSUB));

        Self {
            subscription: subscription
                .and_then(|s| s.attr("subscription"))
                .unwrap_or(Self::DEFAULT_STATE)
                .to_string(),
            subid: subscription.and_then(|s| s.attr("subid")).map(String::from),
        }
    }
}

/// Subscribe and unsubscribe primitive scoped to the avatar metadata node.
#[async_trait]
pub trait SubscriptionService: Send + Sync + 'static {
    async fn subscribe(&self, of: &Jid) -> Result<SubscriptionResult, AvatarError>;

    async fn unsubscribe(&self, of: &Jid) -> Result<(), AvatarError>;
}

/// [`SubscriptionService`] that sends XEP-0060 subscription IQs over the
/// gateway's own connection.
#[derive(Clone)]
pub struct PubSubSubscriptions {
    correlator: ResponseCorrelator,
}

impl PubSubSubscriptions {
    pub fn new(correlator: ResponseCorrelator) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl SubscriptionService for PubSubSubscriptions {
    #[instrument(skip_all, fields(of = %of))]
    async fn subscribe(&self, of: &Jid) -> Result<SubscriptionResult, AvatarError> {
        let connection = self.correlator.connection();
        let id = connection.next_id();
        let stanza = subscribe_stanza(&id, of, connection.jid());
        self.correlator
            .request(&id, stanza, SubscriptionResult::from_response)
            .await
    }

    #[instrument(skip_all, fields(of = %of))]
    async fn unsubscribe(&self, of: &Jid) -> Result<(), AvatarError> {
        let connection = self.correlator.connection();
        let id = connection.next_id();
        let stanza = unsubscribe_stanza(&id, of, connection.jid());
        self.correlator.request(&id, stanza, |_| ()).await
    }
}
