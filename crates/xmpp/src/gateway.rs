//! The avatar gateway: socket requests in, IQs out, pushes republished.

use std::sync::Arc;

use avatar_core::config::AvatarConfig;
use avatar_core::event::{publish_on, EventBus, EventPayload, EventSource, CLIENT_ERROR};
use jid::Jid;
use minidom::Element;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::connection::{Connection, ResponseRouter};
use crate::correlator::ResponseCorrelator;
use crate::error::{AvatarError, ClientError};
use crate::notification::MetadataPushProcessor;
use crate::pipeline::StanzaPipeline;
use crate::request::{
    AvatarRequest, DataRequest, MetadataRequest, Operation, Reply, SocketRequest, UploadRequest,
};
use crate::stanza;
use crate::subscription::{PubSubSubscriptions, SubscriptionService};
use crate::validate::{require_continuation, validate};

pub struct AvatarGateway {
    connection: Arc<dyn Connection>,
    correlator: ResponseCorrelator,
    subscriptions: Arc<dyn SubscriptionService>,
    event_bus: Arc<dyn EventBus>,
    pipeline: StanzaPipeline,
}

impl AvatarGateway {
    pub fn new(
        connection: Arc<dyn Connection>,
        event_bus: Arc<dyn EventBus>,
        config: &AvatarConfig,
    ) -> Self {
        let correlator = ResponseCorrelator::new(Arc::clone(&connection));
        let subscriptions = Arc::new(PubSubSubscriptions::new(correlator.clone()));

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(Box::new(ResponseRouter::new(Arc::clone(&connection))));
        pipeline.register(Box::new(
            MetadataPushProcessor::new(Arc::clone(&event_bus))
                .flatten_single(config.flatten_single_avatar),
        ));

        Self {
            connection,
            correlator,
            subscriptions,
            event_bus,
            pipeline,
        }
    }

    /// Replace the PubSub subscription primitive.
    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionService>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    #[instrument(skip_all, fields(item = tracing::field::Empty))]
    pub async fn upload(&self, upload: UploadRequest) -> Result<Value, AvatarError> {
        let item_id = upload.resolved_id();
        tracing::Span::current().record("item", item_id.as_str());

        let id = self.connection.next_id();
        let stanza = stanza::upload_stanza(&id, &upload);
        self.correlator
            .request(&id, stanza, move |_| json!({ "id": item_id }))
            .await
    }

    #[instrument(skip_all)]
    pub async fn set_metadata(&self, metadata: MetadataRequest) -> Result<Value, AvatarError> {
        let id = self.connection.next_id();
        let stanza = stanza::metadata_stanza(&id, &metadata);
        self.correlator
            .request(&id, stanza, |_| Value::Bool(true))
            .await
    }

    #[instrument(skip_all, fields(of = %request.of, item = %request.id))]
    pub async fn fetch_data(&self, request: DataRequest) -> Result<Value, AvatarError> {
        let id = self.connection.next_id();
        let stanza = stanza::data_stanza(&id, &request);
        self.correlator
            .request(&id, stanza, |response| {
                json!({ "content": stanza::data_content(response) })
            })
            .await
    }

    pub async fn subscribe(&self, of: &Jid) -> Result<Value, AvatarError> {
        let result = self.subscriptions.subscribe(of).await?;
        Ok(serde_json::to_value(result)?)
    }

    pub async fn unsubscribe(&self, of: &Jid) -> Result<Value, AvatarError> {
        self.subscriptions.unsubscribe(of).await?;
        Ok(Value::Bool(true))
    }

    /// Run a validated request to completion.
    pub async fn execute(&self, request: AvatarRequest) -> Reply {
        match request {
            AvatarRequest::Upload(upload) => self.upload(upload).await,
            AvatarRequest::Metadata(metadata) => self.set_metadata(metadata).await,
            AvatarRequest::Data(data) => self.fetch_data(data).await,
            AvatarRequest::Subscribe(request) => self.subscribe(&request.of).await,
            AvatarRequest::Unsubscribe(request) => self.unsubscribe(&request.of).await,
        }
    }

    /// Validate a socket request and start it.
    ///
    /// Validation failures are answered before returning. Valid requests
    /// run on their own task, whose handle is returned.
    #[instrument(skip_all, fields(event = %request.event))]
    pub fn dispatch(self: &Arc<Self>, request: SocketRequest) -> Option<JoinHandle<()>> {
        let SocketRequest {
            event,
            payload,
            continuation,
        } = request;

        let continuation = match require_continuation(continuation, &payload) {
            Ok(continuation) => continuation,
            Err(error) => {
                self.report_client_error(error);
                return None;
            }
        };

        let Some(operation) = Operation::from_event(&event) else {
            debug!("unknown avatar operation");
            let error = AvatarError::client(format!("Unknown avatar operation '{event}'"), &payload);
            continuation.resolve(Err(error));
            return None;
        };

        let request = match validate(operation, &payload) {
            Ok(request) => request,
            Err(error) => {
                debug!(description = %error.description, "request rejected");
                continuation.resolve(Err(error.into()));
                return None;
            }
        };

        let gateway = Arc::clone(self);
        Some(tokio::spawn(async move {
            let reply = gateway.execute(request).await;
            if !continuation.resolve(reply) {
                debug!(%operation, "caller went away before the reply");
            }
        }))
    }

    /// Report a failure that has no continuation to answer.
    fn report_client_error(&self, error: ClientError) {
        warn!(description = %error.description, "client error without callback");
        if let Err(publish_error) = publish_on(
            self.event_bus.as_ref(),
            CLIENT_ERROR,
            EventSource::Socket,
            EventPayload::ClientErrorReported { error },
        ) {
            warn!(%publish_error, "failed to publish client error");
        }
    }

    /// Offer an inbound stanza to the response router and push decoder.
    /// Returns false for stanzas that neither recognizes.
    pub fn handle_stanza(&self, stanza: &Element) -> bool {
        let handled = self.pipeline.process_inbound(stanza);
        if !handled {
            trace!(name = %stanza.name(), "stanza not handled");
        }
        handled
    }

    /// Request queue sized from configuration, for feeding [`Self::run`].
    pub fn request_channel(
        config: &AvatarConfig,
    ) -> (mpsc::Sender<SocketRequest>, mpsc::Receiver<SocketRequest>) {
        mpsc::channel(config.request_buffer)
    }

    /// Consume socket requests until the channel closes.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<SocketRequest>) {
        let jid = self.connection.jid().to_string();
        info!(jid = %jid, "avatar gateway started");
        self.publish_system("system.gateway.started", EventPayload::GatewayStarted { jid });

        while let Some(request) = requests.recv().await {
            self.dispatch(request);
        }

        info!("request channel closed, avatar gateway stopping");
        self.publish_system(
            "system.gateway.stopped",
            EventPayload::GatewayStopped {
                reason: "request channel closed".to_string(),
            },
        );
    }

    /// Consume inbound stanzas in arrival order until the channel closes.
    pub async fn run_inbound(self: Arc<Self>, mut stanzas: mpsc::Receiver<Element>) {
        while let Some(stanza) = stanzas.recv().await {
            self.handle_stanza(&stanza);
        }
        debug!("inbound stanza channel closed");
    }

    fn publish_system(&self, channel: &str, payload: EventPayload) {
        let source = EventSource::System("avatar-gateway".to_string());
        if let Err(error) = publish_on(self.event_bus.as_ref(), channel, source, payload) {
            warn!(%error, channel, "failed to publish gateway lifecycle event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::request::SubscriptionRequest;
    use crate::subscription::SubscriptionResult;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use avatar_core::event::BroadcastEventBus;
    use jid::BareJid;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSubscriptions {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SubscriptionService for RecordingSubscriptions {
        async fn subscribe(&self, of: &Jid) -> Result<SubscriptionResult, AvatarError> {
            self.calls.lock().unwrap().push(format!("subscribe {of}"));
            Ok(SubscriptionResult {
                subscription: "subscribed".into(),
                subid: Some("sub-1".into()),
            })
        }

        async fn unsubscribe(&self, of: &Jid) -> Result<(), AvatarError> {
            self.calls.lock().unwrap().push(format!("unsubscribe {of}"));
            Ok(())
        }
    }

    fn gateway() -> (Arc<AvatarGateway>, mpsc::Receiver<Element>, Arc<RecordingSubscriptions>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = Arc::new(ChannelConnection::new(
            BareJid::new("juliet@capulet.lit").unwrap(),
            tx,
        ));
        let subscriptions = Arc::new(RecordingSubscriptions::default());
        let gateway = AvatarGateway::new(
            connection,
            Arc::new(BroadcastEventBus::default()),
            &AvatarConfig::default(),
        )
        .with_subscriptions(subscriptions.clone());
        (Arc::new(gateway), rx, subscriptions)
    }

    #[tokio::test]
    async fn subscription_requests_use_delegate() {
        let (gateway, _wire, subscriptions) = gateway();
        let of = Jid::new("romeo@montague.lit").unwrap();

        let reply = gateway
            .execute(AvatarRequest::Subscribe(SubscriptionRequest { of: of.clone() }))
            .await
            .unwrap();
        assert_eq!(reply, json!({"subscription": "subscribed", "subid": "sub-1"}));

        let reply = gateway
            .execute(AvatarRequest::Unsubscribe(SubscriptionRequest { of }))
            .await
            .unwrap();
        assert_eq!(reply, Value::Bool(true));

        assert_eq!(
            *subscriptions.calls.lock().unwrap(),
            vec!["subscribe romeo@montague.lit", "unsubscribe romeo@montague.lit"]
        );
    }

    #[tokio::test]
    async fn unknown_operation_is_a_client_error() {
        let (gateway, _wire, _) = gateway();
        let (request, reply) = SocketRequest::with_reply("xmpp.avatar.delete", json!({}));

        assert!(gateway.dispatch(request).is_none());
        assert_matches!(
            reply.await.unwrap(),
            Err(AvatarError::Client(error))
                if error.description == "Unknown avatar operation 'xmpp.avatar.delete'"
        );
    }

    #[tokio::test]
    async fn invalid_request_is_answered_without_sending() {
        let (gateway, mut wire, _) = gateway();
        let (request, reply) = SocketRequest::with_reply("xmpp.avatar.upload", json!({}));

        assert!(gateway.dispatch(request).is_none());
        assert_matches!(
            reply.await.unwrap(),
            Err(AvatarError::Client(error)) if error.description == "Missing 'content' key"
        );
        assert!(wire.try_recv().is_err());
    }

    #[tokio::test]
    async fn unrelated_stanzas_are_not_handled() {
        let (gateway, _wire, _) = gateway();
        let stanza: Element = "<presence xmlns='jabber:client' from='romeo@montague.lit'/>"
            .parse()
            .unwrap();
        assert!(!gateway.handle_stanza(&stanza));
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_callback_is_logged() {
        let (gateway, mut wire, _) = gateway();
        let (continuation, receiver) = crate::request::Continuation::channel();
        drop(receiver);

        let request = SocketRequest {
            event: "xmpp.avatar.upload".into(),
            payload: json!({"content": "abc"}),
            continuation: Some(continuation),
        };
        assert!(gateway.dispatch(request).is_none());
        assert!(logs_contain("client error without callback"));
        assert!(wire.try_recv().is_err());
    }
}
