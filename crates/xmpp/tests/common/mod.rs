//! Harness wiring a gateway to an in-memory wire and event bus.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use avatar_core::config::{parse_config, AvatarConfig};
use avatar_core::event::{BroadcastEventBus, Event, EventBus, EventSubscription};
use avatar_test_support::fixtures;
use avatar_xmpp::{AvatarGateway, ChannelConnection, Connection, Reply, SocketRequest};
use jid::BareJid;
use minidom::Element;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Own JID taken from the minimal config fixture.
pub fn account_jid() -> BareJid {
    let config = parse_config(&fixtures::config("minimal-config.toml"))
        .expect("minimal config fixture is valid");
    config.account.bare_jid().expect("valid own JID")
}

pub struct Harness {
    pub gateway: Arc<AvatarGateway>,
    pub connection: Arc<ChannelConnection>,
    pub bus: Arc<BroadcastEventBus>,
    pub wire: mpsc::Receiver<Element>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AvatarConfig::default())
    }

    pub fn with_config(config: AvatarConfig) -> Self {
        init_test();
        let (tx, wire) = mpsc::channel(16);
        let jid = account_jid();
        let connection = Arc::new(ChannelConnection::new(jid, tx));
        let bus = Arc::new(BroadcastEventBus::default());
        let gateway = Arc::new(AvatarGateway::new(
            connection.clone(),
            bus.clone(),
            &config,
        ));

        Self {
            gateway,
            connection,
            bus,
            wire,
        }
    }

    /// Dispatch a request with a continuation and return its reply receiver.
    pub fn request(&self, event: &str, payload: Value) -> oneshot::Receiver<Reply> {
        let (request, reply) = SocketRequest::with_reply(event, payload);
        self.gateway.dispatch(request);
        reply
    }

    pub async fn next_outbound(&mut self) -> Element {
        timeout(DEFAULT_TIMEOUT, self.wire.recv())
            .await
            .expect("timed out waiting for outbound stanza")
            .expect("wire closed")
    }

    pub fn assert_wire_idle(&mut self) {
        assert!(self.wire.try_recv().is_err(), "unexpected outbound stanza");
    }

    /// Answer `request` with a fixture carrying its id.
    pub fn respond(&self, fixture: &str, request: &Element) -> bool {
        let id = request.attr("id").expect("outbound IQ has an id");
        self.gateway
            .handle_stanza(&fixtures::stanza_with_id(fixture, id))
    }

    pub fn subscribe(&self, pattern: &str) -> EventSubscription {
        self.bus.subscribe(pattern).expect("valid pattern")
    }

    pub fn pending(&self) -> usize {
        self.connection.pending_count()
    }

    pub fn own_jid(&self) -> String {
        self.connection.jid().to_string()
    }
}

pub async fn reply(receiver: oneshot::Receiver<Reply>) -> Reply {
    timeout(DEFAULT_TIMEOUT, receiver)
        .await
        .expect("timed out waiting for reply")
        .expect("continuation dropped without a reply")
}

pub async fn next_event(subscription: &mut EventSubscription) -> Event {
    timeout(DEFAULT_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

pub async fn assert_no_event(subscription: &mut EventSubscription) {
    assert!(
        timeout(QUIET_PERIOD, subscription.recv()).await.is_err(),
        "unexpected event"
    );
}

/// The single `<item/>` under `pubsub/<action>` of an outbound IQ.
pub fn pubsub_child<'a>(stanza: &'a Element, action: &str) -> &'a Element {
    stanza
        .get_child("pubsub", avatar_xmpp::ns::PUBSUB)
        .and_then(|pubsub| pubsub.get_child(action, avatar_xmpp::ns::PUBSUB))
        .unwrap_or_else(|| panic!("missing pubsub/{action}"))
}
