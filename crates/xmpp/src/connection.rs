//! The connection capability the gateway is composed with.
//!
//! A [`Connection`] owns the live session: it generates stanza ids, keeps
//! the table of pending IQ handlers, and puts stanzas on the wire.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jid::BareJid;
use minidom::Element;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::error::ConnectionError;
use crate::id::IdGenerator;
use crate::pipeline::{ProcessorResult, StanzaProcessor};

/// Invoked once with the stanza that answers a tracked IQ.
pub type ResponseHandler = Box<dyn FnOnce(Element) + Send + Sync + 'static>;

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Bare JID of the account this connection is bound to.
    fn jid(&self) -> &BareJid;

    fn next_id(&self) -> String;

    /// Register `handler` to run when a response carrying `id` arrives.
    fn track_id(&self, id: &str, handler: ResponseHandler);

    /// Drop a pending handler. Returns true if one was registered.
    fn forget_id(&self, id: &str) -> bool;

    /// Hand an inbound stanza to the tracking table. Returns true if it
    /// answered a pending IQ.
    fn route_inbound(&self, stanza: &Element) -> bool;

    async fn send(&self, stanza: Element) -> Result<(), ConnectionError>;
}

/// Pending IQ handlers keyed by stanza id.
///
/// Uses DashMap so concurrent operations can register without locking.
#[derive(Default)]
pub struct PendingIqs {
    handlers: DashMap<String, ResponseHandler>,
}

impl PendingIqs {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, handler))]
    pub fn register(&self, id: &str, handler: ResponseHandler) {
        if self.handlers.insert(id.to_string(), handler).is_some() {
            warn!(id = %id, "replaced an existing pending IQ handler");
        }
        trace!(pending = self.handlers.len(), "IQ tracked");
    }

    pub fn remove(&self, id: &str) -> bool {
        self.handlers.remove(id).is_some()
    }

    /// Run and remove the handler matching this IQ response, if any.
    pub fn resolve(&self, stanza: &Element) -> bool {
        if stanza.name() != "iq" || !matches!(stanza.attr("type"), Some("result" | "error")) {
            return false;
        }
        let Some(id) = stanza.attr("id") else {
            return false;
        };

        match self.handlers.remove(id) {
            Some((_, handler)) => {
                debug!(id = %id, "IQ response matched");
                handler(stanza.clone());
                true
            }
            None => {
                debug!(id = %id, "IQ response with no pending handler ignored");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for PendingIqs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingIqs")
            .field("pending", &self.handlers.len())
            .finish()
    }
}

/// A [`Connection`] that writes stanzas to an `mpsc` channel read by the
/// transport task.
#[derive(Debug)]
pub struct ChannelConnection {
    jid: BareJid,
    ids: IdGenerator,
    pending: PendingIqs,
    outbound: mpsc::Sender<Element>,
}

impl ChannelConnection {
    pub fn new(jid: BareJid, outbound: mpsc::Sender<Element>) -> Self {
        Self {
            jid,
            ids: IdGenerator::new(),
            pending: PendingIqs::new(),
            outbound,
        }
    }

    /// Number of IQs still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn jid(&self) -> &BareJid {
        &self.jid
    }

    fn next_id(&self) -> String {
        self.ids.next_id()
    }

    fn track_id(&self, id: &str, handler: ResponseHandler) {
        self.pending.register(id, handler);
    }

    fn forget_id(&self, id: &str) -> bool {
        self.pending.remove(id)
    }

    fn route_inbound(&self, stanza: &Element) -> bool {
        self.pending.resolve(stanza)
    }

    async fn send(&self, stanza: Element) -> Result<(), ConnectionError> {
        self.outbound
            .send(stanza)
            .await
            .map_err(|_| ConnectionError::ChannelClosed)
    }
}

/// Pipeline stage that settles pending IQs before anything else sees them.
pub struct ResponseRouter {
    connection: Arc<dyn Connection>,
}

impl ResponseRouter {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }
}

impl StanzaProcessor for ResponseRouter {
    fn name(&self) -> &str {
        "iq-response"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn process_inbound(&self, stanza: &Element) -> ProcessorResult {
        if self.connection.route_inbound(stanza) {
            ProcessorResult::Handled
        } else {
            ProcessorResult::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(id: &str, iq_type: &str) -> Element {
        Element::builder("iq", crate::ns::JABBER_CLIENT)
            .attr("type", iq_type)
            .attr("id", id)
            .build()
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> ResponseHandler {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn resolves_matching_result_once() {
        let pending = PendingIqs::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pending.register("a1", counting_handler(&calls));

        assert!(pending.resolve(&response("a1", "result")));
        assert!(!pending.resolve(&response("a1", "result")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn ignores_unknown_ids_and_requests() {
        let pending = PendingIqs::new();
        let calls = Arc::new(AtomicUsize::new(0));
        pending.register("a1", counting_handler(&calls));

        assert!(!pending.resolve(&response("other", "result")));
        assert!(!pending.resolve(&response("a1", "get")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn remove_drops_handler() {
        let pending = PendingIqs::new();
        pending.register("a1", Box::new(|_| {}));
        assert!(pending.remove("a1"));
        assert!(!pending.remove("a1"));
    }

    #[tokio::test]
    async fn channel_connection_writes_to_wire() {
        let (tx, mut rx) = mpsc::channel(4);
        let connection =
            ChannelConnection::new(BareJid::new("juliet@capulet.lit").unwrap(), tx);

        connection.send(response("x", "get")).await.unwrap();
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.attr("id"), Some("x"));
    }

    #[tokio::test]
    async fn send_fails_when_wire_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let connection =
            ChannelConnection::new(BareJid::new("juliet@capulet.lit").unwrap(), tx);

        let err = connection.send(response("x", "get")).await.unwrap_err();
        assert_eq!(err, ConnectionError::ChannelClosed);
    }

    #[test]
    fn generated_ids_are_distinct() {
        let (tx, _rx) = mpsc::channel(1);
        let connection =
            ChannelConnection::new(BareJid::new("juliet@capulet.lit").unwrap(), tx);
        assert_ne!(connection.next_id(), connection.next_id());
    }
}
