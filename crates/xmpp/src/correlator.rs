//! Matches IQ responses to the operation that sent the request.

use std::sync::Arc;

use minidom::Element;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{AvatarError, ProtocolError};

/// Lifecycle of one in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Sent,
    Resolved,
    Failed,
}

/// Sends an IQ and waits for the stanza that answers it.
///
/// No timeout is applied; an operation stays pending until the connection
/// routes a response or drops the handler.
#[derive(Clone)]
pub struct ResponseCorrelator {
    connection: Arc<dyn Connection>,
}

impl ResponseCorrelator {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Track `id`, send `stanza`, and map the response.
    ///
    /// An error IQ yields [`AvatarError::Protocol`]; any other response is
    /// passed to `on_result`.
    pub async fn request<T, F>(&self, id: &str, stanza: Element, on_result: F) -> Result<T, AvatarError>
    where
        F: FnOnce(&Element) -> T + Send,
    {
        let (tx, rx) = oneshot::channel();
        self.connection.track_id(
            id,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );

        if let Err(error) = self.connection.send(stanza).await {
            self.connection.forget_id(id);
            warn!(id = %id, %error, state = ?OperationState::Failed, "failed to send IQ");
            return Err(error.into());
        }
        debug!(id = %id, state = ?OperationState::Sent, "IQ sent");

        let response = rx.await.map_err(|_| AvatarError::Abandoned { id: id.to_string() })?;

        if response.attr("type") == Some("error") {
            let error = ProtocolError::from_stanza(&response);
            debug!(id = %id, %error, state = ?OperationState::Failed, "IQ answered with error");
            return Err(AvatarError::Protocol(error));
        }

        debug!(id = %id, state = ?OperationState::Resolved, "IQ answered");
        Ok(on_result(&response))
    }
}
