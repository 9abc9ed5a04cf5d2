//! Frontend message dispatcher
//!
//! Routes every inbound message of a batch to the handler registered for
//! its id. Batches are processed synchronously and strictly in arrival
//! order. Failures are absorbed per message: a malformed payload, a missing
//! handler or a failing handler is logged and recorded in the returned
//! [`DispatchReport`], and the rest of the batch still runs.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::config::{BootstrapConfig, FrontendConfig};
use crate::error::{CryptoError, FrontlineError, ProtocolError, Result};
use crate::net::connection::Connection;
use crate::protocol::blobs::BlobRepository;
use crate::protocol::credentials::CredentialHandler;
use crate::protocol::handshake::ServiceRouter;
use crate::protocol::messages::{FrontendMessage, InboundMessage, MessageSink, OutboundMessage};

/// A per-message problem absorbed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No handler is registered for the id
    UnhandledMessage { id: u8 },
    /// The payload of a known id failed to decode
    DecodeFailed { id: u8, error: ProtocolError },
    /// The session token could not be decrypted (the handler continued)
    DecryptionFailed { error: CryptoError },
    /// The handler failed for another reason
    HandlerFailed { id: u8, reason: String },
}

/// Outcome of one dispatched batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages whose handler ran to completion
    pub handled: usize,
    /// Problems recorded while processing the batch
    pub diagnostics: Vec<Diagnostic>,
}

impl DispatchReport {
    /// Whether the batch produced no diagnostics
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Number of messages with no registered handler
    pub fn unhandled_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::UnhandledMessage { .. }))
            .count()
    }
}

/// Everything a handler may touch while processing one message
pub struct HandlerContext<'a> {
    /// Connection the batch belongs to
    pub connection: &'a mut Connection,
    /// Mux channel the batch arrived on
    pub mux_channel: u16,
    sink: &'a mut dyn MessageSink,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> HandlerContext<'a> {
    /// Create a context over a connection and an outbound sink
    pub fn new(
        connection: &'a mut Connection,
        mux_channel: u16,
        sink: &'a mut dyn MessageSink,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Self {
        Self {
            connection,
            mux_channel,
            sink,
            diagnostics,
        }
    }

    /// Reply on the requesting mux channel
    pub fn reply(&mut self, id: u8, payload: Bytes) {
        let message = OutboundMessage::message(self.mux_channel, id, payload);
        self.send(message);
    }

    /// Queue an outbound message
    pub fn send(&mut self, message: OutboundMessage) {
        trace!(
            connection_id = self.connection.id,
            outbound = %message.describe(),
            "Queued outbound message"
        );
        self.sink.send(message);
    }

    /// Record a diagnostic without failing the message
    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Handler for one inbound message id
pub trait MessageHandler: Send + Sync {
    /// Process one message; an error is reported for this message only
    fn handle(&self, ctx: &mut HandlerContext<'_>, message: &InboundMessage) -> Result<()>;
}

/// Maps message ids to handlers
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<u8, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the frontend dispatcher: credentials and service handshakes
    pub fn frontend(
        frontend: FrontendConfig,
        bootstrap: BootstrapConfig,
        blobs: Arc<dyn BlobRepository>,
    ) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(
            FrontendMessage::ClientCredentials.as_u8(),
            CredentialHandler::new(frontend, blobs.clone()),
        );
        dispatcher.register(
            FrontendMessage::InitialClientHandshake.as_u8(),
            ServiceRouter::new(bootstrap, blobs),
        );
        dispatcher
    }

    /// Register (or replace) the handler for a message id
    pub fn register(&mut self, id: u8, handler: impl MessageHandler + 'static) -> &mut Self {
        self.handlers.insert(id, Arc::new(handler));
        self
    }

    /// Whether a handler is registered for an id
    pub fn handles(&self, id: u8) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Process a batch of messages received on one mux channel
    pub fn handle(
        &self,
        connection: &mut Connection,
        mux_channel: u16,
        messages: &[InboundMessage],
        sink: &mut dyn MessageSink,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for message in messages {
            let name = message_name(message.id);

            let Some(handler) = self.handlers.get(&message.id) else {
                warn!(
                    connection_id = connection.id,
                    mux_channel = mux_channel,
                    message_id = message.id,
                    message = name,
                    "Received unhandled message"
                );
                report
                    .diagnostics
                    .push(Diagnostic::UnhandledMessage { id: message.id });
                continue;
            };

            let result = {
                let mut ctx =
                    HandlerContext::new(connection, mux_channel, sink, &mut report.diagnostics);
                handler.handle(&mut ctx, message)
            };

            match result {
                Ok(()) => report.handled += 1,
                Err(FrontlineError::Protocol(error)) => {
                    warn!(
                        connection_id = connection.id,
                        mux_channel = mux_channel,
                        message_id = message.id,
                        message = name,
                        error = %error,
                        "Failed to decode message"
                    );
                    report.diagnostics.push(Diagnostic::DecodeFailed {
                        id: message.id,
                        error,
                    });
                }
                Err(e) => {
                    warn!(
                        connection_id = connection.id,
                        mux_channel = mux_channel,
                        message_id = message.id,
                        message = name,
                        error = %e,
                        "Error handling message"
                    );
                    report.diagnostics.push(Diagnostic::HandlerFailed {
                        id: message.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

fn message_name(id: u8) -> &'static str {
    FrontendMessage::from_u8(id)
        .map(|m| m.name())
        .unwrap_or("unknown")
}
