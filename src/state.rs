//! Application state module
//!
//! Contains the shared state used across all frontend connections. Nothing
//! here is mutated per connection: handshake progress and the session
//! decryption context live on each connection.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::crypto::{SessionCipherFactory, SessionKey};
use crate::net::session::SessionManager;
use crate::protocol::blobs::BlobRepository;
use crate::protocol::dispatcher::Dispatcher;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Registry of live connections
    pub session_manager: SessionManager,
    /// Frontend message dispatcher
    pub dispatcher: Dispatcher,
    /// Creates one session decryptor per connection
    pub ciphers: SessionCipherFactory,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create the application state
    pub fn new(
        config: ServerConfig,
        session_key: SessionKey,
        blobs: Arc<dyn BlobRepository>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let dispatcher =
            Dispatcher::frontend(config.frontend.clone(), config.bootstrap.clone(), blobs);

        info!(
            simulate_queue = config.frontend.simulate_queue,
            replay_recorded_frames = config.bootstrap.replay_recorded_frames,
            broadcast_channel = config.bootstrap.broadcast_channel,
            "Frontend dispatcher configured"
        );

        Self {
            session_manager: SessionManager::new(config.max_connections),
            dispatcher,
            ciphers: SessionCipherFactory::new(session_key),
            config,
            shutdown_tx,
        }
    }
}
