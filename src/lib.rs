//! Frontline Server Library
//!
//! This library provides the frontend connection handshake for a legacy
//! game client: session token decryption, sub-service routing and the
//! scripted bootstrap sequence that moves a client to its loading screen.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `crypto` - Per-connection session token decryption
//! - `error` - Error types and result definitions
//! - `net` - Mux framing, connection handling and session management
//! - `protocol` - Frontend messages, dispatcher and handlers

pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{FrontlineError, Result};
pub use protocol::dispatcher::{DispatchReport, Dispatcher};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
