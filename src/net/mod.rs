//! Networking module
//!
//! This module handles the transport side of the frontend server:
//! - Mux packet framing over TCP
//! - Per-connection handshake state
//! - Session registry
//! - Connection lifecycle

pub mod buffer;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod session;
