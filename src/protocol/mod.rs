//! Protocol module
//!
//! This module contains the frontend handshake implementation:
//! - Message ids and payload codecs
//! - Canned response blobs
//! - The id-keyed message dispatcher
//! - Credentials exchange
//! - Sub-service routing and the grouping bootstrap sequence

pub mod blobs;
pub mod credentials;
pub mod dispatcher;
pub mod handshake;
pub mod messages;
