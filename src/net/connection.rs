//! Per-client connection state
//!
//! A [`Connection`] is created when the transport accepts a client and
//! dropped on disconnect. The transport task owns it and lends it mutably to
//! the dispatcher for one message batch at a time.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bitflags::bitflags;
use tracing::debug;

use crate::crypto::SessionDecryptor;
use crate::protocol::messages::ServiceKind;

/// Unique connection identifier
pub type ConnectionId = u64;

bitflags! {
    /// Virtual sub-services whose handshake has completed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompletedServices: u8 {
        const PLAYER_MANAGER = 1 << 0;
        const GROUPING_MANAGER = 1 << 1;
    }
}

impl From<ServiceKind> for CompletedServices {
    fn from(service: ServiceKind) -> Self {
        match service {
            ServiceKind::PlayerManager => CompletedServices::PLAYER_MANAGER,
            ServiceKind::GroupingManager => CompletedServices::GROUPING_MANAGER,
        }
    }
}

/// One connected client
pub struct Connection {
    /// Unique connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time the connection was accepted
    pub created_at: Instant,
    /// Completed sub-service handshakes, only ever grows
    completed: CompletedServices,
    /// Open mux channels
    channels: BTreeSet<u16>,
    /// Session token decryption context owned by this connection
    decryptor: Box<dyn SessionDecryptor>,
}

impl Connection {
    /// Create a new connection with its own decryption context
    pub fn new(
        id: ConnectionId,
        address: SocketAddr,
        decryptor: Box<dyn SessionDecryptor>,
    ) -> Self {
        Self {
            id,
            address,
            created_at: Instant::now(),
            completed: CompletedServices::empty(),
            channels: BTreeSet::new(),
            decryptor,
        }
    }

    // ============ Sub-service handshakes ============

    /// Record a completed handshake, returns true on the first completion
    pub fn mark_service_complete(&mut self, service: ServiceKind) -> bool {
        let flag = CompletedServices::from(service);
        let newly = !self.completed.contains(flag);
        self.completed.insert(flag);
        if newly {
            debug!(
                connection_id = self.id,
                service = %service,
                "Sub-service handshake complete"
            );
        }
        newly
    }

    /// Whether the handshake for a service has completed
    pub fn is_service_complete(&self, service: ServiceKind) -> bool {
        self.completed.contains(CompletedServices::from(service))
    }

    /// All completed handshakes
    pub fn completed_services(&self) -> CompletedServices {
        self.completed
    }

    // ============ Mux channels ============

    /// Open a mux channel, returns false if it was already open
    pub fn open_channel(&mut self, mux_channel: u16) -> bool {
        self.channels.insert(mux_channel)
    }

    /// Close a mux channel, returns false if it was not open
    pub fn close_channel(&mut self, mux_channel: u16) -> bool {
        self.channels.remove(&mux_channel)
    }

    /// Whether a mux channel is open
    pub fn is_channel_open(&self, mux_channel: u16) -> bool {
        self.channels.contains(&mux_channel)
    }

    /// Open mux channels in ascending order
    pub fn channels(&self) -> impl Iterator<Item = u16> + '_ {
        self.channels.iter().copied()
    }

    // ============ Cryptography ============

    /// Borrow this connection's decryption context
    pub fn decryptor_mut(&mut self) -> &mut dyn SessionDecryptor {
        self.decryptor.as_mut()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("completed", &self.completed)
            .field("channels", &self.channels)
            .finish()
    }
}
