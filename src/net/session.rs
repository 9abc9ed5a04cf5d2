//! Session registry
//!
//! Tracks live frontend connections for counting, logging and shutdown.
//! The registry only holds bookkeeping; the per-connection handshake
//! state lives in [`Connection`](crate::net::connection::Connection),
//! owned by the connection task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, Result};
use crate::net::connection::ConnectionId;

/// Bookkeeping for one live connection
#[derive(Debug)]
pub struct SessionInfo {
    /// Connection identifier
    pub id: ConnectionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Time of session creation
    pub created_at: Instant,
    /// Messages dispatched on this connection
    messages_dispatched: AtomicU64,
}

impl SessionInfo {
    fn new(id: ConnectionId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            created_at: Instant::now(),
            messages_dispatched: AtomicU64::new(0),
        }
    }

    /// Record dispatched messages
    pub fn record_dispatched(&self, count: usize) {
        self.messages_dispatched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Total messages dispatched
    pub fn messages_dispatched(&self) -> u64 {
        self.messages_dispatched.load(Ordering::Relaxed)
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Thread-safe session registry
pub struct SessionManager {
    /// Map of connection ID to session
    sessions: DashMap<ConnectionId, Arc<SessionInfo>>,
    /// Next connection ID to assign
    next_id: AtomicU64,
    /// Maximum concurrent sessions
    max_sessions: usize,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Create a new session and register it
    pub fn create_session(&self, address: SocketAddr) -> Result<Arc<SessionInfo>> {
        let current = self.sessions.len();
        if current >= self.max_sessions {
            warn!(
                address = %address,
                count = current,
                max = self.max_sessions,
                "Connection limit reached"
            );
            return Err(NetworkError::TooManyConnections(current).into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(SessionInfo::new(id, address));
        self.sessions.insert(id, session.clone());

        info!(connection_id = id, address = %address, "Session created");

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<SessionInfo>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session
    pub fn remove(&self, id: ConnectionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            info!(
                connection_id = id,
                messages = session.messages_dispatched(),
                duration = ?session.age(),
                "Session removed"
            );
        }
    }

    /// Drop every registered session
    pub fn clear(&self) {
        let count = self.sessions.len();
        self.sessions.clear();
        debug!(count = count, "Cleared all sessions");
    }

    /// Get the count of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
