//! Frontend message definitions
//!
//! Message ids, the decoded handshake payloads, and the outbound message
//! model shared by the dispatcher and its handlers.

use std::fmt;

use bytes::Bytes;

use crate::net::buffer::{PacketBuffer, ReadResult};
use crate::protocol::blobs::BlobName;

/// Frontend protocol message ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrontendMessage {
    /// Client credentials (IV + encrypted session token)
    ClientCredentials = 1,
    /// Login queue position
    LoginQueueStatus = 3,
    /// Session encryption switched over
    SessionEncryptionChanged = 4,
    /// Per-service handshake request
    InitialClientHandshake = 5,
}

impl FrontendMessage {
    /// Convert a u8 to a FrontendMessage
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ClientCredentials),
            3 => Some(Self::LoginQueueStatus),
            4 => Some(Self::SessionEncryptionChanged),
            5 => Some(Self::InitialClientHandshake),
            _ => None,
        }
    }

    /// Get the message id
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the name of this message
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "ClientCredentials",
            Self::LoginQueueStatus => "LoginQueueStatus",
            Self::SessionEncryptionChanged => "SessionEncryptionChanged",
            Self::InitialClientHandshake => "InitialClientHandshake",
        }
    }
}

impl fmt::Display for FrontendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// Game server to client message ids used during bootstrap
pub mod game_message {
    /// Server clock announcement
    pub const MARK_FIRST_GAME_FRAME: u8 = 2;
    /// Server version announcement
    pub const SERVER_VERSION: u8 = 3;
    /// Queue the loading screen for a region
    pub const QUEUE_LOADING_SCREEN: u8 = 31;
}

/// Grouping manager message ids
pub mod grouping_message {
    /// Chat broadcast to all servers
    pub const CHAT_BROADCAST: u8 = 2;
}

/// Chat room type for server-wide broadcasts
pub const CHAT_ROOM_BROADCAST_ALL_SERVERS: u32 = 11;

/// One message delivered by the transport, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message id
    pub id: u8,
    /// Mux channel the message arrived on
    pub mux_channel: u16,
    /// Encoded payload
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(id: u8, mux_channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            mux_channel,
            payload: payload.into(),
        }
    }
}

/// A message queued for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Field-built message framed by the transport
    Message {
        mux_channel: u16,
        id: u8,
        payload: Bytes,
    },
    /// Pre-recorded packet sent verbatim
    Canned { name: BlobName, bytes: Bytes },
}

impl OutboundMessage {
    /// Create a field-built message
    pub fn message(mux_channel: u16, id: u8, payload: Bytes) -> Self {
        Self::Message {
            mux_channel,
            id,
            payload,
        }
    }

    /// Create a canned message
    pub fn canned(name: BlobName, bytes: Bytes) -> Self {
        Self::Canned { name, bytes }
    }

    /// Mux channel of a field-built message
    pub fn mux_channel(&self) -> Option<u16> {
        match self {
            Self::Message { mux_channel, .. } => Some(*mux_channel),
            Self::Canned { .. } => None,
        }
    }

    /// Short description used in logs
    pub fn describe(&self) -> String {
        match self {
            Self::Message {
                mux_channel, id, ..
            } => format!("message {} on mux {}", id, mux_channel),
            Self::Canned { name, .. } => format!("canned {}", name),
        }
    }
}

/// Destination for outbound messages
///
/// Sends are fire-and-forget: the dispatcher never waits on, retries, or
/// learns the outcome of a write.
pub trait MessageSink {
    fn send(&mut self, message: OutboundMessage);
}

impl MessageSink for Vec<OutboundMessage> {
    fn send(&mut self, message: OutboundMessage) {
        self.push(message);
    }
}

// ============ Inbound payloads ============

/// Decoded `ClientCredentials` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Per-session initialization vector
    pub iv: Bytes,
    /// Session token encrypted under the server session key
    pub encrypted_token: Bytes,
}

impl ClientCredentials {
    /// Decode from a message payload
    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        let iv = buf.read_prefixed_bytes()?;
        let encrypted_token = buf.read_prefixed_bytes()?;
        Ok(Self {
            iv,
            encrypted_token,
        })
    }

    /// Encode to a message payload
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(self.iv.len() + self.encrypted_token.len() + 4);
        buf.write_prefixed_bytes(&self.iv);
        buf.write_prefixed_bytes(&self.encrypted_token);
        buf.freeze()
    }
}

/// Virtual sub-services a client handshakes with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Player manager frontend
    PlayerManager,
    /// Grouping (chat) manager frontend
    GroupingManager,
}

impl ServiceKind {
    /// Map a declared server type to a known service
    pub fn from_server_type(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::PlayerManager),
            2 => Some(Self::GroupingManager),
            _ => None,
        }
    }

    /// Declared server type value
    pub fn server_type(self) -> u32 {
        match self {
            Self::PlayerManager => 1,
            Self::GroupingManager => 2,
        }
    }

    /// Get the name of this service
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayerManager => "PlayerManager",
            Self::GroupingManager => "GroupingManager",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded `InitialClientHandshake` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialClientHandshake {
    /// Declared server type (raw, may be unknown)
    pub server_type: u32,
}

impl InitialClientHandshake {
    /// Create a handshake request for a known service
    pub fn for_service(service: ServiceKind) -> Self {
        Self {
            server_type: service.server_type(),
        }
    }

    /// Decode from a message payload
    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        let server_type = buf.read_varint_u32("server_type")?;
        Ok(Self { server_type })
    }

    /// Encode to a message payload
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(5);
        buf.write_varint(u64::from(self.server_type));
        buf.freeze()
    }

    /// The requested service, if recognized
    pub fn service(&self) -> Option<ServiceKind> {
        ServiceKind::from_server_type(self.server_type)
    }
}

// ============ Outbound payloads ============

/// `LoginQueueStatus` response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginQueueStatus {
    pub place_in_line: u64,
    pub number_of_players_in_line: u64,
}

impl LoginQueueStatus {
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(8);
        buf.write_varint(self.place_in_line);
        buf.write_varint(self.number_of_players_in_line);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        Ok(Self {
            place_in_line: buf.read_varint()?,
            number_of_players_in_line: buf.read_varint()?,
        })
    }
}

/// `QueueLoadingScreen` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLoadingScreen {
    pub region_id: u64,
}

impl QueueLoadingScreen {
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(2);
        buf.write_varint(self.region_id);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        Ok(Self {
            region_id: buf.read_varint()?,
        })
    }
}

/// `ChatBroadcast` announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatBroadcast {
    pub room_type: u32,
    pub from_player_name: String,
    pub body: String,
    pub prestige_level: u32,
}

impl ChatBroadcast {
    pub fn encode(&self) -> Bytes {
        let mut buf =
            PacketBuffer::with_capacity(self.from_player_name.len() + self.body.len() + 8);
        buf.write_varint(u64::from(self.room_type));
        buf.write_string(&self.from_player_name);
        buf.write_string(&self.body);
        buf.write_varint(u64::from(self.prestige_level));
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        Ok(Self {
            room_type: buf.read_varint_u32("room_type")?,
            from_player_name: buf.read_string()?,
            body: buf.read_string()?,
            prestige_level: buf.read_varint_u32("prestige_level")?,
        })
    }
}

/// `MarkFirstGameFrame` clock announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkFirstGameFrame {
    pub current_server_game_time: u64,
    pub current_server_game_id: u64,
    pub game_start_time: u64,
}

impl MarkFirstGameFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(24);
        buf.write_varint(self.current_server_game_time);
        buf.write_varint(self.current_server_game_id);
        buf.write_varint(self.game_start_time);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        Ok(Self {
            current_server_game_time: buf.read_varint()?,
            current_server_game_id: buf.read_varint()?,
            game_start_time: buf.read_varint()?,
        })
    }
}

/// `ServerVersion` announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub version: String,
}

impl ServerVersion {
    pub fn encode(&self) -> Bytes {
        let mut buf = PacketBuffer::with_capacity(self.version.len() + 1);
        buf.write_string(&self.version);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ReadResult<Self> {
        let mut buf = PacketBuffer::from_bytes(payload);
        Ok(Self {
            version: buf.read_string()?,
        })
    }
}
