//! Mux packet framing
//!
//! Every packet on the wire carries a 6-byte header:
//!
//! ```text
//! +----------+-------------+---------+
//! | mux_id   | body_len    | command |
//! | u16 LE   | u24 LE      | u8      |
//! +----------+-------------+---------+
//! ```
//!
//! `Data` and `ConnectWithData` bodies hold a sequence of messages, each
//! encoded as `varint id, varint length, payload`.

use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FrontlineError, NetworkError, ProtocolError, Result};
use crate::net::buffer::PacketBuffer;
use crate::protocol::messages::InboundMessage;

/// Size of the mux header in bytes
pub const MUX_HEADER_SIZE: usize = 6;

/// Maximum body size (1 MiB)
pub const MAX_PACKET_SIZE: usize = 1 << 20;

/// Mux commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MuxCommand {
    /// Open a channel
    Connect = 1,
    /// Channel opened
    ConnectAck = 2,
    /// Close a channel
    Disconnect = 3,
    /// Open a channel and deliver messages
    ConnectWithData = 4,
    /// Deliver messages on a channel
    Data = 5,
}

impl MuxCommand {
    /// Convert a u8 to a MuxCommand
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnectAck),
            3 => Some(Self::Disconnect),
            4 => Some(Self::ConnectWithData),
            5 => Some(Self::Data),
            _ => None,
        }
    }

    /// Get the command value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the name of this command
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::ConnectAck => "ConnectAck",
            Self::Disconnect => "Disconnect",
            Self::ConnectWithData => "ConnectWithData",
            Self::Data => "Data",
        }
    }

    /// Whether packets with this command carry messages
    pub fn carries_messages(&self) -> bool {
        matches!(self, Self::Data | Self::ConnectWithData)
    }
}

impl fmt::Display for MuxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}

/// One mux packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxPacket {
    /// Mux channel
    pub mux_id: u16,
    /// Mux command
    pub command: MuxCommand,
    /// Packet body
    pub body: Bytes,
}

impl MuxPacket {
    /// Create a control packet with an empty body
    pub fn control(mux_id: u16, command: MuxCommand) -> Self {
        Self {
            mux_id,
            command,
            body: Bytes::new(),
        }
    }

    /// Create a data packet carrying a single message
    pub fn data(mux_id: u16, id: u8, payload: &[u8]) -> Self {
        let mut body = PacketBuffer::with_capacity(payload.len() + 4);
        write_message(&mut body, id, payload);
        Self {
            mux_id,
            command: MuxCommand::Data,
            body: body.freeze(),
        }
    }

    /// Create a data packet from already encoded messages
    pub fn with_body(mux_id: u16, command: MuxCommand, body: Bytes) -> Self {
        Self {
            mux_id,
            command,
            body,
        }
    }

    /// Encode the packet with its header
    pub fn encode(&self) -> Result<Bytes> {
        if self.body.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: self.body.len(),
                max: MAX_PACKET_SIZE,
            }
            .into());
        }
        let mut buf = PacketBuffer::with_capacity(MUX_HEADER_SIZE + self.body.len());
        buf.write_ushort_le(self.mux_id);
        buf.write_uint24_le(self.body.len() as u32);
        buf.write_ubyte(self.command.as_u8());
        buf.write_bytes(&self.body);
        Ok(buf.freeze())
    }

    /// Split the body into inbound messages
    ///
    /// Messages decoded before a malformed one are kept; the rest of the
    /// body is abandoned and the error returned alongside them.
    pub fn messages(&self) -> MessageBatch {
        let mut buf = PacketBuffer::from_bytes(&self.body);
        let mut batch = MessageBatch::default();
        while buf.has_remaining() {
            match read_message(&mut buf, self.mux_id) {
                Ok(message) => batch.messages.push(message),
                Err(e) => {
                    batch.error = Some(e);
                    break;
                }
            }
        }
        batch
    }
}

/// Messages split from one data body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBatch {
    /// Messages decoded in order
    pub messages: Vec<InboundMessage>,
    /// Error that cut the body short
    pub error: Option<ProtocolError>,
}

fn read_message(
    buf: &mut PacketBuffer,
    mux_channel: u16,
) -> std::result::Result<InboundMessage, ProtocolError> {
    let id = buf.read_varint()?;
    let id = u8::try_from(id).map_err(|_| ProtocolError::ValueOutOfRange {
        field: "message_id",
        value: id,
    })?;
    let payload = buf.read_prefixed_bytes()?;
    Ok(InboundMessage {
        id,
        mux_channel,
        payload,
    })
}

/// Append one message to a data body
pub fn write_message(body: &mut PacketBuffer, id: u8, payload: &[u8]) {
    body.write_varint(u64::from(id));
    body.write_prefixed_bytes(payload);
}

/// Parse a mux header
pub fn decode_header(
    header: &[u8; MUX_HEADER_SIZE],
) -> std::result::Result<(u16, usize, MuxCommand), ProtocolError> {
    let mut buf = PacketBuffer::from_bytes(header);
    let mux_id = buf.read_ushort_le()?;
    let body_len = buf.read_uint24_le()? as usize;
    let raw_command = buf.read_ubyte()?;
    let command =
        MuxCommand::from_u8(raw_command).ok_or(ProtocolError::InvalidMuxCommand(raw_command))?;
    if body_len > MAX_PACKET_SIZE {
        return Err(ProtocolError::PacketTooLarge {
            size: body_len,
            max: MAX_PACKET_SIZE,
        });
    }
    Ok((mux_id, body_len, command))
}

/// Read one mux packet from a stream
///
/// A clean end of stream before a header is `ConnectionClosed`.
pub async fn read_packet<R>(reader: &mut R) -> Result<MuxPacket>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MUX_HEADER_SIZE];
    reader
        .read_exact(&mut header)
        .await
        .map_err(map_read_error)?;

    let (mux_id, body_len, command) = decode_header(&header)?;

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await.map_err(map_read_error)?;

    Ok(MuxPacket {
        mux_id,
        command,
        body: Bytes::from(body),
    })
}

fn map_read_error(e: std::io::Error) -> FrontlineError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrontlineError::Network(NetworkError::ConnectionClosed)
    } else {
        FrontlineError::Io(e)
    }
}
