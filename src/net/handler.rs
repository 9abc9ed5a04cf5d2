//! Connection handler module
//!
//! Handles the lifecycle of a frontend connection:
//! - Session registration and connection limits
//! - Mux channel open/close bookkeeping
//! - Splitting data packets into messages for the dispatcher
//! - Writing dispatcher output back to the client
//! - Graceful disconnection

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{FrontlineError, NetworkError, Result};
use crate::net::connection::{Connection, ConnectionId};
use crate::net::frame::{self, MuxCommand, MuxPacket};
use crate::protocol::messages::{MessageSink, OutboundMessage};
use crate::AppState;

/// Connection handler for processing frontend connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a TCP connection
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");

        stream.set_nodelay(true)?;

        self.handle_stream(stream, addr).await
    }

    /// Handle any byte stream carrying mux packets
    pub async fn handle_stream<S>(&self, stream: S, addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = self.state.session_manager.create_session(addr)?;
        let mut connection = Connection::new(session.id, addr, self.state.ciphers.create());

        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        let writer_task = spawn_writer(writer, rx, session.id);
        let mut sink = FrameSink::new(tx, session.id);

        debug!(
            connection_id = session.id,
            address = %addr,
            "Starting connection handler"
        );

        let result = self
            .process_connection(&mut reader, &mut connection, &mut sink, &mut shutdown_rx)
            .await;

        debug!(
            connection_id = session.id,
            channels = ?connection.channels().collect::<Vec<_>>(),
            completed = ?connection.completed_services(),
            "Connection handler ending"
        );

        // Closing the queue lets the writer flush and shut down
        drop(sink);
        if let Err(e) = writer_task.await {
            trace!(connection_id = session.id, error = %e, "Writer task failed");
        }

        self.state.session_manager.remove(session.id);

        match result {
            Ok(()) => Ok(()),
            Err(FrontlineError::Network(NetworkError::ConnectionClosed)) => {
                debug!(connection_id = session.id, "Connection closed by client");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Main processing loop
    async fn process_connection<R>(
        &self,
        reader: &mut R,
        connection: &mut Connection,
        sink: &mut FrameSink,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let packet = tokio::select! {
                result = frame::read_packet(reader) => result?,
                _ = shutdown_rx.recv() => {
                    info!(connection_id = connection.id, "Closing connection for shutdown");
                    return Ok(());
                }
            };

            trace!(
                connection_id = connection.id,
                mux_channel = packet.mux_id,
                command = %packet.command,
                size = packet.body.len(),
                "Received mux packet"
            );

            match packet.command {
                MuxCommand::Connect => {
                    self.open_channel(connection, sink, packet.mux_id);
                }
                MuxCommand::ConnectWithData => {
                    self.open_channel(connection, sink, packet.mux_id);
                    self.dispatch(connection, sink, &packet);
                }
                MuxCommand::Data => {
                    if connection.open_channel(packet.mux_id) {
                        debug!(
                            connection_id = connection.id,
                            mux_channel = packet.mux_id,
                            "Data on unopened channel, opening implicitly"
                        );
                    }
                    self.dispatch(connection, sink, &packet);
                }
                MuxCommand::Disconnect => {
                    if connection.close_channel(packet.mux_id) {
                        debug!(
                            connection_id = connection.id,
                            mux_channel = packet.mux_id,
                            "Mux channel closed"
                        );
                    }
                }
                MuxCommand::ConnectAck => {
                    warn!(
                        connection_id = connection.id,
                        mux_channel = packet.mux_id,
                        "Ignoring ConnectAck sent by client"
                    );
                }
            }
        }
    }

    /// Open a mux channel and acknowledge it
    fn open_channel(&self, connection: &mut Connection, sink: &mut FrameSink, mux_channel: u16) {
        if connection.open_channel(mux_channel) {
            debug!(
                connection_id = connection.id,
                mux_channel = mux_channel,
                "Mux channel opened"
            );
        }
        sink.send_packet(&MuxPacket::control(mux_channel, MuxCommand::ConnectAck));
    }

    /// Split a data packet into messages and hand them to the dispatcher
    fn dispatch(&self, connection: &mut Connection, sink: &mut FrameSink, packet: &MuxPacket) {
        let batch = packet.messages();

        if !batch.messages.is_empty() {
            let report =
                self.state
                    .dispatcher
                    .handle(connection, packet.mux_id, &batch.messages, sink);

            if let Some(session) = self.state.session_manager.get(connection.id) {
                session.record_dispatched(batch.messages.len());
            }

            if !report.is_clean() {
                debug!(
                    connection_id = connection.id,
                    mux_channel = packet.mux_id,
                    handled = report.handled,
                    diagnostics = ?report.diagnostics,
                    "Batch dispatched with diagnostics"
                );
            }
        }

        if let Some(e) = batch.error {
            warn!(
                connection_id = connection.id,
                mux_channel = packet.mux_id,
                dispatched = batch.messages.len(),
                error = %e,
                "Discarding malformed remainder of data packet"
            );
        }
    }
}

/// Writes queued packets to the client until the queue closes
fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    connection_id: ConnectionId,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                warn!(connection_id = connection_id, error = %e, "Failed to write packet");
                return;
            }
            // Drain whatever else is ready before flushing
            while let Ok(bytes) = rx.try_recv() {
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!(connection_id = connection_id, error = %e, "Failed to write packet");
                    return;
                }
            }
            if let Err(e) = writer.flush().await {
                warn!(connection_id = connection_id, error = %e, "Failed to flush");
                return;
            }
        }

        if let Err(e) = writer.shutdown().await {
            trace!(connection_id = connection_id, error = %e, "Error during shutdown");
        }
    })
}

/// Message sink that frames outbound messages onto the connection
struct FrameSink {
    tx: mpsc::UnboundedSender<Bytes>,
    connection_id: ConnectionId,
}

impl FrameSink {
    fn new(tx: mpsc::UnboundedSender<Bytes>, connection_id: ConnectionId) -> Self {
        Self { tx, connection_id }
    }

    fn send_packet(&mut self, packet: &MuxPacket) {
        match packet.encode() {
            Ok(bytes) => self.enqueue(bytes, packet.command.name()),
            Err(e) => warn!(
                connection_id = self.connection_id,
                mux_channel = packet.mux_id,
                error = %e,
                "Failed to encode packet"
            ),
        }
    }

    fn enqueue(&mut self, bytes: Bytes, what: &str) {
        // Only fails once the writer has stopped
        if self.tx.send(bytes).is_err() {
            debug!(
                connection_id = self.connection_id,
                packet = what,
                "Writer closed, discarding outbound packet"
            );
        }
    }
}

impl MessageSink for FrameSink {
    fn send(&mut self, message: OutboundMessage) {
        trace!(
            connection_id = self.connection_id,
            message = %message.describe(),
            "Sending"
        );
        match message {
            OutboundMessage::Message {
                mux_channel,
                id,
                payload,
            } => self.send_packet(&MuxPacket::data(mux_channel, id, &payload)),
            OutboundMessage::Canned { name, bytes } => self.enqueue(bytes, name.key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    use crate::config::ServerConfig;
    use crate::crypto::SessionKey;
    use crate::net::buffer::PacketBuffer;
    use crate::net::frame::MUX_HEADER_SIZE;
    use crate::protocol::blobs::{BlobName, MemoryBlobStore};
    use crate::protocol::handshake::ServiceRouter;
    use crate::protocol::messages::{FrontendMessage, InitialClientHandshake, ServiceKind};

    fn state_with(blobs: MemoryBlobStore) -> Arc<AppState> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(AppState::new(
            ServerConfig::default(),
            SessionKey::from_bytes([1u8; 32]),
            Arc::new(blobs),
            shutdown_tx,
        ))
    }

    fn test_state() -> Arc<AppState> {
        state_with(MemoryBlobStore::new())
    }

    fn all_blobs() -> MemoryBlobStore {
        BlobName::ALL
            .iter()
            .enumerate()
            .fold(MemoryBlobStore::new(), |store, (i, &name)| {
                store.with(name, vec![0xB0 + i as u8; 4])
            })
    }

    fn write_grouping_request(body: &mut PacketBuffer) {
        let request = InitialClientHandshake::for_service(ServiceKind::GroupingManager);
        frame::write_message(
            body,
            FrontendMessage::InitialClientHandshake.as_u8(),
            &request.encode(),
        );
    }

    /// Wire bytes of one bootstrap sequence on `mux_channel`
    fn bootstrap_wire_bytes(mux_channel: u16) -> Vec<u8> {
        let config = ServerConfig::default();
        let router = ServiceRouter::new(config.bootstrap, Arc::new(all_blobs()));
        let mut wire = Vec::new();
        for outbound in router.bootstrap_sequence(mux_channel).unwrap() {
            match outbound {
                OutboundMessage::Message {
                    mux_channel,
                    id,
                    payload,
                } => wire.extend_from_slice(
                    &MuxPacket::data(mux_channel, id, &payload).encode().unwrap(),
                ),
                OutboundMessage::Canned { bytes, .. } => wire.extend_from_slice(&bytes),
            }
        }
        wire
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:5555".parse().unwrap()
    }

    async fn read_n<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_connect_is_acknowledged() {
        let state = test_state();
        let handler = ConnectionHandler::new(state.clone());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        let connect = MuxPacket::control(3, MuxCommand::Connect).encode().unwrap();
        client.write_all(&connect).await.unwrap();

        let ack = read_n(&mut client, MUX_HEADER_SIZE).await;
        let expected = MuxPacket::control(3, MuxCommand::ConnectAck).encode().unwrap();
        assert_eq!(ack, expected.to_vec());

        drop(client);
        task.await.unwrap().unwrap();
        assert_eq!(state.session_manager.count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_connection_open() {
        let handler = ConnectionHandler::new(test_state());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        let junk = MuxPacket::with_body(1, MuxCommand::Data, Bytes::from_static(&[1, 9]));
        client.write_all(&junk.encode().unwrap()).await.unwrap();

        let connect = MuxPacket::control(1, MuxCommand::Connect).encode().unwrap();
        client.write_all(&connect).await.unwrap();
        let ack = read_n(&mut client, MUX_HEADER_SIZE).await;
        assert_eq!(ack[5], MuxCommand::ConnectAck.as_u8());

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_mux_command_ends_connection() {
        let handler = ConnectionHandler::new(test_state());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        client
            .write_all(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x7F])
            .await
            .unwrap();

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_frame_sink_passes_canned_bytes_verbatim() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = FrameSink::new(tx, 1);

        sink.send(OutboundMessage::canned(
            crate::protocol::blobs::BlobName::EntityEnterGameWorld,
            Bytes::from_static(&[0xDE, 0xAD]),
        ));
        sink.send(OutboundMessage::message(2, 9, Bytes::from_static(&[0x01])));

        assert_eq!(rx.recv().await.unwrap().as_ref(), &[0xDE, 0xAD]);

        let framed = rx.recv().await.unwrap();
        let mut body = PacketBuffer::new();
        frame::write_message(&mut body, 9, &[0x01]);
        let expected = MuxPacket::with_body(2, MuxCommand::Data, body.freeze())
            .encode()
            .unwrap();
        assert_eq!(framed, expected);
    }

    #[tokio::test]
    async fn test_messages_before_truncated_trailer_are_dispatched() {
        let handler = ConnectionHandler::new(state_with(all_blobs()));
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        let mut body = PacketBuffer::new();
        write_grouping_request(&mut body);
        body.write_bytes(&[9, 50, 1]);
        let packet = MuxPacket::with_body(1, MuxCommand::Data, body.freeze());
        client.write_all(&packet.encode().unwrap()).await.unwrap();

        let expected = bootstrap_wire_bytes(1);
        let received = read_n(&mut client, expected.len()).await;
        assert_eq!(received, expected);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_reader_receives_every_packet() {
        const REQUESTS: usize = 40;

        let handler = ConnectionHandler::new(state_with(all_blobs()));
        let (mut client, server) = tokio::io::duplex(256);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        let mut body = PacketBuffer::new();
        for _ in 0..REQUESTS {
            write_grouping_request(&mut body);
        }
        let packet = MuxPacket::with_body(1, MuxCommand::Data, body.freeze());
        client.write_all(&packet.encode().unwrap()).await.unwrap();

        let expected = bootstrap_wire_bytes(1).repeat(REQUESTS);
        let mut received = Vec::with_capacity(expected.len());
        let mut chunk = [0u8; 64];
        while received.len() < expected.len() {
            tokio::task::yield_now().await;
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream ended after {} bytes", received.len());
            received.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(received, expected);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connection() {
        let state = test_state();
        let handler = ConnectionHandler::new(state.clone());
        let (mut client, server) = tokio::io::duplex(4096);

        let task = tokio::spawn(async move { handler.handle_stream(server, addr()).await });

        // The ack proves the handler is running and subscribed
        let connect = MuxPacket::control(1, MuxCommand::Connect).encode().unwrap();
        client.write_all(&connect).await.unwrap();
        read_n(&mut client, MUX_HEADER_SIZE).await;

        state.shutdown_tx.send(()).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(state.session_manager.count(), 0);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
