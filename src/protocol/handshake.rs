//! Sub-service handshake router
//!
//! Handles `InitialClientHandshake`. The client handshakes separately with
//! each virtual sub-service multiplexed through the frontend:
//! - Player manager: the handshake is recorded, nothing is sent
//! - Grouping manager: the handshake is recorded and the bootstrap
//!   sequence is sent
//! - Anything else is ignored
//!
//! The legacy client requires the bootstrap order exactly as built by
//! [`ServiceRouter::bootstrap_sequence`]: loading screen before the world
//! entry data, clock and version last.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::protocol::blobs::{BlobName, BlobRepository};
use crate::protocol::dispatcher::{HandlerContext, MessageHandler};
use crate::protocol::messages::{
    game_message, grouping_message, ChatBroadcast, InboundMessage, InitialClientHandshake,
    MarkFirstGameFrame, OutboundMessage, QueueLoadingScreen, ServerVersion, ServiceKind,
    CHAT_ROOM_BROADCAST_ALL_SERVERS,
};

/// Region the loading screen is queued for
const BOOTSTRAP_REGION_ID: u64 = 0;

/// Handler for `InitialClientHandshake`
pub struct ServiceRouter {
    settings: BootstrapConfig,
    blobs: Arc<dyn BlobRepository>,
}

impl ServiceRouter {
    /// Create a new router
    pub fn new(settings: BootstrapConfig, blobs: Arc<dyn BlobRepository>) -> Self {
        Self { settings, blobs }
    }

    fn canned(&self, name: BlobName) -> Result<OutboundMessage> {
        Ok(OutboundMessage::canned(name, self.blobs.lookup(name)?))
    }

    /// Build the grouping manager bootstrap sequence
    ///
    /// Built in full before anything is sent, so a missing blob never
    /// leaves the client with half a sequence.
    pub fn bootstrap_sequence(&self, mux_channel: u16) -> Result<Vec<OutboundMessage>> {
        let settings = &self.settings;
        let mut sequence = Vec::with_capacity(8);

        let loading_screen = QueueLoadingScreen {
            region_id: BOOTSTRAP_REGION_ID,
        };
        sequence.push(OutboundMessage::message(
            mux_channel,
            game_message::QUEUE_LOADING_SCREEN,
            loading_screen.encode(),
        ));
        sequence.push(self.canned(BlobName::AchievementDatabaseDump)?);
        sequence.push(self.canned(BlobName::EntityEnterGameWorld)?);

        // Broadcasts always go out on the broadcast channel
        let chat = ChatBroadcast {
            room_type: CHAT_ROOM_BROADCAST_ALL_SERVERS,
            from_player_name: settings.chat_sender.clone(),
            body: settings.chat_message.clone(),
            prestige_level: settings.chat_prestige,
        };
        sequence.push(OutboundMessage::message(
            settings.broadcast_channel,
            grouping_message::CHAT_BROADCAST,
            chat.encode(),
        ));

        if settings.replay_recorded_frames {
            sequence.push(self.canned(BlobName::MarkFirstGameFrame)?);
            sequence.push(self.canned(BlobName::ModifyCommunityMember)?);
            sequence.push(self.canned(BlobName::QueryIsRegionAvailable)?);
            sequence.push(self.canned(BlobName::MarkFirstGameFrame2)?);
        } else {
            let clock = MarkFirstGameFrame {
                current_server_game_time: settings.current_server_time,
                current_server_game_id: settings.server_game_id,
                game_start_time: settings.game_start_time,
            };
            sequence.push(OutboundMessage::message(
                mux_channel,
                game_message::MARK_FIRST_GAME_FRAME,
                clock.encode(),
            ));

            let version = ServerVersion {
                version: settings.server_version.clone(),
            };
            sequence.push(OutboundMessage::message(
                mux_channel,
                game_message::SERVER_VERSION,
                version.encode(),
            ));

            sequence.push(self.canned(BlobName::ModifyCommunityMember)?);
            sequence.push(self.canned(BlobName::QueryIsRegionAvailable)?);
        }

        Ok(sequence)
    }
}

impl MessageHandler for ServiceRouter {
    fn handle(&self, ctx: &mut HandlerContext<'_>, message: &InboundMessage) -> Result<()> {
        let request = InitialClientHandshake::decode(&message.payload)?;
        info!(
            connection_id = ctx.connection.id,
            mux_channel = ctx.mux_channel,
            server_type = request.server_type,
            "Received InitialClientHandshake"
        );

        match request.service() {
            Some(ServiceKind::PlayerManager) => {
                ctx.connection
                    .mark_service_complete(ServiceKind::PlayerManager);
            }
            Some(ServiceKind::GroupingManager) => {
                // Recorded before any send; repeated requests replay the sequence
                ctx.connection
                    .mark_service_complete(ServiceKind::GroupingManager);
                let sequence = self.bootstrap_sequence(ctx.mux_channel)?;
                debug!(
                    connection_id = ctx.connection.id,
                    messages = sequence.len(),
                    "Sending grouping manager bootstrap"
                );
                for outbound in sequence {
                    ctx.send(outbound);
                }
            }
            None => {
                debug!(
                    connection_id = ctx.connection.id,
                    server_type = request.server_type,
                    "Ignoring handshake for unknown server type"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use crate::crypto::{SessionCipherFactory, SessionKey};
    use crate::net::connection::{CompletedServices, Connection};
    use crate::protocol::blobs::MemoryBlobStore;
    use crate::protocol::dispatcher::Diagnostic;
    use crate::protocol::messages::FrontendMessage;

    fn all_blobs() -> MemoryBlobStore {
        BlobName::ALL
            .iter()
            .enumerate()
            .fold(MemoryBlobStore::new(), |store, (i, name)| {
                store.with(*name, vec![i as u8; 4])
            })
    }

    fn test_connection() -> Connection {
        let factory = SessionCipherFactory::new(SessionKey::from_bytes([0u8; 32]));
        Connection::new(3, "127.0.0.1:4000".parse().unwrap(), factory.create())
    }

    fn request(service_type: u32) -> InboundMessage {
        let payload = InitialClientHandshake {
            server_type: service_type,
        }
        .encode();
        InboundMessage::new(FrontendMessage::InitialClientHandshake.as_u8(), 1, payload)
    }

    fn run(
        router: &ServiceRouter,
        connection: &mut Connection,
        message: &InboundMessage,
    ) -> Result<Vec<OutboundMessage>> {
        let mut sink: Vec<OutboundMessage> = Vec::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut ctx = HandlerContext::new(connection, 1, &mut sink, &mut diagnostics);
        router.handle(&mut ctx, message)?;
        assert!(diagnostics.is_empty());
        Ok(sink)
    }

    #[test]
    fn test_player_manager_sets_flag_only() {
        let router = ServiceRouter::new(BootstrapConfig::default(), Arc::new(all_blobs()));
        let mut connection = test_connection();

        let sent = run(&router, &mut connection, &request(1)).unwrap();
        assert!(sent.is_empty());
        assert_eq!(
            connection.completed_services(),
            CompletedServices::PLAYER_MANAGER
        );
    }

    #[test]
    fn test_grouping_manager_sequence_order() {
        let blobs = all_blobs();
        let router = ServiceRouter::new(BootstrapConfig::default(), Arc::new(blobs.clone()));
        let mut connection = test_connection();

        let sent = run(&router, &mut connection, &request(2)).unwrap();
        assert_eq!(
            connection.completed_services(),
            CompletedServices::GROUPING_MANAGER
        );

        let settings = BootstrapConfig::default();
        let expected = vec![
            OutboundMessage::message(
                1,
                game_message::QUEUE_LOADING_SCREEN,
                QueueLoadingScreen { region_id: 0 }.encode(),
            ),
            OutboundMessage::canned(
                BlobName::AchievementDatabaseDump,
                blobs.lookup(BlobName::AchievementDatabaseDump).unwrap(),
            ),
            OutboundMessage::canned(
                BlobName::EntityEnterGameWorld,
                blobs.lookup(BlobName::EntityEnterGameWorld).unwrap(),
            ),
            OutboundMessage::message(
                2,
                grouping_message::CHAT_BROADCAST,
                ChatBroadcast {
                    room_type: CHAT_ROOM_BROADCAST_ALL_SERVERS,
                    from_player_name: settings.chat_sender.clone(),
                    body: settings.chat_message.clone(),
                    prestige_level: 6,
                }
                .encode(),
            ),
            OutboundMessage::message(
                1,
                game_message::MARK_FIRST_GAME_FRAME,
                MarkFirstGameFrame {
                    current_server_game_time: 161351681600,
                    current_server_game_id: 1125336957151523818,
                    game_start_time: 1,
                }
                .encode(),
            ),
            OutboundMessage::message(
                1,
                game_message::SERVER_VERSION,
                ServerVersion {
                    version: "1.52.0.1700".to_string(),
                }
                .encode(),
            ),
            OutboundMessage::canned(
                BlobName::ModifyCommunityMember,
                blobs.lookup(BlobName::ModifyCommunityMember).unwrap(),
            ),
            OutboundMessage::canned(
                BlobName::QueryIsRegionAvailable,
                blobs.lookup(BlobName::QueryIsRegionAvailable).unwrap(),
            ),
        ];
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_repeated_grouping_request_replays_sequence() {
        let router = ServiceRouter::new(BootstrapConfig::default(), Arc::new(all_blobs()));
        let mut connection = test_connection();

        let first = run(&router, &mut connection, &request(2)).unwrap();
        let second = run(&router, &mut connection, &request(2)).unwrap();

        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
        assert!(connection.is_service_complete(ServiceKind::GroupingManager));
    }

    #[test]
    fn test_unknown_server_type_ignored() {
        let router = ServiceRouter::new(BootstrapConfig::default(), Arc::new(all_blobs()));
        let mut connection = test_connection();

        let sent = run(&router, &mut connection, &request(77)).unwrap();
        assert!(sent.is_empty());
        assert!(connection.completed_services().is_empty());
    }

    #[test]
    fn test_replay_recorded_frames() {
        let settings = BootstrapConfig {
            replay_recorded_frames: true,
            ..BootstrapConfig::default()
        };
        let router = ServiceRouter::new(settings, Arc::new(all_blobs()));

        let sequence = router.bootstrap_sequence(1).unwrap();
        let canned: Vec<Option<BlobName>> = sequence
            .iter()
            .map(|m| match m {
                OutboundMessage::Canned { name, .. } => Some(*name),
                OutboundMessage::Message { .. } => None,
            })
            .collect();

        assert_eq!(
            canned,
            vec![
                None,
                Some(BlobName::AchievementDatabaseDump),
                Some(BlobName::EntityEnterGameWorld),
                None,
                Some(BlobName::MarkFirstGameFrame),
                Some(BlobName::ModifyCommunityMember),
                Some(BlobName::QueryIsRegionAvailable),
                Some(BlobName::MarkFirstGameFrame2),
            ]
        );
        assert_eq!(sequence[3].mux_channel(), Some(2));
    }

    #[test]
    fn test_missing_blob_sends_nothing_but_records_handshake() {
        let blobs = MemoryBlobStore::new().with(BlobName::AchievementDatabaseDump, vec![1]);
        let router = ServiceRouter::new(BootstrapConfig::default(), Arc::new(blobs));
        let mut connection = test_connection();

        let mut sink: Vec<OutboundMessage> = Vec::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut ctx = HandlerContext::new(&mut connection, 1, &mut sink, &mut diagnostics);
        assert!(router.handle(&mut ctx, &request(2)).is_err());
        drop(ctx);

        assert!(sink.is_empty());
        assert!(connection.is_service_complete(ServiceKind::GroupingManager));
    }

    #[test]
    fn test_custom_broadcast_channel() {
        let settings = BootstrapConfig {
            broadcast_channel: 9,
            ..BootstrapConfig::default()
        };
        let router = ServiceRouter::new(settings, Arc::new(all_blobs()));
        let sequence = router.bootstrap_sequence(1).unwrap();

        assert_eq!(sequence[3].mux_channel(), Some(9));
        assert!(matches!(
            &sequence[3],
            OutboundMessage::Message { payload, .. } if payload != &Bytes::new()
        ));
    }
}
