//! Client credentials handler
//!
//! Handles the `ClientCredentials` exchange:
//! 1. Configure this connection's decryptor with the client IV
//! 2. Decrypt the session token
//! 3. Answer with either a login queue status or the canned
//!    encryption-changed packet
//!
//! A token that fails to decrypt is logged and reported, but the response
//! is still sent. Exactly one response is emitted per credentials message.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::config::FrontendConfig;
use crate::error::{CryptoError, Result};
use crate::protocol::blobs::{BlobName, BlobRepository};
use crate::protocol::dispatcher::{Diagnostic, HandlerContext, MessageHandler};
use crate::protocol::messages::{
    ClientCredentials, FrontendMessage, InboundMessage, LoginQueueStatus, OutboundMessage,
};

/// Handler for `ClientCredentials`
pub struct CredentialHandler {
    settings: FrontendConfig,
    blobs: Arc<dyn BlobRepository>,
}

impl CredentialHandler {
    /// Create a new credentials handler
    pub fn new(settings: FrontendConfig, blobs: Arc<dyn BlobRepository>) -> Self {
        Self { settings, blobs }
    }

    /// Set the IV and decrypt the token with the connection's own decryptor
    fn decrypt_token(
        ctx: &mut HandlerContext<'_>,
        credentials: &ClientCredentials,
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        let decryptor = ctx.connection.decryptor_mut();
        decryptor.set_iv(&credentials.iv)?;
        decryptor.decrypt_token(&credentials.encrypted_token)
    }
}

impl MessageHandler for CredentialHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, message: &InboundMessage) -> Result<()> {
        info!(
            connection_id = ctx.connection.id,
            mux_channel = ctx.mux_channel,
            "Received ClientCredentials"
        );
        let credentials = ClientCredentials::decode(&message.payload)?;
        trace!(
            iv_len = credentials.iv.len(),
            token_len = credentials.encrypted_token.len(),
            "Decoded credentials"
        );

        match Self::decrypt_token(ctx, &credentials) {
            Ok(token) => {
                debug!(
                    connection_id = ctx.connection.id,
                    token_len = token.len(),
                    "Session token decrypted"
                );
            }
            Err(error) => {
                // The response is still sent
                warn!(
                    connection_id = ctx.connection.id,
                    error = %error,
                    "Failed to decrypt session token"
                );
                ctx.report(Diagnostic::DecryptionFailed { error });
            }
        }

        if self.settings.simulate_queue {
            info!(
                connection_id = ctx.connection.id,
                place_in_line = self.settings.place_in_line,
                number_in_line = self.settings.number_in_line,
                "Responding with LoginQueueStatus"
            );
            let status = LoginQueueStatus {
                place_in_line: self.settings.place_in_line,
                number_of_players_in_line: self.settings.number_in_line,
            };
            ctx.reply(FrontendMessage::LoginQueueStatus.as_u8(), status.encode());
        } else {
            // The field-built SessionEncryptionChanged layout is rejected by
            // the legacy client, so the recorded packet is replayed instead
            info!(
                connection_id = ctx.connection.id,
                "Responding with SessionEncryptionChanged"
            );
            let name = BlobName::SessionEncryptionChanged;
            let bytes = self.blobs.lookup(name)?;
            ctx.send(OutboundMessage::canned(name, bytes));
        }

        Ok(())
    }
}
