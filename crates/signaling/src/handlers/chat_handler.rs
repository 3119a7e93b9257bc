//! Chat-Handler – Textnachrichten zwischen online Benutzern
//!
//! Chat ist reine Weiterleitung, unabhaengig von Anrufen. Nichts wird
//! gespeichert; ist das Ziel offline, bekommt der Absender `userOffline`.

use fernruf_core::types::UserId;
use fernruf_protocol::envelope::ChatRequest;
use fernruf_protocol::AusgehendeNachricht;

use crate::error::{SignalingError, SignalingResult};
use crate::handlers::absender_pruefen;
use crate::server_state::SignalingState;

/// Maximale Laenge einer Chat-Nachricht in Bytes
pub const MAX_CHAT_LAENGE: usize = 4096;

/// Verarbeitet `chat`
pub fn handle_chat(
    request: ChatRequest,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(request.from_user.as_ref(), user_id)?;
    if request.message.trim().is_empty() {
        return Err(SignalingError::fehlerhaft("Leere Chat-Nachricht"));
    }
    if request.message.len() > MAX_CHAT_LAENGE {
        return Err(SignalingError::fehlerhaft(format!(
            "Chat-Nachricht laenger als {MAX_CHAT_LAENGE} Bytes"
        )));
    }

    state.router.weiterleiten(
        user_id,
        &request.to_user,
        AusgehendeNachricht::Chat {
            from_user: user_id.clone(),
            message: request.message,
        },
    )?;
    tracing::debug!(user_id = %user_id, ziel = %request.to_user, "Chat-Nachricht weitergeleitet");
    Ok(())
}
