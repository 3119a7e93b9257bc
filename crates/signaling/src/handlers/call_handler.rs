//! Call-Handler – Anruf starten, annehmen, ablehnen, beenden

use fernruf_core::types::UserId;
use fernruf_protocol::envelope::{CallRequest, SessionAdresse};

use crate::error::SignalingResult;
use crate::handlers::absender_pruefen;
use crate::server_state::SignalingState;

/// Verarbeitet `call`
pub fn handle_call(
    request: CallRequest,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(request.call_from.as_ref(), user_id)?;
    state.sessions.anrufen(user_id, &request.call_to)?;
    Ok(())
}

/// Verarbeitet `callAccepted`
pub fn handle_call_accepted(
    adresse: SessionAdresse,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(adresse.from_user.as_ref(), user_id)?;
    state
        .sessions
        .annehmen(user_id, &adresse.to_user, adresse.session_id)
}

/// Verarbeitet `callRejected`
pub fn handle_call_rejected(
    adresse: SessionAdresse,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(adresse.from_user.as_ref(), user_id)?;
    state
        .sessions
        .ablehnen(user_id, &adresse.to_user, adresse.session_id)
}

/// Verarbeitet `endCall`
pub fn handle_end_call(
    adresse: SessionAdresse,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(adresse.from_user.as_ref(), user_id)?;
    state
        .sessions
        .beenden(user_id, &adresse.to_user, adresse.session_id)
}
