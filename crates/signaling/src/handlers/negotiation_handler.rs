//! Negotiation-Handler – Offer, Answer und Kandidaten
//!
//! SDP-Payloads werden nicht angefasst, nur weitergereicht.

use fernruf_core::types::UserId;
use fernruf_protocol::envelope::{AnswerRequest, CandidateRequest, OfferRequest};

use crate::error::{SignalingError, SignalingResult};
use crate::handlers::absender_pruefen;
use crate::server_state::SignalingState;

/// Verarbeitet `offer`
pub fn handle_offer(
    request: OfferRequest,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(request.from_user.as_ref(), user_id)?;
    state
        .sessions
        .angebot(user_id, &request.to_user, request.session_id, request.offer)
}

/// Verarbeitet `answer`
pub fn handle_answer(
    request: AnswerRequest,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(request.from_user.as_ref(), user_id)?;
    state
        .sessions
        .antwort(user_id, &request.to_user, request.session_id, request.answer)
}

/// Verarbeitet `candidate`
pub fn handle_candidate(
    request: CandidateRequest,
    user_id: &UserId,
    state: &SignalingState,
) -> SignalingResult<()> {
    absender_pruefen(request.from_user.as_ref(), user_id)?;
    if request.candidate.id.is_empty() {
        return Err(SignalingError::fehlerhaft("Leerer Kandidat"));
    }
    let status = state.sessions.kandidat(
        user_id,
        &request.to_user,
        request.session_id,
        request.candidate,
    )?;
    tracing::trace!(user_id = %user_id, ziel = %request.to_user, ?status, "Kandidat verarbeitet");
    Ok(())
}
