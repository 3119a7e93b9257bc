//! Presence-Handler – Anmeldung einer Verbindung (`addUser`)

use fernruf_core::types::UserId;
use fernruf_protocol::envelope::AddUserRequest;
use fernruf_protocol::AusgehendeNachricht;

use crate::dispatcher::DispatcherContext;
use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Verarbeitet `addUser`
pub fn handle_add_user(
    request: AddUserRequest,
    ctx: &mut DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<()> {
    anmelden(request.user_id, ctx, state)
}

/// Bindet die Verbindung an eine Benutzer-ID
///
/// Wird auch fuer die Anmeldung per `?user=` beim Verbindungsaufbau benutzt.
pub fn anmelden(
    user_id: UserId,
    ctx: &mut DispatcherContext,
    state: &SignalingState,
) -> SignalingResult<()> {
    let registrierung = state.lifecycle.anmelden(user_id.clone(), &ctx.sender)?;
    if registrierung.bereits_angemeldet {
        // Doppeltes addUser: aktuelle Liste erneut zustellen
        ctx.sender.senden(AusgehendeNachricht::UserList {
            users: state.presence.roster(),
        });
        return Ok(());
    }

    tracing::debug!(
        user_id = %user_id,
        peer = %ctx.peer_addr,
        verbindung = %ctx.sender.verbindung_id,
        neu_online = registrierung.neu_online,
        "Verbindung angemeldet"
    );
    ctx.user_id = Some(user_id);
    Ok(())
}
