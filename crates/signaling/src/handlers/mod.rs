//! Handler fuer alle Client-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig
//! und hat Zugriff auf den gemeinsamen SignalingState. Fehler gehen als
//! `SignalingError` an den Dispatcher zurueck, der daraus die Diagnose
//! fuer den Absender macht.

pub mod call_handler;
pub mod chat_handler;
pub mod negotiation_handler;
pub mod presence_handler;

use fernruf_core::types::UserId;

use crate::error::{SignalingError, SignalingResult};

/// Prueft ein optional mitgesendetes Absenderfeld gegen die Anmeldung
///
/// Clients duerfen `fromUser`/`callFrom` weglassen; wenn sie es senden,
/// muss es der angemeldeten Identitaet entsprechen.
pub(crate) fn absender_pruefen(
    angegeben: Option<&UserId>,
    angemeldet: &UserId,
) -> SignalingResult<()> {
    match angegeben {
        Some(angegeben) if angegeben != angemeldet => Err(SignalingError::nicht_berechtigt(
            format!("Absender {angegeben} passt nicht zur Anmeldung als {angemeldet}"),
        )),
        _ => Ok(()),
    }
}
