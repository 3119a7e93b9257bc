//! Lifecycle-Manager – Anmeldung und Trennung von Verbindungen
//!
//! Verbindet Presence und Sessions: Geht ein Benutzer offline, weil seine
//! letzte Verbindung schliesst, werden alle seine laufenden Anrufe beendet.

use fernruf_core::types::{UserId, VerbindungsId};

use crate::error::SignalingResult;
use crate::presence::{Abmeldung, PresenceManager, Registrierung};
use crate::router::ClientSender;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct LifecycleManager {
    presence: PresenceManager,
    sessions: SessionManager,
}

impl LifecycleManager {
    pub fn neu(presence: PresenceManager, sessions: SessionManager) -> Self {
        Self { presence, sessions }
    }

    /// Meldet eine Verbindung unter einer Benutzer-ID an
    pub fn anmelden(
        &self,
        user_id: UserId,
        sender: &ClientSender,
    ) -> SignalingResult<Registrierung> {
        self.presence.registrieren(user_id, sender.clone())
    }

    /// Raeumt nach dem Schliessen einer Verbindung auf
    ///
    /// Idempotent. Mehrfacher Aufruf fuer dieselbe Verbindung beendet
    /// keine weiteren Anrufe.
    pub fn getrennt(&self, verbindung_id: VerbindungsId) -> Option<Abmeldung> {
        let abmeldung = self.presence.abmelden(verbindung_id)?;
        if abmeldung.offline {
            self.sessions.nutzer_getrennt(&abmeldung.user_id);
        }
        Some(abmeldung)
    }
}
