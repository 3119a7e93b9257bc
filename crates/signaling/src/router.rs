//! Message-Router – Stellt Envelopes an Benutzer zu
//!
//! Der Router kennt nur Benutzer-IDs. Welche Verbindungen dahinter stehen,
//! weiss der PresenceManager. Jede Verbindung hat eine begrenzte Send-Queue;
//! laeuft sie voll, wird die Verbindung geschlossen statt still Nachrichten
//! zu verlieren.

use fernruf_core::types::{UserId, VerbindungsId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::AusgehendeNachricht;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{SignalingError, SignalingResult};
use crate::presence::PresenceManager;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// WebSocket-Pfad, ueber den eine Verbindung aufgebaut wurde
///
/// Aeltere Clients oeffnen pro Benutzer einen `/list`- und einen
/// `/call`-Socket. Das Verbindungslimit pro Benutzer gilt deshalb je
/// Endpunkt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpunkt {
    /// `/ws`
    #[default]
    Standard,
    /// `/list`
    Liste,
    /// `/call`
    Anruf,
}

/// Handle auf die Send-Queue einer Verbindung
///
/// Clone teilt Queue und Schliess-Signal.
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung_id: VerbindungsId,
    pub endpunkt: Endpunkt,
    tx: mpsc::Sender<AusgehendeNachricht>,
    schliessen: CancellationToken,
}

impl ClientSender {
    /// Erstellt Sender und zugehoerige Empfangs-Queue
    pub fn neu(
        verbindung_id: VerbindungsId,
        queue_groesse: usize,
    ) -> (Self, mpsc::Receiver<AusgehendeNachricht>) {
        let (tx, rx) = mpsc::channel(queue_groesse.max(1));
        (
            Self {
                verbindung_id,
                endpunkt: Endpunkt::Standard,
                tx,
                schliessen: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Setzt den Endpunkt der Verbindung
    pub fn mit_endpunkt(mut self, endpunkt: Endpunkt) -> Self {
        self.endpunkt = endpunkt;
        self
    }

    /// Reiht eine Nachricht nicht-blockierend ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist. Eine
    /// volle Queue fuehrt zum Schliessen der Verbindung.
    pub fn senden(&self, nachricht: AusgehendeNachricht) -> bool {
        if self.schliessen.is_cancelled() {
            return false;
        }
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    verbindung = %self.verbindung_id,
                    typ = n.typ(),
                    "Send-Queue voll – Verbindung wird geschlossen"
                );
                self.schliessen.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(verbindung = %self.verbindung_id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }

    /// Fordert das Schliessen der Verbindung an
    pub fn schliessen(&self) {
        self.schliessen.cancel();
    }

    /// Wurde das Schliessen angefordert?
    pub fn ist_geschlossen(&self) -> bool {
        self.schliessen.is_cancelled()
    }

    /// Future das bei angefordertem Schliessen fertig wird
    pub fn geschlossen(&self) -> WaitForCancellationFuture<'_> {
        self.schliessen.cancelled()
    }
}

// ---------------------------------------------------------------------------
// MessageRouter
// ---------------------------------------------------------------------------

/// Zustellung von Envelopes an Benutzer
#[derive(Clone)]
pub struct MessageRouter {
    presence: PresenceManager,
    metriken: FernrufMetrics,
}

impl MessageRouter {
    /// Erstellt einen neuen Router
    pub fn neu(presence: PresenceManager, metriken: FernrufMetrics) -> Self {
        Self { presence, metriken }
    }

    /// Stellt an alle Verbindungen des Ziels zu
    ///
    /// Schlaegt fehl wenn das Ziel offline ist oder keine seiner
    /// Verbindungen die Nachricht annimmt.
    pub fn zustellen(
        &self,
        ziel: &UserId,
        nachricht: AusgehendeNachricht,
    ) -> SignalingResult<usize> {
        let typ = nachricht.typ();
        match self.presence.an_nutzer_senden(ziel, nachricht) {
            Some(n) if n > 0 => {
                self.metriken
                    .envelopes_routed_total
                    .with_label_values(&[typ])
                    .inc();
                tracing::trace!(ziel = %ziel, typ, verbindungen = n, "Envelope zugestellt");
                Ok(n)
            }
            _ => Err(SignalingError::ZielOffline(ziel.clone())),
        }
    }

    /// Leitet eine Nachricht von `absender` an `ziel` weiter
    ///
    /// Ist das Ziel nicht erreichbar, bekommt der Absender `userOffline`.
    pub fn weiterleiten(
        &self,
        absender: &UserId,
        ziel: &UserId,
        nachricht: AusgehendeNachricht,
    ) -> SignalingResult<usize> {
        let typ = nachricht.typ();
        match self.zustellen(ziel, nachricht) {
            Err(SignalingError::ZielOffline(offline)) => {
                tracing::debug!(absender = %absender, ziel = %offline, typ, "Ziel nicht erreichbar");
                self.presence.an_nutzer_senden(
                    absender,
                    AusgehendeNachricht::UserOffline {
                        to_user: offline.clone(),
                    },
                );
                Err(SignalingError::ZielOffline(offline))
            }
            andere => andere,
        }
    }

    /// Prueft ob ein Benutzer mindestens eine Verbindung hat
    pub fn ist_erreichbar(&self, user_id: &UserId) -> bool {
        self.presence.ist_online(user_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
