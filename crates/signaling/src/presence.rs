//! Presence-Manager – Wer ist online, ueber welche Verbindungen?
//!
//! Haelt den ephemeren Zustand aller angemeldeten Verbindungen und
//! verteilt die Benutzerliste (`userList`) bei jeder Aenderung an alle.
//!
//! ## Invarianten
//! - Ein Benutzer ist genau dann online, wenn er mindestens eine
//!   angemeldete Verbindung hat
//! - Eine Verbindung gehoert zu hoechstens einem Benutzer
//! - Zustellungen an denselben Benutzer laufen unter dem Schreib-Lock
//!   seines Eintrags und behalten so ihre Reihenfolge

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fernruf_core::types::{UserId, VerbindungsId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::{AusgehendeNachricht, FehlerCode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{SignalingError, SignalingResult};
use crate::router::ClientSender;

// ---------------------------------------------------------------------------
// Presence-Events
// ---------------------------------------------------------------------------

/// Events die der PresenceManager versendet
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// Erste Verbindung eines Benutzers wurde angemeldet
    NutzerOnline { user_id: UserId },
    /// Letzte Verbindung eines Benutzers wurde geschlossen
    NutzerOffline { user_id: UserId },
    /// Aeltere Verbindung wurde durch eine neue Anmeldung verdraengt
    VerbindungAbgetrennt {
        user_id: UserId,
        verbindung_id: VerbindungsId,
    },
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Verhalten wenn sich ein Benutzer ueber das Limit hinaus anmeldet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoppelAnmeldung {
    /// Aelteste Verbindung wird getrennt, die neue gewinnt
    #[default]
    Abtrennen,
    /// Neue Anmeldung wird mit DUPLICATE_REGISTRATION abgelehnt
    Ablehnen,
}

/// Ergebnis einer erfolgreichen Anmeldung
#[derive(Debug)]
pub struct Registrierung {
    /// Benutzer war vorher offline
    pub neu_online: bool,
    /// Verbindung war bereits unter diesem Benutzer angemeldet
    pub bereits_angemeldet: bool,
    /// Verdraengte Verbindungen (bereits benachrichtigt und geschlossen)
    pub abgetrennt: Vec<VerbindungsId>,
}

/// Ergebnis einer Abmeldung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abmeldung {
    pub user_id: UserId,
    /// Das war die letzte Verbindung des Benutzers
    pub offline: bool,
}

// ---------------------------------------------------------------------------
// PresenceManager
// ---------------------------------------------------------------------------

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

/// Verwaltet den Online-Status aller Benutzer
///
/// Thread-safe via Arc + DashMap. Clone des Managers teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceManager {
    inner: Arc<PresenceManagerInner>,
}

struct PresenceManagerInner {
    /// Benutzer -> angemeldete Verbindungen (aelteste zuerst)
    nutzer: DashMap<UserId, Vec<ClientSender>>,
    /// Verbindung -> Benutzer
    verbindungen: DashMap<VerbindungsId, UserId>,
    /// Serialisiert Roster-Snapshots mit ihrer Verteilung
    roster_sperre: Mutex<()>,
    max_pro_nutzer: usize,
    politik: DoppelAnmeldung,
    event_tx: broadcast::Sender<PresenceEvent>,
    metriken: FernrufMetrics,
}

impl PresenceManager {
    /// Erstellt einen neuen PresenceManager
    pub fn neu(
        max_pro_nutzer: usize,
        politik: DoppelAnmeldung,
        metriken: FernrufMetrics,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(PresenceManagerInner {
                nutzer: DashMap::new(),
                verbindungen: DashMap::new(),
                roster_sperre: Mutex::new(()),
                max_pro_nutzer: max_pro_nutzer.max(1),
                politik,
                event_tx,
                metriken,
            }),
        }
    }

    /// Meldet eine Verbindung unter einer Benutzer-ID an
    ///
    /// Erneutes Anmelden unter derselben ID ist ein No-Op. Eine Verbindung
    /// die schon einem anderen Benutzer gehoert, wird abgewiesen.
    pub fn registrieren(
        &self,
        user_id: UserId,
        sender: ClientSender,
    ) -> SignalingResult<Registrierung> {
        let verbindung_id = sender.verbindung_id;

        let bisher = self
            .inner
            .verbindungen
            .get(&verbindung_id)
            .map(|e| e.value().clone());
        if let Some(bisher) = bisher {
            if bisher == user_id {
                return Ok(Registrierung {
                    neu_online: false,
                    bereits_angemeldet: true,
                    abgetrennt: Vec::new(),
                });
            }
            return Err(SignalingError::nicht_berechtigt(format!(
                "Verbindung ist bereits als {bisher} angemeldet"
            )));
        }

        let mut verdraengt: Vec<ClientSender> = Vec::new();
        let neu_online = {
            let mut eintrag = self.inner.nutzer.entry(user_id.clone()).or_default();
            let neu_online = eintrag.is_empty();

            // Limit gilt je Endpunkt (`/list` und `/call` zaehlen getrennt)
            let endpunkt = sender.endpunkt;
            let gleiche = eintrag.iter().filter(|s| s.endpunkt == endpunkt).count();
            if gleiche >= self.inner.max_pro_nutzer {
                match self.inner.politik {
                    DoppelAnmeldung::Ablehnen => {
                        return Err(SignalingError::DoppelteAnmeldung(user_id));
                    }
                    DoppelAnmeldung::Abtrennen => {
                        // Aelteste Verbindungen desselben Endpunkts zuerst
                        let mut ueberschuss = gleiche + 1 - self.inner.max_pro_nutzer;
                        let mut i = 0;
                        while ueberschuss > 0 && i < eintrag.len() {
                            if eintrag[i].endpunkt == endpunkt {
                                verdraengt.push(eintrag.remove(i));
                                ueberschuss -= 1;
                            } else {
                                i += 1;
                            }
                        }
                    }
                }
            }

            eintrag.push(sender);
            self.inner
                .verbindungen
                .insert(verbindung_id, user_id.clone());
            for alt in &verdraengt {
                self.inner.verbindungen.remove(&alt.verbindung_id);
            }
            neu_online
        };

        for alt in &verdraengt {
            alt.senden(AusgehendeNachricht::fehler(
                FehlerCode::DuplicateRegistration,
                format!("{user_id} hat sich ueber eine neue Verbindung angemeldet"),
            ));
            alt.schliessen();
            tracing::info!(
                user_id = %user_id,
                verbindung = %alt.verbindung_id,
                "Aeltere Verbindung verdraengt"
            );
            let _ = self.inner.event_tx.send(PresenceEvent::VerbindungAbgetrennt {
                user_id: user_id.clone(),
                verbindung_id: alt.verbindung_id,
            });
        }

        if neu_online {
            tracing::info!(user_id = %user_id, verbindung = %verbindung_id, "Benutzer online");
            let _ = self.inner.event_tx.send(PresenceEvent::NutzerOnline {
                user_id: user_id.clone(),
            });
        } else {
            tracing::debug!(user_id = %user_id, verbindung = %verbindung_id, "Weitere Verbindung angemeldet");
        }

        self.inner
            .metriken
            .online_users
            .set(self.inner.nutzer.len() as i64);
        self.roster_verteilen();

        Ok(Registrierung {
            neu_online,
            bereits_angemeldet: false,
            abgetrennt: verdraengt.iter().map(|s| s.verbindung_id).collect(),
        })
    }

    /// Entfernt eine Verbindung
    ///
    /// Idempotent: unbekannte oder bereits entfernte Verbindungen liefern `None`.
    pub fn abmelden(&self, verbindung_id: VerbindungsId) -> Option<Abmeldung> {
        let (_, user_id) = self.inner.verbindungen.remove(&verbindung_id)?;

        let mut offline = false;
        if let Entry::Occupied(mut eintrag) = self.inner.nutzer.entry(user_id.clone()) {
            eintrag
                .get_mut()
                .retain(|s| s.verbindung_id != verbindung_id);
            if eintrag.get().is_empty() {
                eintrag.remove();
                offline = true;
            }
        }

        if offline {
            tracing::info!(user_id = %user_id, verbindung = %verbindung_id, "Benutzer offline");
            let _ = self.inner.event_tx.send(PresenceEvent::NutzerOffline {
                user_id: user_id.clone(),
            });
            self.inner
                .metriken
                .online_users
                .set(self.inner.nutzer.len() as i64);
            self.roster_verteilen();
        } else {
            tracing::debug!(user_id = %user_id, verbindung = %verbindung_id, "Verbindung abgemeldet");
        }

        Some(Abmeldung { user_id, offline })
    }

    /// Alle angemeldeten Verbindungen eines Benutzers
    pub fn nachschlagen(&self, user_id: &UserId) -> Vec<ClientSender> {
        self.inner
            .nutzer
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Sortierte Liste aller online Benutzer
    pub fn roster(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.inner.nutzer.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// Stellt eine Nachricht an alle Verbindungen eines Benutzers zu
    ///
    /// `None` wenn der Benutzer offline ist, sonst die Anzahl der
    /// Verbindungen die die Nachricht angenommen haben.
    pub fn an_nutzer_senden(
        &self,
        user_id: &UserId,
        nachricht: AusgehendeNachricht,
    ) -> Option<usize> {
        // Schreib-Lock: haelt parallele Zustellungen an denselben Benutzer auseinander
        let eintrag = self.inner.nutzer.get_mut(user_id)?;
        Some(
            eintrag
                .value()
                .iter()
                .filter(|s| s.senden(nachricht.clone()))
                .count(),
        )
    }

    /// Schickt die aktuelle Benutzerliste an jede angemeldete Verbindung
    pub fn roster_verteilen(&self) {
        let _sperre = self.inner.roster_sperre.lock();
        let nachricht = AusgehendeNachricht::UserList {
            users: self.roster(),
        };
        let mut gesendet = 0usize;
        for eintrag in self.inner.nutzer.iter() {
            for sender in eintrag.value() {
                if sender.senden(nachricht.clone()) {
                    gesendet += 1;
                }
            }
        }
        tracing::trace!(verbindungen = gesendet, "Benutzerliste verteilt");
    }

    /// Benutzer hinter einer Verbindung
    pub fn nutzer_von(&self, verbindung_id: VerbindungsId) -> Option<UserId> {
        self.inner
            .verbindungen
            .get(&verbindung_id)
            .map(|e| e.value().clone())
    }

    /// Prueft ob ein Benutzer online ist
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.nutzer.contains_key(user_id)
    }

    /// Anzahl online Benutzer
    pub fn online_anzahl(&self) -> usize {
        self.inner.nutzer.len()
    }

    /// Anzahl angemeldeter Verbindungen
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }

    /// Abonniert Presence-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.event_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
