//! Session-Manager – Zustandsautomat fuer Anrufe
//!
//! ## Zustaende
//! ```text
//! RINGING --callAccepted--> ACCEPTED --offer--> NEGOTIATING --answer--> ACTIVE
//!    |                          |                    |                     |
//!    +-- callRejected -> REJECTED                    |                     |
//!    +-- Klingel-Timeout ---+-- Verhandlungs-Timeout +--> TIMED_OUT        |
//!    +-- endCall / Trennung ------------------------------------------+--> ENDED
//! ```
//!
//! ## Nebenlaeufigkeit
//! - Jede Session hat einen eigenen Mutex; Ereignisse derselben Session
//!   werden nacheinander angewendet
//! - `paare` haelt pro ungeordnetem Benutzerpaar hoechstens eine
//!   nicht-terminale Session
//! - Lock-Reihenfolge: Session vor `paare`. Ein Session-Lock wird nie
//!   unter einem Map-Guard genommen (Arc vorher klonen)
//!
//! ## Fehlersemantik
//! Nicht-terminale Uebergaenge aendern den Zustand erst, nachdem die
//! zugehoerige Nachricht zugestellt wurde. Terminale Uebergaenge (Ablehnen,
//! Auflegen, Trennung, Timeout) werden auch dann vollzogen, wenn die
//! Gegenseite nicht mehr erreichbar ist.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fernruf_core::types::{SessionId, UserId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::{AusgehendeNachricht, IceKandidat};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::value::RawValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{SignalingError, SignalingResult};
use crate::negotiation::{
    KandidatStatus, KandidatenPuffer, NegotiationCoordinator, Richtung, Strecke,
};
use crate::router::MessageRouter;

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Zustand eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionZustand {
    Klingelt,
    Angenommen,
    Verhandlung,
    Aktiv,
    Beendet,
    Abgelehnt,
    ZeitUeberschritten,
}

impl SessionZustand {
    /// Terminale Zustaende nehmen keine Ereignisse mehr an
    pub fn ist_terminal(self) -> bool {
        matches!(
            self,
            SessionZustand::Beendet | SessionZustand::Abgelehnt | SessionZustand::ZeitUeberschritten
        )
    }

    /// Label fuer Logs und Metriken
    pub fn als_str(self) -> &'static str {
        match self {
            SessionZustand::Klingelt => "ringing",
            SessionZustand::Angenommen => "accepted",
            SessionZustand::Verhandlung => "negotiating",
            SessionZustand::Aktiv => "active",
            SessionZustand::Beendet => "ended",
            SessionZustand::Abgelehnt => "rejected",
            SessionZustand::ZeitUeberschritten => "timed_out",
        }
    }
}

impl std::fmt::Display for SessionZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Ein Anruf zwischen zwei Benutzern
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub anrufer: UserId,
    pub angerufener: UserId,
    pub zustand: SessionZustand,
    pub erstellt: DateTime<Utc>,
    pub letzte_aktivitaet: DateTime<Utc>,
    kandidaten: KandidatenPuffer,
    /// Laufender Klingel- oder Verhandlungs-Timer
    timer: Option<CancellationToken>,
    /// Monotoner Startzeitpunkt fuer die Aufbaudauer
    gestartet: Instant,
}

impl Session {
    fn neu(anrufer: UserId, angerufener: UserId) -> Self {
        let jetzt = Utc::now();
        Self {
            id: SessionId::new(),
            anrufer,
            angerufener,
            zustand: SessionZustand::Klingelt,
            erstellt: jetzt,
            letzte_aktivitaet: jetzt,
            kandidaten: KandidatenPuffer::default(),
            timer: None,
            gestartet: Instant::now(),
        }
    }

    /// Gegenueber eines Teilnehmers
    pub fn gegenueber(&self, user_id: &UserId) -> Option<&UserId> {
        if *user_id == self.anrufer {
            Some(&self.angerufener)
        } else if *user_id == self.angerufener {
            Some(&self.anrufer)
        } else {
            None
        }
    }

    fn beruehren(&mut self) {
        self.letzte_aktivitaet = Utc::now();
    }
}

/// Schnappschuss einer Session fuer Abfragen
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub anrufer: UserId,
    pub angerufener: UserId,
    pub zustand: SessionZustand,
    pub erstellt: DateTime<Utc>,
    pub letzte_aktivitaet: DateTime<Utc>,
    pub wartende_kandidaten: usize,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            anrufer: s.anrufer.clone(),
            angerufener: s.angerufener.clone(),
            zustand: s.zustand,
            erstellt: s.erstellt,
            letzte_aktivitaet: s.letzte_aktivitaet,
            wartende_kandidaten: s.kandidaten.gesamt_wartend(),
        }
    }
}

/// Ungeordnetes Benutzerpaar
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PaarSchluessel(UserId, UserId);

impl PaarSchluessel {
    fn neu(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }

    fn enthaelt(&self, user_id: &UserId) -> bool {
        self.0 == *user_id || self.1 == *user_id
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Zeitgrenzen des Zustandsautomaten
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// RINGING -> TIMED_OUT
    pub klingel_timeout: Duration,
    /// ACCEPTED/NEGOTIATING -> TIMED_OUT
    pub verhandlungs_timeout: Duration,
    /// Terminale Sessions bleiben so lange abfragbar
    pub aufraeum_verzoegerung: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            klingel_timeout: Duration::from_secs(30),
            verhandlungs_timeout: Duration::from_secs(30),
            aufraeum_verzoegerung: Duration::from_secs(60),
        }
    }
}

/// Verwaltet alle Anrufe
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    /// Nicht-terminale Session pro Benutzerpaar
    paare: DashMap<PaarSchluessel, SessionId>,
    router: MessageRouter,
    verhandlung: NegotiationCoordinator,
    config: SessionConfig,
    metriken: FernrufMetrics,
}

impl SessionManager {
    pub fn neu(
        router: MessageRouter,
        verhandlung: NegotiationCoordinator,
        config: SessionConfig,
        metriken: FernrufMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: DashMap::new(),
                paare: DashMap::new(),
                router,
                verhandlung,
                config,
                metriken,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Ereignisse
    // -----------------------------------------------------------------------

    /// Startet einen Anruf und laesst beim Angerufenen klingeln
    pub fn anrufen(&self, anrufer: &UserId, angerufener: &UserId) -> SignalingResult<SessionId> {
        if anrufer == angerufener {
            return Err(SignalingError::fehlerhaft("Anruf an sich selbst"));
        }

        let session = Arc::new(Mutex::new(Session::neu(anrufer.clone(), angerufener.clone())));
        let mut guard = session.lock();
        let id = guard.id;
        let schluessel = PaarSchluessel::neu(anrufer, angerufener);

        // Erst in `sessions`, dann in `paare`: wer die ID im Paar-Index
        // findet, findet auch die Session
        self.inner.sessions.insert(id, Arc::clone(&session));
        match self.inner.paare.entry(schluessel.clone()) {
            Entry::Occupied(_) => {
                self.inner.sessions.remove(&id);
                return Err(SignalingError::Besetzt {
                    anrufer: anrufer.clone(),
                    angerufener: angerufener.clone(),
                });
            }
            Entry::Vacant(frei) => {
                frei.insert(id);
            }
        }

        let klingeln = AusgehendeNachricht::IncomingCall {
            call_from: anrufer.clone(),
            caller: anrufer.clone(),
            session_id: id,
        };
        if let Err(e) = self.inner.router.weiterleiten(anrufer, angerufener, klingeln) {
            // Angerufener nicht erreichbar: Session spurlos entfernen. Wer
            // schon auf den Lock wartet, sieht danach einen terminalen Zustand.
            guard.zustand = SessionZustand::Beendet;
            self.inner.paare.remove_if(&schluessel, |_, v| *v == id);
            self.inner.sessions.remove(&id);
            return Err(e);
        }

        self.inner.metriken.active_sessions.inc();
        self.timer_starten(&mut guard, self.inner.config.klingel_timeout);
        tracing::info!(
            session = %id,
            anrufer = %anrufer,
            angerufener = %angerufener,
            "Anruf klingelt"
        );
        Ok(id)
    }

    /// Angerufener nimmt an
    pub fn annehmen(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
    ) -> SignalingResult<()> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            Self::zustand_pruefen(s, "callAccepted", &[SessionZustand::Klingelt])?;
            if *absender != s.angerufener {
                return Err(SignalingError::uebergang(
                    "Nur der Angerufene kann den Anruf annehmen",
                ));
            }
            self.inner.router.weiterleiten(
                absender,
                &s.anrufer,
                AusgehendeNachricht::CallAccepted {
                    from_user: absender.clone(),
                    session_id: s.id,
                },
            )?;
            self.uebergang(s, SessionZustand::Angenommen);
            self.timer_starten(s, self.inner.config.verhandlungs_timeout);
            Ok(())
        })
    }

    /// Angerufener lehnt ab (terminal)
    pub fn ablehnen(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
    ) -> SignalingResult<()> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            Self::zustand_pruefen(s, "callRejected", &[SessionZustand::Klingelt])?;
            if *absender != s.angerufener {
                return Err(SignalingError::uebergang(
                    "Nur der Angerufene kann den Anruf ablehnen",
                ));
            }
            let _ = self.inner.router.zustellen(
                &s.anrufer,
                AusgehendeNachricht::CallRejected {
                    from_user: absender.clone(),
                    session_id: s.id,
                },
            );
            self.abschliessen(s, SessionZustand::Abgelehnt);
            Ok(())
        })
    }

    /// Anrufer schickt sein Angebot
    pub fn angebot(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
        offer: Box<RawValue>,
    ) -> SignalingResult<()> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            Self::zustand_pruefen(s, "offer", &[SessionZustand::Angenommen])?;
            if *absender != s.anrufer {
                return Err(SignalingError::uebergang("Nur der Anrufer sendet das Angebot"));
            }
            let strecke = Strecke {
                session_id: s.id,
                richtung: Richtung::AnruferZuAngerufenem,
                absender,
                ziel: &s.angerufener,
            };
            let nachricht = AusgehendeNachricht::Offer {
                from_user: absender.clone(),
                offer,
                session_id: s.id,
            };
            self.inner
                .verhandlung
                .beschreibung_weiterleiten(&mut s.kandidaten, strecke, nachricht)?;
            self.uebergang(s, SessionZustand::Verhandlung);
            Ok(())
        })
    }

    /// Angerufener antwortet, der Anruf wird aktiv
    pub fn antwort(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
        answer: Box<RawValue>,
    ) -> SignalingResult<()> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            Self::zustand_pruefen(s, "answer", &[SessionZustand::Verhandlung])?;
            if *absender != s.angerufener {
                return Err(SignalingError::uebergang("Nur der Angerufene sendet die Antwort"));
            }
            let strecke = Strecke {
                session_id: s.id,
                richtung: Richtung::AngerufenerZuAnrufer,
                absender,
                ziel: &s.anrufer,
            };
            let nachricht = AusgehendeNachricht::Answer {
                from_user: absender.clone(),
                answer,
                session_id: s.id,
            };
            self.inner
                .verhandlung
                .beschreibung_weiterleiten(&mut s.kandidaten, strecke, nachricht)?;
            self.uebergang(s, SessionZustand::Aktiv);
            self.timer_stoppen(s);
            self.inner
                .metriken
                .call_setup_seconds
                .observe(s.gestartet.elapsed().as_secs_f64());
            Ok(())
        })
    }

    /// Verbindungskandidat in eine der beiden Richtungen
    pub fn kandidat(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
        kandidat: IceKandidat,
    ) -> SignalingResult<KandidatStatus> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            Self::zustand_pruefen(
                s,
                "candidate",
                &[SessionZustand::Verhandlung, SessionZustand::Aktiv],
            )?;
            let richtung = if *absender == s.anrufer {
                Richtung::AnruferZuAngerufenem
            } else {
                Richtung::AngerufenerZuAnrufer
            };
            let strecke = Strecke {
                session_id: s.id,
                richtung,
                absender,
                ziel: gegenueber,
            };
            let status = self
                .inner
                .verhandlung
                .kandidat_weiterleiten(&mut s.kandidaten, strecke, kandidat)?;
            s.beruehren();
            Ok(status)
        })
    }

    /// Einer der Teilnehmer legt auf (terminal)
    pub fn beenden(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
    ) -> SignalingResult<()> {
        self.mit_session(absender, gegenueber, session_id, |s| {
            if s.zustand.ist_terminal() {
                return Err(SignalingError::uebergang(format!(
                    "endCall im Zustand {} nicht erlaubt",
                    s.zustand
                )));
            }
            let _ = self.inner.router.zustellen(
                gegenueber,
                AusgehendeNachricht::EndCall {
                    from_user: absender.clone(),
                    session_id: s.id,
                },
            );
            self.abschliessen(s, SessionZustand::Beendet);
            Ok(())
        })
    }

    /// Beendet alle laufenden Anrufe eines Benutzers der offline gegangen ist
    ///
    /// Die Gegenseite bekommt `endCall` im Namen des Getrennten. Gibt die
    /// Anzahl beendeter Sessions zurueck.
    pub fn nutzer_getrennt(&self, user_id: &UserId) -> usize {
        let ids: Vec<SessionId> = self
            .inner
            .paare
            .iter()
            .filter(|e| e.key().enthaelt(user_id))
            .map(|e| *e.value())
            .collect();

        let mut beendet = 0;
        for id in ids {
            let Some(session) = self.session_arc(&id) else {
                continue;
            };
            let mut guard = session.lock();
            let s = &mut *guard;
            if s.zustand.ist_terminal() || !self.ist_eingetragen(s) {
                continue;
            }
            let Some(gegenueber) = s.gegenueber(user_id).cloned() else {
                continue;
            };
            let _ = self.inner.router.zustellen(
                &gegenueber,
                AusgehendeNachricht::EndCall {
                    from_user: user_id.clone(),
                    session_id: s.id,
                },
            );
            self.abschliessen(s, SessionZustand::Beendet);
            beendet += 1;
        }

        if beendet > 0 {
            tracing::info!(user_id = %user_id, beendet, "Anrufe nach Trennung beendet");
        }
        beendet
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Aktueller Zustand einer Session (auch terminal, bis zum Aufraeumen)
    pub fn zustand(&self, id: &SessionId) -> Option<SessionZustand> {
        self.session_arc(id).map(|s| s.lock().zustand)
    }

    /// Schnappschuss einer Session
    pub fn info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.session_arc(id).map(|s| SessionInfo::from(&*s.lock()))
    }

    /// Nicht-terminale Session zwischen zwei Benutzern
    pub fn aktive_session(&self, a: &UserId, b: &UserId) -> Option<SessionId> {
        self.inner
            .paare
            .get(&PaarSchluessel::neu(a, b))
            .map(|e| *e.value())
    }

    /// Anzahl nicht-terminaler Sessions
    pub fn aktive_anzahl(&self) -> usize {
        self.inner.paare.len()
    }

    /// Anzahl gehaltener Sessions inklusive terminaler
    pub fn session_anzahl(&self) -> usize {
        self.inner.sessions.len()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn session_arc(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.inner.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Loest die adressierte Session auf, sperrt sie und prueft die Teilnahme
    fn mit_session<T>(
        &self,
        absender: &UserId,
        gegenueber: &UserId,
        session_id: Option<SessionId>,
        f: impl FnOnce(&mut Session) -> SignalingResult<T>,
    ) -> SignalingResult<T> {
        let id = match session_id {
            Some(id) => id,
            None => self.aktive_session(absender, gegenueber).ok_or_else(|| {
                SignalingError::uebergang(format!(
                    "Kein laufender Anruf zwischen {absender} und {gegenueber}"
                ))
            })?,
        };
        let session = self
            .session_arc(&id)
            .ok_or_else(|| SignalingError::uebergang(format!("Unbekannte Session {id}")))?;

        let mut guard = session.lock();
        let s = &mut *guard;
        if !s.zustand.ist_terminal() && !self.ist_eingetragen(s) {
            return Err(SignalingError::uebergang(format!("Unbekannte Session {id}")));
        }
        match s.gegenueber(absender) {
            None => {
                return Err(SignalingError::nicht_berechtigt(format!(
                    "{absender} ist nicht an {id} beteiligt"
                )));
            }
            Some(andere) if andere != gegenueber => {
                return Err(SignalingError::nicht_berechtigt(format!(
                    "{gegenueber} ist nicht an {id} beteiligt"
                )));
            }
            Some(_) => {}
        }
        f(s)
    }

    /// Steht die Session (unter ihrem Lock) noch im Paar-Index?
    fn ist_eingetragen(&self, s: &Session) -> bool {
        self.inner
            .paare
            .get(&PaarSchluessel::neu(&s.anrufer, &s.angerufener))
            .is_some_and(|e| *e.value() == s.id)
    }

    fn zustand_pruefen(
        s: &Session,
        ereignis: &str,
        erlaubt: &[SessionZustand],
    ) -> SignalingResult<()> {
        if erlaubt.contains(&s.zustand) {
            Ok(())
        } else {
            Err(SignalingError::uebergang(format!(
                "{ereignis} im Zustand {} nicht erlaubt",
                s.zustand
            )))
        }
    }

    fn uebergang(&self, s: &mut Session, neu: SessionZustand) {
        tracing::debug!(session = %s.id, von = %s.zustand, nach = %neu, "Session-Uebergang");
        s.zustand = neu;
        s.beruehren();
    }

    /// Vollzieht einen terminalen Uebergang
    fn abschliessen(&self, s: &mut Session, endzustand: SessionZustand) {
        debug_assert!(endzustand.ist_terminal());
        self.uebergang(s, endzustand);
        self.timer_stoppen(s);
        self.inner.verhandlung.freigeben(&mut s.kandidaten);

        let schluessel = PaarSchluessel::neu(&s.anrufer, &s.angerufener);
        let entfernt = self.inner.paare.remove_if(&schluessel, |_, v| *v == s.id);
        assert!(
            entfernt.is_some(),
            "Paar-Index inkonsistent: {} war nicht als laufend eingetragen",
            s.id
        );

        self.inner.metriken.active_sessions.dec();
        self.inner
            .metriken
            .sessions_finished_total
            .with_label_values(&[endzustand.als_str()])
            .inc();
        tracing::info!(
            session = %s.id,
            anrufer = %s.anrufer,
            angerufener = %s.angerufener,
            ergebnis = %endzustand,
            "Anruf abgeschlossen"
        );

        self.aufraeumen_planen(s.id);
    }

    fn timer_stoppen(&self, s: &mut Session) {
        if let Some(timer) = s.timer.take() {
            timer.cancel();
        }
    }

    /// Ersetzt den laufenden Timer der Session
    fn timer_starten(&self, s: &mut Session, dauer: Duration) {
        self.timer_stoppen(s);
        let token = CancellationToken::new();
        s.timer = Some(token.clone());

        let manager = self.clone();
        let id = s.id;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(dauer) => manager.timeout_ausloesen(id, &token),
            }
        });
    }

    fn timeout_ausloesen(&self, id: SessionId, token: &CancellationToken) {
        let Some(session) = self.session_arc(&id) else {
            return;
        };
        let mut guard = session.lock();
        let s = &mut *guard;
        // Uebergang zwischen Ablauf und Lock: Timer gehoert nicht mehr dazu
        if token.is_cancelled() || s.zustand.ist_terminal() || s.zustand == SessionZustand::Aktiv {
            return;
        }

        tracing::info!(session = %id, zustand = %s.zustand, "Anruf-Timeout");
        for (ziel, mit) in [(&s.anrufer, &s.angerufener), (&s.angerufener, &s.anrufer)] {
            let _ = self.inner.router.zustellen(
                ziel,
                AusgehendeNachricht::CallTimedOut {
                    with_user: mit.clone(),
                    session_id: id,
                },
            );
        }
        s.timer = None;
        self.abschliessen(s, SessionZustand::ZeitUeberschritten);
    }

    fn aufraeumen_planen(&self, id: SessionId) {
        let manager = self.clone();
        let verzoegerung = self.inner.config.aufraeum_verzoegerung;
        tokio::spawn(async move {
            tokio::time::sleep(verzoegerung).await;
            if manager.inner.sessions.remove(&id).is_some() {
                tracing::trace!(session = %id, "Terminale Session entfernt");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
