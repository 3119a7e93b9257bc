//! Negotiation-Coordinator – Angebot, Antwort und Kandidaten
//!
//! Ein Kandidat darf die Gegenseite erst erreichen, nachdem die
//! Session-Beschreibung (Offer bzw. Answer) derselben Richtung zugestellt
//! wurde. Vorher eintreffende Kandidaten werden pro Richtung in
//! Eingangsreihenfolge gepuffert und direkt nach der Beschreibung
//! nachgereicht.
//!
//! Der Puffer lebt in der Session und wird nur unter deren Lock benutzt.

use fernruf_core::types::{SessionId, UserId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::{AusgehendeNachricht, IceKandidat};
use std::collections::VecDeque;

use crate::error::{SignalingError, SignalingResult};
use crate::router::MessageRouter;

/// Flussrichtung innerhalb einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Richtung {
    /// Anrufer -> Angerufener (Offer, Kandidaten des Anrufers)
    AnruferZuAngerufenem,
    /// Angerufener -> Anrufer (Answer, Kandidaten des Angerufenen)
    AngerufenerZuAnrufer,
}

impl Richtung {
    fn index(self) -> usize {
        match self {
            Richtung::AnruferZuAngerufenem => 0,
            Richtung::AngerufenerZuAnrufer => 1,
        }
    }
}

/// Ausgang einer Kandidaten-Weiterleitung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KandidatStatus {
    Weitergeleitet,
    Gepuffert,
}

/// Pro-Session-Zustand der Aushandlung
#[derive(Debug, Default)]
pub struct KandidatenPuffer {
    warteschlangen: [VecDeque<IceKandidat>; 2],
    beschreibung_zugestellt: [bool; 2],
}

impl KandidatenPuffer {
    /// Wartende Kandidaten einer Richtung
    pub fn wartend(&self, richtung: Richtung) -> usize {
        self.warteschlangen[richtung.index()].len()
    }

    /// Wartende Kandidaten beider Richtungen
    pub fn gesamt_wartend(&self) -> usize {
        self.warteschlangen.iter().map(VecDeque::len).sum()
    }

    /// Wurde die Beschreibung dieser Richtung schon zugestellt?
    pub fn beschreibung_zugestellt(&self, richtung: Richtung) -> bool {
        self.beschreibung_zugestellt[richtung.index()]
    }
}

/// Absender, Ziel und Session einer Weiterleitung
#[derive(Debug, Clone, Copy)]
pub struct Strecke<'a> {
    pub session_id: SessionId,
    pub richtung: Richtung,
    pub absender: &'a UserId,
    pub ziel: &'a UserId,
}

/// Weiterleitung von Offer, Answer und Kandidaten
#[derive(Clone)]
pub struct NegotiationCoordinator {
    router: MessageRouter,
    max_wartend: usize,
    metriken: FernrufMetrics,
}

impl NegotiationCoordinator {
    pub fn neu(router: MessageRouter, max_wartend: usize, metriken: FernrufMetrics) -> Self {
        Self {
            router,
            max_wartend: max_wartend.max(1),
            metriken,
        }
    }

    /// Stellt eine Beschreibung zu und reicht danach wartende Kandidaten nach
    ///
    /// Schlaegt nur fehl wenn die Beschreibung selbst nicht zugestellt werden
    /// kann; der Puffer bleibt dann unveraendert. Gibt die Anzahl der
    /// nachgereichten Kandidaten zurueck.
    pub fn beschreibung_weiterleiten(
        &self,
        puffer: &mut KandidatenPuffer,
        strecke: Strecke<'_>,
        beschreibung: AusgehendeNachricht,
    ) -> SignalingResult<usize> {
        self.router
            .weiterleiten(strecke.absender, strecke.ziel, beschreibung)?;
        puffer.beschreibung_zugestellt[strecke.richtung.index()] = true;
        Ok(self.nachreichen(puffer, strecke))
    }

    /// Leitet einen Kandidaten weiter oder puffert ihn
    ///
    /// Solange in dieser Richtung noch Kandidaten warten, wird auch ein
    /// spaeterer Kandidat hinten angestellt.
    pub fn kandidat_weiterleiten(
        &self,
        puffer: &mut KandidatenPuffer,
        strecke: Strecke<'_>,
        kandidat: IceKandidat,
    ) -> SignalingResult<KandidatStatus> {
        let i = strecke.richtung.index();

        if puffer.beschreibung_zugestellt[i] && puffer.warteschlangen[i].is_empty() {
            self.router.weiterleiten(
                strecke.absender,
                strecke.ziel,
                kandidat_nachricht(&strecke, kandidat),
            )?;
            return Ok(KandidatStatus::Weitergeleitet);
        }

        if puffer.warteschlangen[i].len() >= self.max_wartend {
            return Err(SignalingError::fehlerhaft(format!(
                "Mehr als {} Kandidaten vor der Session-Beschreibung",
                self.max_wartend
            )));
        }

        puffer.warteschlangen[i].push_back(kandidat);
        self.metriken.candidates_buffered_total.inc();
        tracing::trace!(
            session = %strecke.session_id,
            richtung = ?strecke.richtung,
            wartend = puffer.warteschlangen[i].len(),
            "Kandidat gepuffert"
        );
        Ok(KandidatStatus::Gepuffert)
    }

    /// Verwirft alle wartenden Kandidaten der Session
    pub fn freigeben(&self, puffer: &mut KandidatenPuffer) -> usize {
        let verworfen = puffer.gesamt_wartend();
        for queue in &mut puffer.warteschlangen {
            queue.clear();
        }
        if verworfen > 0 {
            tracing::debug!(verworfen, "Wartende Kandidaten verworfen");
        }
        verworfen
    }

    /// Reicht wartende Kandidaten in Eingangsreihenfolge nach
    ///
    /// Bricht beim ersten Zustellfehler ab; der Rest bleibt gepuffert.
    fn nachreichen(&self, puffer: &mut KandidatenPuffer, strecke: Strecke<'_>) -> usize {
        let queue = &mut puffer.warteschlangen[strecke.richtung.index()];
        let mut nachgereicht = 0;
        while let Some(kandidat) = queue.front() {
            let nachricht = kandidat_nachricht(&strecke, kandidat.clone());
            if let Err(e) = self.router.zustellen(strecke.ziel, nachricht) {
                tracing::debug!(
                    session = %strecke.session_id,
                    fehler = %e,
                    wartend = queue.len(),
                    "Nachreichen abgebrochen"
                );
                break;
            }
            queue.pop_front();
            nachgereicht += 1;
        }
        if nachgereicht > 0 {
            tracing::debug!(session = %strecke.session_id, nachgereicht, "Gepufferte Kandidaten nachgereicht");
        }
        nachgereicht
    }
}

fn kandidat_nachricht(strecke: &Strecke<'_>, kandidat: IceKandidat) -> AusgehendeNachricht {
    AusgehendeNachricht::Candidate {
        from_user: strecke.absender.clone(),
        candidate: kandidat,
        session_id: strecke.session_id,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
