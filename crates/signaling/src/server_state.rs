//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Manager, die sicher zwischen tokio-Tasks geteilt
//! werden koennen.

use fernruf_observability::FernrufMetrics;
use fernruf_protocol::IceServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::lifecycle::LifecycleManager;
use crate::negotiation::NegotiationCoordinator;
use crate::presence::{DoppelAnmeldung, PresenceManager};
use crate::router::MessageRouter;
use crate::session::{SessionConfig, SessionManager};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige WebSocket-Verbindungen
    pub max_clients: u32,
    /// Klingeldauer bis TIMED_OUT in Sekunden
    pub klingel_timeout_sek: u64,
    /// Zeit von der Annahme bis ACTIVE in Sekunden
    pub verhandlungs_timeout_sek: u64,
    /// Terminale Sessions bleiben so lange abfragbar
    pub aufraeum_verzoegerung_sek: u64,
    /// Keepalive-Intervall (WebSocket-Ping) in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Gleichzeitige Verbindungen pro Benutzer und Endpunkt
    pub max_verbindungen_pro_user: usize,
    /// Verhalten bei Anmeldung ueber das Limit hinaus
    pub doppelte_anmeldung: DoppelAnmeldung,
    /// Groesse der Send-Queue pro Verbindung
    pub sende_queue_groesse: usize,
    /// Gepufferte Kandidaten pro Richtung und Session
    pub max_wartende_kandidaten: usize,
    /// Wird jedem Client nach Verbindungsaufbau mitgeteilt
    pub ice_server: Vec<IceServer>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 1024,
            klingel_timeout_sek: 30,
            verhandlungs_timeout_sek: 30,
            aufraeum_verzoegerung_sek: 60,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            max_verbindungen_pro_user: 1,
            doppelte_anmeldung: DoppelAnmeldung::Abtrennen,
            sende_queue_groesse: 256,
            max_wartende_kandidaten: 64,
            ice_server: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
        }
    }
}

impl SignalingConfig {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            klingel_timeout: Duration::from_secs(self.klingel_timeout_sek),
            verhandlungs_timeout: Duration::from_secs(self.verhandlungs_timeout_sek),
            aufraeum_verzoegerung: Duration::from_secs(self.aufraeum_verzoegerung_sek),
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Wer ist online, ueber welche Verbindungen
    pub presence: PresenceManager,
    /// Zustellung an Benutzer
    pub router: MessageRouter,
    /// Anrufe und ihre Zustaende
    pub sessions: SessionManager,
    /// Anmeldung und Trennung
    pub lifecycle: LifecycleManager,
    /// Prometheus-Metriken
    pub metriken: FernrufMetrics,
    /// Offene WebSocket-Verbindungen (auch unangemeldete)
    offene_verbindungen: AtomicUsize,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: FernrufMetrics) -> Arc<Self> {
        let presence = PresenceManager::neu(
            config.max_verbindungen_pro_user,
            config.doppelte_anmeldung,
            metriken.clone(),
        );
        let router = MessageRouter::neu(presence.clone(), metriken.clone());
        let verhandlung = NegotiationCoordinator::neu(
            router.clone(),
            config.max_wartende_kandidaten,
            metriken.clone(),
        );
        let sessions = SessionManager::neu(
            router.clone(),
            verhandlung,
            config.session_config(),
            metriken.clone(),
        );
        let lifecycle = LifecycleManager::neu(presence.clone(), sessions.clone());

        Arc::new(Self {
            config: Arc::new(config),
            presence,
            router,
            sessions,
            lifecycle,
            metriken,
            offene_verbindungen: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    /// Reserviert einen Verbindungsplatz; `false` wenn der Server voll ist
    pub fn verbindung_reservieren(&self) -> bool {
        let max = self.config.max_clients as usize;
        let reserviert = self
            .offene_verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok();
        if reserviert {
            self.metriken.open_connections.inc();
        }
        reserviert
    }

    /// Gibt einen Verbindungsplatz frei
    pub fn verbindung_freigeben(&self) {
        let _ = self
            .offene_verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.metriken.open_connections.dec();
    }

    /// Anzahl offener WebSocket-Verbindungen
    pub fn offene_verbindungen(&self) -> usize {
        self.offene_verbindungen.load(Ordering::Acquire)
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
