//! fernruf-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Signaling-Service und Observability und stellt
//! den oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use fernruf_observability::{observability_server_starten, FernrufMetrics, HealthState};
use fernruf_signaling::{SignalingServer, SignalingState};
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Metriken und Signaling-Zustand anlegen
    /// 2. Observability-Server starten (falls aktiviert)
    /// 3. WebSocket-Listener starten
    /// 4. Auf Ctrl-C warten, dann alle Verbindungen schliessen
    pub async fn starten(self) -> Result<()> {
        let ws_adresse = self.config.ws_bind_adresse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            ws = %ws_adresse,
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        let metriken = FernrufMetrics::neu()?;
        let health = HealthState::neu();
        let state = SignalingState::neu(self.config.signaling_config(), metriken.clone());

        if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let metriken = metriken.clone();
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signaling = SignalingServer::neu(state, ws_adresse);
        let mut server_task = tokio::spawn(signaling.starten(shutdown_rx, health));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                let _ = shutdown_tx.send(true);
                server_task.await??;
            }
            ergebnis = &mut server_task => {
                // Listener vorzeitig beendet (z.B. Port belegt)
                ergebnis??;
            }
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}
