//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use fernruf_core::FernrufError;
use fernruf_protocol::IceServer;
use fernruf_signaling::{DoppelAnmeldung, SignalingConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Anruf- und Verbindungsverhalten
    pub signaling: SignalingEinstellungen,
    /// STUN/TURN-Server fuer die Browser
    pub ice: IceEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger WebSocket-Verbindungen
    pub max_clients: u32,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Fernruf".into(),
            max_clients: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer den WebSocket-Endpunkt
    pub ws_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 8080,
        }
    }
}

/// Anruf- und Verbindungsverhalten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Klingeldauer bis zum Timeout in Sekunden
    pub klingel_timeout_sek: u64,
    /// Zeit von der Annahme bis zur aktiven Verbindung in Sekunden
    pub verhandlungs_timeout_sek: u64,
    /// Wie lange beendete Anrufe abfragbar bleiben
    pub aufraeum_verzoegerung_sek: u64,
    /// WebSocket-Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Trennung nach so vielen Sekunden ohne Frame
    pub verbindungs_timeout_sek: u64,
    /// Gleichzeitige Verbindungen pro Benutzer und Endpunkt
    pub max_verbindungen_pro_user: usize,
    /// "abtrennen" (alte Verbindung verdraengen) oder "ablehnen"
    pub doppelte_anmeldung: DoppelAnmeldung,
    /// Ausgehende Nachrichten pro Verbindung bevor getrennt wird
    pub sende_queue_groesse: usize,
    /// Gepufferte ICE-Kandidaten pro Richtung
    pub max_wartende_kandidaten: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let basis = SignalingConfig::default();
        Self {
            klingel_timeout_sek: basis.klingel_timeout_sek,
            verhandlungs_timeout_sek: basis.verhandlungs_timeout_sek,
            aufraeum_verzoegerung_sek: basis.aufraeum_verzoegerung_sek,
            keepalive_sek: basis.keepalive_sek,
            verbindungs_timeout_sek: basis.verbindungs_timeout_sek,
            max_verbindungen_pro_user: basis.max_verbindungen_pro_user,
            doppelte_anmeldung: basis.doppelte_anmeldung,
            sende_queue_groesse: basis.sende_queue_groesse,
            max_wartende_kandidaten: basis.max_wartende_kandidaten,
        }
    }
}

/// STUN/TURN-Liste
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceEinstellungen {
    pub server: Vec<IceServer>,
}

impl Default for IceEinstellungen {
    fn default() -> Self {
        Self {
            server: SignalingConfig::default().ice_server,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder EnvFilter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> fernruf_core::Result<()> {
        let s = &self.signaling;
        let timeouts = [
            ("klingel_timeout_sek", s.klingel_timeout_sek),
            ("verhandlungs_timeout_sek", s.verhandlungs_timeout_sek),
            ("keepalive_sek", s.keepalive_sek),
            ("verbindungs_timeout_sek", s.verbindungs_timeout_sek),
        ];
        for (name, wert) in timeouts {
            if wert == 0 {
                return Err(FernrufError::konfiguration(format!(
                    "signaling.{name} darf nicht 0 sein"
                )));
            }
        }
        if s.max_verbindungen_pro_user == 0 {
            return Err(FernrufError::konfiguration(
                "signaling.max_verbindungen_pro_user muss mindestens 1 sein",
            ));
        }
        if s.sende_queue_groesse == 0 {
            return Err(FernrufError::konfiguration(
                "signaling.sende_queue_groesse muss mindestens 1 sein",
            ));
        }
        if self.server.max_clients == 0 {
            return Err(FernrufError::konfiguration(
                "server.max_clients muss mindestens 1 sein",
            ));
        }
        for (i, eintrag) in self.ice.server.iter().enumerate() {
            if eintrag.urls.is_empty() || eintrag.urls.iter().any(|u| u.trim().is_empty()) {
                return Err(FernrufError::konfiguration(format!(
                    "ice.server[{i}] hat eine leere URL"
                )));
            }
        }
        self.ws_bind_adresse()?;
        self.observability_bind_adresse()?;
        Ok(())
    }

    /// Baut die Konfiguration fuer den Signaling-Service
    pub fn signaling_config(&self) -> SignalingConfig {
        let s = &self.signaling;
        SignalingConfig {
            max_clients: self.server.max_clients,
            klingel_timeout_sek: s.klingel_timeout_sek,
            verhandlungs_timeout_sek: s.verhandlungs_timeout_sek,
            aufraeum_verzoegerung_sek: s.aufraeum_verzoegerung_sek,
            keepalive_sek: s.keepalive_sek,
            verbindungs_timeout_sek: s.verbindungs_timeout_sek,
            max_verbindungen_pro_user: s.max_verbindungen_pro_user,
            doppelte_anmeldung: s.doppelte_anmeldung,
            sende_queue_groesse: s.sende_queue_groesse,
            max_wartende_kandidaten: s.max_wartende_kandidaten,
            ice_server: self.ice.server.clone(),
        }
    }

    /// Gibt die Bind-Adresse fuer den WebSocket-Endpunkt zurueck
    pub fn ws_bind_adresse(&self) -> fernruf_core::Result<SocketAddr> {
        adresse_parsen(&self.netzwerk.bind_adresse, self.netzwerk.ws_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> fernruf_core::Result<SocketAddr> {
        adresse_parsen(&self.netzwerk.bind_adresse, self.observability.port)
    }
}

fn adresse_parsen(host: &str, port: u16) -> fernruf_core::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| FernrufError::konfiguration(format!("Ungueltige Bind-Adresse '{host}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_clients, 1024);
        assert_eq!(cfg.netzwerk.ws_port, 8080);
        assert_eq!(cfg.signaling.klingel_timeout_sek, 30);
        assert_eq!(cfg.signaling.max_verbindungen_pro_user, 1);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.ice.server.len(), 2);
        assert!(cfg.validieren().is_ok());
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ws_bind_adresse().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(
            cfg.observability_bind_adresse().unwrap().to_string(),
            "0.0.0.0:9300"
        );
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Praxis"
            max_clients = 100

            [signaling]
            klingel_timeout_sek = 45
            doppelte_anmeldung = "ablehnen"
            max_verbindungen_pro_user = 3

            [[ice.server]]
            urls = ["turn:turn.example.org:3478"]
            username = "u"
            credential = "c"
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Praxis");
        assert_eq!(cfg.server.max_clients, 100);
        assert_eq!(cfg.signaling.klingel_timeout_sek, 45);
        assert_eq!(cfg.signaling.doppelte_anmeldung, DoppelAnmeldung::Ablehnen);
        assert_eq!(cfg.ice.server.len(), 1);
        assert_eq!(cfg.ice.server[0].username.as_deref(), Some("u"));
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.signaling.verhandlungs_timeout_sek, 30);
        assert_eq!(cfg.netzwerk.ws_port, 8080);
    }

    #[test]
    fn signaling_config_uebernimmt_werte() {
        let mut cfg = ServerConfig::default();
        cfg.server.max_clients = 7;
        cfg.signaling.max_wartende_kandidaten = 5;
        let sc = cfg.signaling_config();
        assert_eq!(sc.max_clients, 7);
        assert_eq!(sc.max_wartende_kandidaten, 5);
        assert_eq!(sc.ice_server, cfg.ice.server);
    }

    #[test]
    fn null_timeout_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.signaling.klingel_timeout_sek = 0;
        let fehler = cfg.validieren().unwrap_err();
        assert!(fehler.to_string().contains("klingel_timeout_sek"));
    }

    #[test]
    fn leere_ice_url_wird_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.ice.server.push(IceServer::stun(" "));
        assert!(cfg.validieren().is_err());

        cfg.ice.server = vec![IceServer {
            urls: vec![],
            username: None,
            credential: None,
        }];
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn ungueltige_bind_adresse() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "kein host".into();
        assert!(cfg.ws_bind_adresse().is_err());
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standard() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/fernruf.toml").unwrap();
        assert_eq!(cfg.netzwerk.ws_port, 8080);
    }
}
