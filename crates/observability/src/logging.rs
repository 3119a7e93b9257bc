//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Konfigurationsdatei, ueberschreibbar per Umgebung:
//! - `FR_LOG_LEVEL`: EnvFilter-Direktive (z.B. `debug` oder
//!   `info,fernruf_signaling=trace`), Standard: Wert aus der Konfiguration
//! - `FR_LOG_FORMAT`: Format (text/json), Standard: Wert aus der Konfiguration

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Filter
pub const ENV_LOG_LEVEL: &str = "FR_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "FR_LOG_FORMAT";

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(format!("Unbekanntes Log-Format: {andere}")),
        }
    }
}

/// Waehlt die wirksame Einstellung: Umgebung vor Konfiguration
fn wirksam(env_wert: Option<String>, konfiguriert: &str) -> String {
    env_wert
        .filter(|w| !w.trim().is_empty())
        .unwrap_or_else(|| konfiguriert.to_string())
}

/// Baut den EnvFilter; faellt bei ungueltiger Direktive auf `info` zurueck
pub fn filter_bauen(direktive: &str) -> EnvFilter {
    EnvFilter::try_new(direktive).unwrap_or_else(|e| {
        eprintln!("Ungueltiger Log-Filter '{direktive}': {e} – verwende 'info'");
        EnvFilter::new("info")
    })
}

/// Initialisiert das Logging-System.
///
/// Darf nur einmal pro Prozess aufgerufen werden; ein zweiter Aufruf
/// liefert einen Fehler statt zu paniken.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let level = wirksam(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format = wirksam(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let filter = filter_bauen(&level);
    let format = LogFormat::from_str(&format).unwrap_or(LogFormat::Text);

    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Logging bereits initialisiert: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsen() {
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
        assert!("JSON".parse::<LogFormat>().is_err()); // Gross-/Kleinschreibung
    }

    #[test]
    fn umgebung_hat_vorrang() {
        assert_eq!(wirksam(Some("debug".into()), "info"), "debug");
    }

    #[test]
    fn leere_umgebung_wird_ignoriert() {
        assert_eq!(wirksam(Some("  ".into()), "warn"), "warn");
        assert_eq!(wirksam(None, "warn"), "warn");
    }

    #[test]
    fn filter_mit_modul_direktive() {
        let filter = filter_bauen("info,fernruf_signaling=trace");
        assert!(filter.to_string().contains("fernruf_signaling=trace"));
    }
}
