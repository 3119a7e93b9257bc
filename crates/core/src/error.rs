//! Fehlertypen fuer Fernruf
//!
//! Gemeinsame Fehler die crate-uebergreifend auftreten. Untermodule
//! definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Fernruf
pub type Result<T> = std::result::Result<T, FernrufError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum FernrufError {
    #[error("Ungueltige Benutzer-ID: {0}")]
    UngueltigeNutzerId(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl FernrufError {
    /// Erstellt einen Konfigurationsfehler
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = FernrufError::UngueltigeNutzerId("leer".into());
        assert_eq!(e.to_string(), "Ungueltige Benutzer-ID: leer");
    }

    #[test]
    fn konfiguration_hilfsfunktion() {
        let e = FernrufError::konfiguration("klingel_timeout_sek = 0");
        assert!(e.to_string().contains("klingel_timeout_sek"));
    }
}
