//! Fehlertypen beim Parsen eingehender Envelopes

use thiserror::Error;

/// Fehler beim Dekodieren einer Client-Nachricht
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    /// Kein gueltiges JSON oder Schema verletzt
    #[error("Ungueltiges JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Feld `type` enthaelt einen unbekannten Nachrichtentyp
    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(String),
}
