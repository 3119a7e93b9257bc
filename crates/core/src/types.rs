//! Gemeinsame Identifikationstypen fuer Fernruf
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::FernrufError;

/// Maximale Laenge einer Benutzer-ID in Bytes
pub const MAX_USER_ID_LAENGE: usize = 128;

/// Benutzer-ID (vom Client gewaehlt, eindeutig pro Server)
///
/// Der Koordinator interpretiert die ID nicht, sie muss nur nicht-leer sein
/// und darf keine Steuerzeichen enthalten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct UserId(String);

impl UserId {
    /// Prueft und uebernimmt eine Benutzer-ID
    pub fn parse(roh: impl Into<String>) -> Result<Self, FernrufError> {
        let roh = roh.into();
        if roh.trim().is_empty() {
            return Err(FernrufError::UngueltigeNutzerId("leer".into()));
        }
        if roh.len() > MAX_USER_ID_LAENGE {
            return Err(FernrufError::UngueltigeNutzerId(format!(
                "laenger als {MAX_USER_ID_LAENGE} Bytes"
            )));
        }
        if roh.chars().any(char::is_control) {
            return Err(FernrufError::UngueltigeNutzerId(
                "enthaelt Steuerzeichen".into(),
            ));
        }
        Ok(Self(roh))
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = FernrufError;

    fn try_from(roh: String) -> Result<Self, Self::Error> {
        Self::parse(roh)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige ID eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Zaehler fuer Verbindungs-IDs (beginnt bei 1)
static VERBINDUNGS_ZAEHLER: AtomicU64 = AtomicU64::new(1);

/// Prozessweit eindeutige ID einer Transport-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerbindungsId(pub u64);

impl VerbindungsId {
    /// Vergibt die naechste freie Verbindungs-ID
    pub fn naechste() -> Self {
        Self(VERBINDUNGS_ZAEHLER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}
