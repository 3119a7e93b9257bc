//! Fehlertypen fuer den Signaling-Service
//!
//! Jede Variante entspricht genau einem Diagnose-Code, der dem Absender
//! der ausloesenden Nachricht als `error`-Envelope zugestellt wird.

use fernruf_core::{FernrufError, UserId};
use fernruf_protocol::{FehlerCode, ProtokollFehler};
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Benutzer hat bereits die maximale Anzahl Verbindungen
    #[error("Benutzer {0} ist bereits angemeldet")]
    DoppelteAnmeldung(UserId),

    /// Zwischen den beiden Benutzern laeuft schon ein Anruf
    #[error("Zwischen {anrufer} und {angerufener} besteht bereits ein Anruf")]
    Besetzt {
        anrufer: UserId,
        angerufener: UserId,
    },

    /// Ereignis passt nicht zum Zustand der Session
    #[error("Ungueltiger Uebergang: {0}")]
    UngueltigerUebergang(String),

    /// Absender ist nicht berechtigt (falsche Identitaet, fremde Session)
    #[error("Nicht berechtigt: {0}")]
    NichtBerechtigt(String),

    /// Ziel hat keine offene Verbindung
    #[error("Benutzer {0} ist nicht online")]
    ZielOffline(UserId),

    /// Nachricht konnte nicht dekodiert werden oder ist inhaltlich unsinnig
    #[error("Fehlerhafte Nachricht: {0}")]
    FehlerhafteNachricht(String),

    /// Verbindung hat sich noch nicht mit `addUser` angemeldet
    #[error("Verbindung ist nicht angemeldet")]
    NichtAngemeldet,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen Uebergangsfehler
    pub fn uebergang(msg: impl Into<String>) -> Self {
        Self::UngueltigerUebergang(msg.into())
    }

    /// Erstellt einen Berechtigungsfehler
    pub fn nicht_berechtigt(msg: impl Into<String>) -> Self {
        Self::NichtBerechtigt(msg.into())
    }

    /// Erstellt einen Fehler fuer fehlerhafte Nachrichten
    pub fn fehlerhaft(msg: impl Into<String>) -> Self {
        Self::FehlerhafteNachricht(msg.into())
    }

    /// Diagnose-Code fuer den `error`-Envelope
    pub fn fehler_code(&self) -> FehlerCode {
        match self {
            Self::DoppelteAnmeldung(_) => FehlerCode::DuplicateRegistration,
            Self::Besetzt { .. } => FehlerCode::Busy,
            Self::UngueltigerUebergang(_) => FehlerCode::InvalidTransition,
            Self::NichtBerechtigt(_) => FehlerCode::Unauthorized,
            Self::ZielOffline(_) => FehlerCode::DestinationOffline,
            Self::FehlerhafteNachricht(_) => FehlerCode::MalformedEnvelope,
            Self::NichtAngemeldet => FehlerCode::NotRegistered,
            Self::Intern(_) => FehlerCode::InternalError,
        }
    }
}

impl From<ProtokollFehler> for SignalingError {
    fn from(e: ProtokollFehler) -> Self {
        Self::FehlerhafteNachricht(e.to_string())
    }
}

impl From<FernrufError> for SignalingError {
    fn from(e: FernrufError) -> Self {
        match e {
            FernrufError::UngueltigeNutzerId(_) => Self::FehlerhafteNachricht(e.to_string()),
            andere => Self::Intern(andere.to_string()),
        }
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
