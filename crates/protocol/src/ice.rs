//! STUN/TURN-Server-Beschreibung
//!
//! Wird vom Koordinator nicht interpretiert, nur aus der Konfiguration
//! gelesen und beim Verbindungsaufbau an den Browser weitergegeben.

use serde::{Deserialize, Serialize};

/// Ein Eintrag der `iceServers`-Liste einer RTCPeerConnection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// STUN-Server ohne Zugangsdaten
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stun_ohne_zugangsdaten_serialisiert_kompakt() {
        let server = IceServer::stun("stun:stun.l.google.com:19302");
        let json = serde_json::to_string(&server).unwrap();
        assert_eq!(json, r#"{"urls":["stun:stun.l.google.com:19302"]}"#);
    }

    #[test]
    fn turn_mit_zugangsdaten() {
        let json = r#"{"urls":["turn:turn.example.org:3478"],"username":"u","credential":"c"}"#;
        let server: IceServer = serde_json::from_str(json).unwrap();
        assert_eq!(server.username.as_deref(), Some("u"));
        assert_eq!(server.credential.as_deref(), Some("c"));
    }
}
