//! Envelopes des Signaling-Protokolls (WebSocket, JSON)
//!
//! ## Design
//! - Jede Nachricht ist ein JSON-Objekt mit Feld `type`
//! - Eingehend wird zweistufig dekodiert: erst `type`, dann die passende
//!   Struktur. So bleiben SDP-Payloads als `RawValue` byte-genau erhalten.
//! - Ausgehend: getaggtes Enum, Feldnamen in camelCase

use fernruf_core::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::ProtokollFehler;
use crate::ice::IceServer;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Diagnose-Codes fuer `error`-Envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FehlerCode {
    DuplicateRegistration,
    Busy,
    InvalidTransition,
    Unauthorized,
    DestinationOffline,
    MalformedEnvelope,
    NotRegistered,
    InternalError,
}

impl FehlerCode {
    /// Code als Label (fuer Metriken und Logs)
    pub fn als_str(&self) -> &'static str {
        match self {
            FehlerCode::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            FehlerCode::Busy => "BUSY",
            FehlerCode::InvalidTransition => "INVALID_TRANSITION",
            FehlerCode::Unauthorized => "UNAUTHORIZED",
            FehlerCode::DestinationOffline => "DESTINATION_OFFLINE",
            FehlerCode::MalformedEnvelope => "MALFORMED_ENVELOPE",
            FehlerCode::NotRegistered => "NOT_REGISTERED",
            FehlerCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// ICE-Kandidat
// ---------------------------------------------------------------------------

/// Verbindungskandidat wie ihn der Browser sendet
///
/// `id` ist der Kandidaten-String, `label` der Media-Line-Index
/// (`sdpMLineIndex`). Mehr braucht die Gegenseite nicht.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceKandidat {
    pub id: String,
    #[serde(default)]
    pub label: Option<u32>,
}

// ---------------------------------------------------------------------------
// Eingehende Nachrichten (Browser -> Koordinator)
// ---------------------------------------------------------------------------

/// Anmeldung einer Verbindung unter einer Benutzer-ID
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub user_id: UserId,
}

/// Anrufwunsch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(default)]
    pub call_from: Option<UserId>,
    pub call_to: UserId,
}

/// Adressierung einer Session ohne Payload
/// (callAccepted, callRejected, endCall)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAdresse {
    pub to_user: UserId,
    #[serde(default)]
    pub from_user: Option<UserId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// SDP-Angebot des Anrufers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub to_user: UserId,
    #[serde(default)]
    pub from_user: Option<UserId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub offer: Box<RawValue>,
}

/// SDP-Antwort des Angerufenen
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub to_user: UserId,
    #[serde(default)]
    pub from_user: Option<UserId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub answer: Box<RawValue>,
}

/// Verbindungskandidat fuer die Gegenseite
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRequest {
    pub to_user: UserId,
    #[serde(default)]
    pub from_user: Option<UserId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub candidate: IceKandidat,
}

/// Chat-Text an einen anderen Benutzer
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub to_user: UserId,
    #[serde(default)]
    pub from_user: Option<UserId>,
    pub message: String,
}

/// Alle Nachrichten die ein Client senden darf
#[derive(Debug, Clone)]
pub enum EingehendeNachricht {
    AddUser(AddUserRequest),
    Call(CallRequest),
    CallAccepted(SessionAdresse),
    CallRejected(SessionAdresse),
    Offer(OfferRequest),
    Answer(AnswerRequest),
    Candidate(CandidateRequest),
    EndCall(SessionAdresse),
    Chat(ChatRequest),
}

/// Nur das Typ-Feld, fuer die erste Dekodierstufe
#[derive(Deserialize)]
struct Kopf {
    #[serde(rename = "type")]
    typ: String,
}

impl EingehendeNachricht {
    /// Dekodiert einen Text-Frame
    pub fn parsen(text: &str) -> Result<Self, ProtokollFehler> {
        let kopf: Kopf = serde_json::from_str(text)?;
        let nachricht = match kopf.typ.as_str() {
            "addUser" => Self::AddUser(serde_json::from_str(text)?),
            // "callRequest" ist die Schreibweise aelterer Clients
            "call" | "callRequest" => Self::Call(serde_json::from_str(text)?),
            "callAccepted" => Self::CallAccepted(serde_json::from_str(text)?),
            "callRejected" | "reject" => Self::CallRejected(serde_json::from_str(text)?),
            "offer" => Self::Offer(serde_json::from_str(text)?),
            "answer" => Self::Answer(serde_json::from_str(text)?),
            "candidate" => Self::Candidate(serde_json::from_str(text)?),
            "endCall" => Self::EndCall(serde_json::from_str(text)?),
            "chat" => Self::Chat(serde_json::from_str(text)?),
            _ => return Err(ProtokollFehler::UnbekannterTyp(kopf.typ)),
        };
        Ok(nachricht)
    }

    /// Protokoll-Typname (fuer Logs)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::AddUser(_) => "addUser",
            Self::Call(_) => "call",
            Self::CallAccepted(_) => "callAccepted",
            Self::CallRejected(_) => "callRejected",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::EndCall(_) => "endCall",
            Self::Chat(_) => "chat",
        }
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten (Koordinator -> Browser)
// ---------------------------------------------------------------------------

/// Alle Nachrichten die der Koordinator zustellt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AusgehendeNachricht {
    /// Aktuelle Liste aller online Benutzer
    UserList { users: Vec<UserId> },
    /// Eingehender Anruf; `caller` doppelt `callFrom` fuer aeltere Clients
    IncomingCall {
        call_from: UserId,
        caller: UserId,
        session_id: SessionId,
    },
    CallAccepted {
        from_user: UserId,
        session_id: SessionId,
    },
    CallRejected {
        from_user: UserId,
        session_id: SessionId,
    },
    Offer {
        from_user: UserId,
        offer: Box<RawValue>,
        session_id: SessionId,
    },
    Answer {
        from_user: UserId,
        answer: Box<RawValue>,
        session_id: SessionId,
    },
    Candidate {
        from_user: UserId,
        candidate: IceKandidat,
        session_id: SessionId,
    },
    EndCall {
        from_user: UserId,
        session_id: SessionId,
    },
    /// Anruf wurde nicht rechtzeitig angenommen oder ausgehandelt
    CallTimedOut {
        with_user: UserId,
        session_id: SessionId,
    },
    /// Ziel einer Nachricht ist nicht online
    UserOffline { to_user: UserId },
    Chat { from_user: UserId, message: String },
    /// STUN/TURN-Konfiguration, einmal nach Verbindungsaufbau
    IceConfig { ice_servers: Vec<IceServer> },
    /// Diagnose an den Absender einer fehlerhaften Nachricht
    Error { code: FehlerCode, message: String },
}

impl AusgehendeNachricht {
    /// Erstellt eine Diagnose-Nachricht
    pub fn fehler(code: FehlerCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Protokoll-Typname (fuer Logs und Metriken)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::UserList { .. } => "userList",
            Self::IncomingCall { .. } => "incomingCall",
            Self::CallAccepted { .. } => "callAccepted",
            Self::CallRejected { .. } => "callRejected",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::EndCall { .. } => "endCall",
            Self::CallTimedOut { .. } => "callTimedOut",
            Self::UserOffline { .. } => "userOffline",
            Self::Chat { .. } => "chat",
            Self::IceConfig { .. } => "iceConfig",
            Self::Error { .. } => "error",
        }
    }

    /// Serialisiert fuer einen WebSocket-Text-Frame
    pub fn zu_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn add_user_parsen() {
        let n = EingehendeNachricht::parsen(r#"{"type":"addUser","userId":"alice"}"#).unwrap();
        match n {
            EingehendeNachricht::AddUser(req) => assert_eq!(req.user_id, uid("alice")),
            andere => panic!("Falscher Typ: {}", andere.typ()),
        }
    }

    #[test]
    fn call_request_alias() {
        let n = EingehendeNachricht::parsen(
            r#"{"type":"callRequest","callFrom":"alice","callTo":"bob"}"#,
        )
        .unwrap();
        match n {
            EingehendeNachricht::Call(req) => {
                assert_eq!(req.call_from, Some(uid("alice")));
                assert_eq!(req.call_to, uid("bob"));
            }
            andere => panic!("Falscher Typ: {}", andere.typ()),
        }
    }

    #[test]
    fn reject_alias() {
        let n = EingehendeNachricht::parsen(r#"{"type":"reject","toUser":"alice","fromUser":"bob"}"#)
            .unwrap();
        assert!(matches!(n, EingehendeNachricht::CallRejected(_)));
    }

    #[test]
    fn session_id_optional() {
        let sid = SessionId::new();
        let text = format!(r#"{{"type":"endCall","toUser":"bob","sessionId":"{}"}}"#, sid.0);
        match EingehendeNachricht::parsen(&text).unwrap() {
            EingehendeNachricht::EndCall(adr) => {
                assert_eq!(adr.session_id, Some(sid));
                assert!(adr.from_user.is_none());
            }
            andere => panic!("Falscher Typ: {}", andere.typ()),
        }
    }

    #[test]
    fn unbekannter_typ() {
        let err = EingehendeNachricht::parsen(r#"{"type":"subscribe"}"#).unwrap_err();
        assert!(matches!(err, ProtokollFehler::UnbekannterTyp(t) if t == "subscribe"));
    }

    #[test]
    fn fehlendes_pflichtfeld() {
        let err = EingehendeNachricht::parsen(r#"{"type":"offer","toUser":"bob"}"#).unwrap_err();
        assert!(matches!(err, ProtokollFehler::Json(_)));
    }

    #[test]
    fn leere_user_id_abgelehnt() {
        assert!(EingehendeNachricht::parsen(r#"{"type":"addUser","userId":""}"#).is_err());
    }

    #[test]
    fn kein_json() {
        assert!(EingehendeNachricht::parsen("hallo").is_err());
    }

    #[test]
    fn sdp_wird_byte_genau_weitergereicht() {
        // Schluesselreihenfolge und Leerzeichen muessen erhalten bleiben
        let sdp = r#"{ "type":"offer",  "sdp":"v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\n" }"#;
        let text = format!(r#"{{"type":"offer","toUser":"bob","fromUser":"alice","offer":{sdp}}}"#);

        let offer = match EingehendeNachricht::parsen(&text).unwrap() {
            EingehendeNachricht::Offer(req) => req.offer,
            andere => panic!("Falscher Typ: {}", andere.typ()),
        };
        assert_eq!(offer.get(), sdp);

        let aus = AusgehendeNachricht::Offer {
            from_user: uid("alice"),
            offer,
            session_id: SessionId::new(),
        };
        assert!(aus.zu_json().unwrap().contains(sdp));
    }

    #[test]
    fn kandidat_behaelt_id_und_label() {
        let text = r#"{"type":"candidate","toUser":"bob","candidate":{"id":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","label":0}}"#;
        let kandidat = match EingehendeNachricht::parsen(text).unwrap() {
            EingehendeNachricht::Candidate(req) => req.candidate,
            andere => panic!("Falscher Typ: {}", andere.typ()),
        };
        assert_eq!(kandidat.label, Some(0));
        assert!(kandidat.id.starts_with("candidate:1"));
    }

    #[test]
    fn ausgehend_user_list_format() {
        let n = AusgehendeNachricht::UserList {
            users: vec![uid("alice"), uid("bob")],
        };
        assert_eq!(
            n.zu_json().unwrap(),
            r#"{"type":"userList","users":["alice","bob"]}"#
        );
    }

    #[test]
    fn ausgehend_felder_in_camel_case() {
        let n = AusgehendeNachricht::UserOffline { to_user: uid("bob") };
        assert_eq!(n.zu_json().unwrap(), r#"{"type":"userOffline","toUser":"bob"}"#);

        let sid = SessionId::new();
        let json = AusgehendeNachricht::IncomingCall {
            call_from: uid("alice"),
            caller: uid("alice"),
            session_id: sid,
        }
        .zu_json()
        .unwrap();
        assert!(json.contains(r#""type":"incomingCall""#));
        assert!(json.contains(r#""callFrom":"alice""#));
        assert!(json.contains(&format!(r#""sessionId":"{}""#, sid.0)));
    }

    #[test]
    fn fehler_envelope_format() {
        let n = AusgehendeNachricht::fehler(FehlerCode::Busy, "besetzt");
        assert_eq!(
            n.zu_json().unwrap(),
            r#"{"type":"error","code":"BUSY","message":"besetzt"}"#
        );
        assert_eq!(FehlerCode::Busy.als_str(), "BUSY");
    }
}
