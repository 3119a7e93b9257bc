//! Szenario-Tests ueber den Dispatcher
//!
//! Jeder Client ist ein `DispatcherContext` mit eigener Send-Queue. Was der
//! Browser sehen wuerde, wird als JSON aus der Queue gelesen.

use std::sync::Arc;
use std::time::Duration;

use fernruf_core::types::{UserId, VerbindungsId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::AusgehendeNachricht;
use fernruf_signaling::{
    ClientSender, DispatcherContext, Endpunkt, MessageDispatcher, SessionZustand,
    SignalingConfig, SignalingState,
};
use serde_json::Value;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Hilfen
// ---------------------------------------------------------------------------

struct Client {
    ctx: DispatcherContext,
    rx: mpsc::Receiver<AusgehendeNachricht>,
}

impl Client {
    fn neu() -> Self {
        Self::mit_endpunkt(Endpunkt::Standard)
    }

    fn mit_endpunkt(endpunkt: Endpunkt) -> Self {
        let (sender, rx) = ClientSender::neu(VerbindungsId::naechste(), 512);
        let sender = sender.mit_endpunkt(endpunkt);
        Self {
            ctx: DispatcherContext {
                peer_addr: "127.0.0.1:50000".parse().unwrap(),
                sender,
                user_id: None,
            },
            rx,
        }
    }

    fn schicken(&mut self, d: &MessageDispatcher, json: &str) {
        d.dispatch(json, &mut self.ctx);
    }

    /// Alle seit dem letzten Aufruf empfangenen Envelopes als JSON
    fn alle(&mut self) -> Vec<Value> {
        let mut alle = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            alle.push(serde_json::from_str(&n.zu_json().unwrap()).unwrap());
        }
        alle
    }

    /// Wie `alle`, aber ohne Benutzerlisten
    fn nachrichten(&mut self) -> Vec<Value> {
        self.alle()
            .into_iter()
            .filter(|v| v["type"] != "userList")
            .collect()
    }

    fn typen(&mut self) -> Vec<String> {
        self.nachrichten()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn verbindung(&self) -> VerbindungsId {
        self.ctx.sender.verbindung_id
    }
}

fn aufbau(config: SignalingConfig) -> (Arc<SignalingState>, MessageDispatcher) {
    let state = SignalingState::neu(config, FernrufMetrics::neu().unwrap());
    let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
    (state, dispatcher)
}

fn angemeldet(d: &MessageDispatcher, name: &str) -> Client {
    let mut c = Client::neu();
    c.schicken(d, &format!(r#"{{"type":"addUser","userId":"{name}"}}"#));
    c.alle();
    c
}

fn uid(s: &str) -> UserId {
    UserId::parse(s).unwrap()
}

// ---------------------------------------------------------------------------
// Szenarien
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_kompletter_anruf_auf_dem_draht() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");
    alice.alle();

    alice.schicken(&d, r#"{"type":"call","callFrom":"alice","callTo":"bob"}"#);
    let klingeln = bob.nachrichten();
    assert_eq!(klingeln.len(), 1);
    assert_eq!(klingeln[0]["type"], "incomingCall");
    assert_eq!(klingeln[0]["callFrom"], "alice");
    assert_eq!(klingeln[0]["caller"], "alice");
    let session_id = klingeln[0]["sessionId"].as_str().unwrap().to_string();

    bob.schicken(&d, r#"{"type":"callAccepted","toUser":"alice","fromUser":"bob"}"#);
    let angenommen = alice.nachrichten();
    assert_eq!(angenommen[0]["type"], "callAccepted");
    assert_eq!(angenommen[0]["fromUser"], "bob");
    assert_eq!(angenommen[0]["sessionId"], session_id.as_str());

    // SDP wird byte-genau weitergereicht
    let offer = r#"{"type":"offer","sdp":"v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\n"}"#;
    alice.schicken(
        &d,
        &format!(r#"{{"type":"offer","toUser":"bob","offer":{offer}}}"#),
    );
    let mut roh = Vec::new();
    while let Ok(n) = bob.rx.try_recv() {
        roh.push(n.zu_json().unwrap());
    }
    assert_eq!(roh.len(), 1);
    assert!(roh[0].contains(offer), "SDP veraendert: {}", roh[0]);

    bob.schicken(
        &d,
        r#"{"type":"answer","toUser":"alice","answer":{"type":"answer","sdp":"v=0"}}"#,
    );
    let antwort = alice.nachrichten();
    assert_eq!(antwort[0]["type"], "answer");
    assert_eq!(antwort[0]["answer"]["sdp"], "v=0");

    for c in 1..=3 {
        alice.schicken(
            &d,
            &format!(r#"{{"type":"candidate","toUser":"bob","candidate":{{"id":"c{c}","label":0}}}}"#),
        );
    }
    let kandidaten: Vec<String> = bob
        .nachrichten()
        .iter()
        .map(|v| v["candidate"]["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kandidaten, vec!["c1", "c2", "c3"]);

    bob.schicken(&d, r#"{"type":"endCall","toUser":"alice"}"#);
    let ende = alice.nachrichten();
    assert_eq!(ende[0]["type"], "endCall");
    assert_eq!(ende[0]["fromUser"], "bob");
    assert_eq!(state.sessions.aktive_anzahl(), 0);
    assert!(alice.nachrichten().is_empty());
    assert!(bob.nachrichten().is_empty());
}

#[tokio::test]
async fn test_zweiter_anruf_ist_besetzt() {
    let (_, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    bob.schicken(&d, r#"{"type":"call","callTo":"alice"}"#);

    let fehler = bob.nachrichten();
    let fehler: Vec<&Value> = fehler.iter().filter(|v| v["type"] == "error").collect();
    assert_eq!(fehler.len(), 1);
    assert_eq!(fehler[0]["code"], "BUSY");
    assert_eq!(alice.typen(), Vec::<String>::new());
}

#[tokio::test]
async fn test_kandidaten_reihenfolge_bei_parallelen_anrufen() {
    let (_, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");
    let mut carol = angemeldet(&d, "carol");
    let mut dave = angemeldet(&d, "dave");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    carol.schicken(&d, r#"{"type":"call","callTo":"dave"}"#);
    bob.schicken(&d, r#"{"type":"callAccepted","toUser":"alice"}"#);
    dave.schicken(&d, r#"{"type":"callAccepted","toUser":"carol"}"#);
    alice.schicken(&d, r#"{"type":"offer","toUser":"bob","offer":{"sdp":"a"}}"#);
    carol.schicken(&d, r#"{"type":"offer","toUser":"dave","offer":{"sdp":"c"}}"#);
    for c in [&mut alice, &mut bob, &mut carol, &mut dave] {
        c.alle();
    }

    // Kandidaten beider Angerufener vor ihren Antworten, verschraenkt
    for i in 0..5 {
        bob.schicken(
            &d,
            &format!(r#"{{"type":"candidate","toUser":"alice","candidate":{{"id":"b{i}"}}}}"#),
        );
        dave.schicken(
            &d,
            &format!(r#"{{"type":"candidate","toUser":"carol","candidate":{{"id":"d{i}"}}}}"#),
        );
    }
    assert!(alice.nachrichten().is_empty());
    assert!(carol.nachrichten().is_empty());

    dave.schicken(&d, r#"{"type":"answer","toUser":"carol","answer":{"sdp":"d"}}"#);
    bob.schicken(&d, r#"{"type":"answer","toUser":"alice","answer":{"sdp":"b"}}"#);

    let bei_alice: Vec<String> = alice
        .nachrichten()
        .iter()
        .map(|v| match v["type"].as_str() {
            Some("candidate") => v["candidate"]["id"].as_str().unwrap().to_string(),
            Some(t) => t.to_string(),
            None => String::new(),
        })
        .collect();
    assert_eq!(bei_alice, vec!["answer", "b0", "b1", "b2", "b3", "b4"]);

    let bei_carol: Vec<String> = carol
        .nachrichten()
        .iter()
        .map(|v| match v["type"].as_str() {
            Some("candidate") => v["candidate"]["id"].as_str().unwrap().to_string(),
            Some(t) => t.to_string(),
            None => String::new(),
        })
        .collect();
    assert_eq!(bei_carol, vec!["answer", "d0", "d1", "d2", "d3", "d4"]);
}

#[tokio::test]
async fn test_angebot_vor_annahme_ist_ungueltig() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    bob.alle();
    alice.schicken(&d, r#"{"type":"offer","toUser":"bob","offer":{"sdp":"x"}}"#);

    let fehler = alice.nachrichten();
    assert_eq!(fehler.len(), 1);
    assert_eq!(fehler[0]["code"], "INVALID_TRANSITION");
    assert!(bob.nachrichten().is_empty());

    let id = state.sessions.aktive_session(&uid("alice"), &uid("bob")).unwrap();
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Klingelt));
}

#[tokio::test]
async fn test_antwort_vor_angebot_ist_ungueltig() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    bob.schicken(&d, r#"{"type":"callAccepted","toUser":"alice"}"#);
    alice.alle();
    bob.alle();
    let id = state.sessions.aktive_session(&uid("alice"), &uid("bob")).unwrap();

    bob.schicken(&d, r#"{"type":"answer","toUser":"alice","answer":{"sdp":"zu frueh"}}"#);

    let fehler = bob.nachrichten();
    assert_eq!(fehler.len(), 1);
    assert_eq!(fehler[0]["code"], "INVALID_TRANSITION");
    assert!(alice.nachrichten().is_empty());
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Angenommen));

    // Zweite Antwort im laufenden Gespraech ebenso
    alice.schicken(&d, r#"{"type":"offer","toUser":"bob","offer":{"sdp":"o"}}"#);
    bob.schicken(&d, r#"{"type":"answer","toUser":"alice","answer":{"sdp":"a"}}"#);
    alice.alle();
    bob.alle();
    bob.schicken(&d, r#"{"type":"answer","toUser":"alice","answer":{"sdp":"nochmal"}}"#);
    assert_eq!(bob.nachrichten()[0]["code"], "INVALID_TRANSITION");
    assert!(alice.nachrichten().is_empty());
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Aktiv));
}

#[tokio::test(start_paused = true)]
async fn test_klingel_timeout_benachrichtigt_beide() {
    let config = SignalingConfig {
        klingel_timeout_sek: 10,
        ..SignalingConfig::default()
    };
    let (state, d) = aufbau(config);
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    bob.alle();

    tokio::time::sleep(Duration::from_secs(11)).await;

    let bei_alice = alice.nachrichten();
    assert_eq!(bei_alice[0]["type"], "callTimedOut");
    assert_eq!(bei_alice[0]["withUser"], "bob");
    let bei_bob = bob.nachrichten();
    assert_eq!(bei_bob[0]["type"], "callTimedOut");
    assert_eq!(bei_bob[0]["withUser"], "alice");
    assert_eq!(state.sessions.aktive_anzahl(), 0);

    // Spaetes Annehmen scheitert
    bob.schicken(&d, r#"{"type":"callAccepted","toUser":"alice"}"#);
    assert_eq!(bob.nachrichten()[0]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_trennung_waehrend_aktivem_anruf() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"call","callTo":"bob"}"#);
    bob.schicken(&d, r#"{"type":"callAccepted","toUser":"alice"}"#);
    alice.schicken(&d, r#"{"type":"offer","toUser":"bob","offer":{"sdp":"o"}}"#);
    bob.schicken(&d, r#"{"type":"answer","toUser":"alice","answer":{"sdp":"a"}}"#);
    let id = state.sessions.aktive_session(&uid("alice"), &uid("bob")).unwrap();
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Aktiv));
    bob.alle();

    state.lifecycle.getrennt(alice.verbindung());

    let bei_bob = bob.alle();
    let ende: Vec<&Value> = bei_bob.iter().filter(|v| v["type"] == "endCall").collect();
    assert_eq!(ende.len(), 1);
    assert_eq!(ende[0]["fromUser"], "alice");
    let liste = bei_bob
        .iter()
        .filter(|v| v["type"] == "userList")
        .last()
        .unwrap();
    assert_eq!(liste["users"], serde_json::json!(["bob"]));
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Beendet));
}

#[tokio::test]
async fn test_benutzerliste_entspricht_presence() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut beobachter = angemeldet(&d, "zora");
    let mut clients: Vec<Client> = ["anna", "ben", "cleo", "dirk", "emil"]
        .iter()
        .map(|n| angemeldet(&d, n))
        .collect();

    // Jeder zweite geht wieder
    for c in clients.iter().step_by(2) {
        state.lifecycle.getrennt(c.verbindung());
    }

    let letzte = beobachter
        .alle()
        .into_iter()
        .filter(|v| v["type"] == "userList")
        .last()
        .unwrap();
    let erwartet: Vec<String> = state
        .presence
        .roster()
        .iter()
        .map(|u| u.to_string())
        .collect();
    assert_eq!(letzte["users"], serde_json::json!(erwartet));
    assert_eq!(erwartet, vec!["ben", "dirk", "zora"]);

    // Verbleibende Clients sehen dieselbe Liste
    for c in clients.iter_mut().skip(1).step_by(2) {
        let liste = c
            .alle()
            .into_iter()
            .filter(|v| v["type"] == "userList")
            .last()
            .unwrap();
        assert_eq!(liste["users"], serde_json::json!(erwartet));
    }
}

#[tokio::test]
async fn test_neue_anmeldung_verdraengt_alte_verbindung() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alt = angemeldet(&d, "alice");
    let mut neu = angemeldet(&d, "alice");

    let fehler = alt.nachrichten();
    assert_eq!(fehler[0]["type"], "error");
    assert_eq!(fehler[0]["code"], "DUPLICATE_REGISTRATION");
    assert!(alt.ctx.sender.ist_geschlossen());
    assert_eq!(state.presence.nachschlagen(&uid("alice")).len(), 1);

    // Die verdraengte Verbindung handelt nicht mehr
    alt.schicken(&d, r#"{"type":"chat","toUser":"alice","message":"echo"}"#);
    assert!(neu.nachrichten().is_empty());

    // Aufraeumen der alten Verbindung laesst alice online
    assert!(state.lifecycle.getrennt(alt.verbindung()).is_none());
    assert!(state.presence.ist_online(&uid("alice")));
}

#[tokio::test]
async fn test_zwei_socket_client_telefoniert() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut liste = Client::mit_endpunkt(Endpunkt::Liste);
    let mut anruf = Client::mit_endpunkt(Endpunkt::Anruf);
    liste.schicken(&d, r#"{"type":"addUser","userId":"alice"}"#);
    anruf.schicken(&d, r#"{"type":"addUser","userId":"alice"}"#);

    let alles: Vec<Value> = liste.alle().into_iter().chain(anruf.alle()).collect();
    assert!(
        alles.iter().all(|v| v["code"] != "DUPLICATE_REGISTRATION"),
        "Verdraengt: {alles:?}"
    );
    assert!(!liste.ctx.sender.ist_geschlossen());
    assert!(!anruf.ctx.sender.ist_geschlossen());
    assert_eq!(state.presence.nachschlagen(&uid("alice")).len(), 2);

    let mut bob = angemeldet(&d, "bob");
    liste.alle();
    anruf.alle();

    bob.schicken(&d, r#"{"type":"call","callTo":"alice"}"#);
    assert_eq!(anruf.typen(), vec!["incomingCall"]);
    anruf.schicken(&d, r#"{"type":"callAccepted","toUser":"bob"}"#);
    assert_eq!(bob.typen(), vec!["callAccepted"]);
    bob.schicken(&d, r#"{"type":"offer","toUser":"alice","offer":{"sdp":"o"}}"#);
    assert_eq!(anruf.typen(), vec!["offer"]);
    anruf.schicken(&d, r#"{"type":"answer","toUser":"bob","answer":{"sdp":"a"}}"#);
    assert_eq!(bob.typen(), vec!["answer"]);

    let id = state.sessions.aktive_session(&uid("alice"), &uid("bob")).unwrap();
    assert_eq!(state.sessions.zustand(&id), Some(SessionZustand::Aktiv));
    assert!(!liste.ctx.sender.ist_geschlossen());
    assert!(state.presence.ist_online(&uid("alice")));
}

#[tokio::test]
async fn test_aeltere_schreibweisen() {
    let (state, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"callRequest","callFrom":"alice","callTo":"bob"}"#);
    assert_eq!(bob.typen(), vec!["incomingCall"]);

    bob.schicken(&d, r#"{"type":"reject","toUser":"alice"}"#);
    assert_eq!(alice.typen(), vec!["callRejected"]);
    assert_eq!(state.sessions.aktive_anzahl(), 0);
}

#[tokio::test]
async fn test_chat_zwischen_benutzern() {
    let (_, d) = aufbau(SignalingConfig::default());
    let mut alice = angemeldet(&d, "alice");
    let mut bob = angemeldet(&d, "bob");

    alice.schicken(&d, r#"{"type":"chat","toUser":"bob","message":"Hallo Bob"}"#);
    let bei_bob = bob.nachrichten();
    assert_eq!(bei_bob[0]["type"], "chat");
    assert_eq!(bei_bob[0]["fromUser"], "alice");
    assert_eq!(bei_bob[0]["message"], "Hallo Bob");

    alice.schicken(&d, r#"{"type":"chat","toUser":"bob","message":"   "}"#);
    assert_eq!(alice.nachrichten()[0]["code"], "MALFORMED_ENVELOPE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gleichzeitige_anrufe_nur_einer_gewinnt() {
    let (state, d) = aufbau(SignalingConfig::default());
    let _alice = angemeldet(&d, "alice");
    let _bob = angemeldet(&d, "bob");

    let mut tasks = Vec::new();
    for i in 0..32 {
        let state = Arc::clone(&state);
        tasks.push(tokio::spawn(async move {
            let (von, an) = if i % 2 == 0 {
                (uid("alice"), uid("bob"))
            } else {
                (uid("bob"), uid("alice"))
            };
            state.sessions.anrufen(&von, &an).is_ok()
        }));
    }

    let mut erfolgreich = 0;
    for t in tasks {
        if t.await.unwrap() {
            erfolgreich += 1;
        }
    }
    assert_eq!(erfolgreich, 1);
    assert_eq!(state.sessions.aktive_anzahl(), 1);
}
