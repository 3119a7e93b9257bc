//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung laeuft in einem eigenen tokio-Task. Eingehende
//! Text-Frames gehen an den Dispatcher, ausgehende Envelopes kommen aus
//! der Send-Queue der Verbindung.
//!
//! ## Ablauf
//! ```text
//! Upgrade -> iceConfig -> (optional Anmeldung per ?user=) -> Schleife
//!     Schleife endet bei: Close-Frame, Lesefehler, Inaktivitaet,
//!                         Verdraengung/volle Queue, Shutdown
//! -> Abmeldung (beendet Anrufe wenn es die letzte Verbindung war)
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen WebSocket-Ping
//! - Kommt `verbindungs_timeout_sek` lang kein Frame, wird getrennt

use axum::extract::ws::{Message, WebSocket};
use fernruf_core::types::{UserId, VerbindungsId};
use fernruf_protocol::AusgehendeNachricht;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::error::SignalingError;
use crate::router::{ClientSender, Endpunkt};
use crate::server_state::SignalingState;

/// Grund fuer das Ende der Verbindungsschleife
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trennungsgrund {
    VomClient,
    Lesefehler,
    Sendefehler,
    Inaktiv,
    Abgetrennt,
    Shutdown,
}

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    endpunkt: Endpunkt,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr, endpunkt: Endpunkt) -> Self {
        Self {
            state,
            peer_addr,
            endpunkt,
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht. Der Verbindungsplatz muss vorher reserviert worden sein und
    /// wird hier freigegeben.
    pub async fn verarbeiten(
        self,
        socket: WebSocket,
        start_user: Option<UserId>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        let config = Arc::clone(&self.state.config);
        let keepalive_intervall = Duration::from_secs(config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(config.verbindungs_timeout_sek);

        let (sender, mut sende_rx) =
            ClientSender::neu(VerbindungsId::naechste(), config.sende_queue_groesse);
        let sender = sender.mit_endpunkt(self.endpunkt);
        let verbindung_id = sender.verbindung_id;
        tracing::info!(
            peer = %peer_addr,
            verbindung = %verbindung_id,
            endpunkt = ?self.endpunkt,
            "Neue Verbindung"
        );

        let (mut ws_tx, mut ws_rx) = socket.split();
        let mut ctx = DispatcherContext {
            peer_addr,
            sender: sender.clone(),
            user_id: None,
        };
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        sender.senden(AusgehendeNachricht::IceConfig {
            ice_servers: config.ice_server.clone(),
        });
        if let Some(user_id) = start_user {
            dispatcher.anmelden(user_id, &mut ctx);
        }

        let mut keepalive = tokio::time::interval(keepalive_intervall);
        keepalive.tick().await;
        let mut letzter_empfang = Instant::now();

        let grund = loop {
            tokio::select! {
                // Eingehender Frame vom Browser
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        letzter_empfang = Instant::now();
                        dispatcher.dispatch(&text, &mut ctx);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        letzter_empfang = Instant::now();
                        dispatcher.abweisen(
                            &ctx,
                            SignalingError::fehlerhaft("Binaer-Frames werden nicht unterstuetzt"),
                        );
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        letzter_empfang = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break Trennungsgrund::VomClient,
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "WebSocket-Lesefehler");
                        break Trennungsgrund::Lesefehler;
                    }
                },

                // Ausgehender Envelope aus der Send-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if !senden(&mut ws_tx, &ausgehend, peer_addr).await {
                        break Trennungsgrund::Sendefehler;
                    }
                }

                // Keepalive und Inaktivitaet
                _ = keepalive.tick() => {
                    if timeout_dauer > Duration::ZERO && letzter_empfang.elapsed() > timeout_dauer {
                        tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
                        break Trennungsgrund::Inaktiv;
                    }
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break Trennungsgrund::Sendefehler;
                    }
                }

                // Verdraengt durch neue Anmeldung oder Send-Queue uebergelaufen
                _ = sender.geschlossen() => break Trennungsgrund::Abgetrennt,

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break Trennungsgrund::Shutdown;
                    }
                }
            }
        };

        if grund == Trennungsgrund::Abgetrennt {
            // Bereits eingereihte Nachrichten (z.B. die Verdraengungs-Diagnose) noch zustellen
            sende_queue_leeren(&mut sende_rx, &mut ws_tx, peer_addr).await;
        }
        if grund != Trennungsgrund::Sendefehler {
            let _ = ws_tx.send(Message::Close(None)).await;
        }
        sender.schliessen();

        // Cleanup beim Verbindungsende
        let abmeldung = self.state.lifecycle.getrennt(verbindung_id);
        self.state.verbindung_freigeben();
        tracing::info!(
            peer = %peer_addr,
            verbindung = %verbindung_id,
            user_id = ?abmeldung.as_ref().map(|a| &a.user_id),
            grund = ?grund,
            "Verbindung beendet"
        );
    }
}

async fn senden(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    nachricht: &AusgehendeNachricht,
    peer_addr: SocketAddr,
) -> bool {
    let text = match nachricht.zu_json() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(peer = %peer_addr, typ = nachricht.typ(), fehler = %e, "Serialisierung fehlgeschlagen");
            return true;
        }
    };
    match ws_tx.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
            false
        }
    }
}

async fn sende_queue_leeren(
    sende_rx: &mut mpsc::Receiver<AusgehendeNachricht>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    peer_addr: SocketAddr,
) {
    while let Ok(nachricht) = sende_rx.try_recv() {
        if !senden(ws_tx, &nachricht, peer_addr).await {
            break;
        }
    }
}
