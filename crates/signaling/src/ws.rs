//! WebSocket-Listener – Bindet Socket, nimmt Upgrades an
//!
//! Der `SignalingServer` bedient drei gleichwertige Pfade:
//! - `/ws`   – Standard-Endpunkt
//! - `/list` und `/call` – Pfade aelterer Clients, die Presence und
//!   Anrufsteuerung ueber getrennte Sockets fuehren. Beide Sockets
//!   desselben Benutzers verdraengen sich nicht gegenseitig.
//!
//! Optional meldet `?user=<id>` die Verbindung direkt beim Aufbau an.
//! Jede Verbindung laeuft als eigener tokio-Task in einer `ClientConnection`.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fernruf_core::types::UserId;
use fernruf_observability::HealthState;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::connection::ClientConnection;
use crate::router::Endpunkt;
use crate::server_state::SignalingState;

/// Query-Parameter beim Verbindungsaufbau
#[derive(Debug, Default, Deserialize)]
struct VerbindungsParameter {
    user: Option<String>,
}

#[derive(Clone)]
struct WsZustand {
    state: Arc<SignalingState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    bind_addr: SocketAddr,
}

impl SignalingServer {
    /// Erstellt einen neuen SignalingServer
    pub fn neu(state: Arc<SignalingState>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Bindet den Socket und bedient Verbindungen
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt. Solange der
    /// Socket gebunden ist, meldet `health` Bereitschaft.
    pub async fn starten(
        self,
        shutdown_rx: watch::Receiver<bool>,
        health: HealthState,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener(listener, shutdown_rx, health).await
    }

    /// Wie `starten`, aber mit bereits gebundenem Listener
    pub async fn mit_listener(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
        health: HealthState,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "WebSocket Signaling-Server gestartet");
        health.signaling_status_setzen(true);

        let app = router(Arc::clone(&self.state), shutdown_rx.clone());
        let mut signal_rx = shutdown_rx;
        let ergebnis = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while signal_rx.changed().await.is_ok() {
                if *signal_rx.borrow() {
                    break;
                }
            }
            tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
        })
        .await;

        health.signaling_status_setzen(false);
        tracing::info!("WebSocket Signaling-Server gestoppt");
        ergebnis
    }

    /// Gibt die Bind-Adresse zurueck
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

/// Axum-Router mit allen WebSocket-Pfaden
pub fn router(state: Arc<SignalingState>, shutdown_rx: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/list", get(list_handler))
        .route("/call", get(call_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(WsZustand { state, shutdown_rx })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(parameter): Query<VerbindungsParameter>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(zustand): State<WsZustand>,
) -> Response {
    verbinden(ws, parameter, peer_addr, zustand, Endpunkt::Standard)
}

async fn list_handler(
    ws: WebSocketUpgrade,
    Query(parameter): Query<VerbindungsParameter>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(zustand): State<WsZustand>,
) -> Response {
    verbinden(ws, parameter, peer_addr, zustand, Endpunkt::Liste)
}

async fn call_handler(
    ws: WebSocketUpgrade,
    Query(parameter): Query<VerbindungsParameter>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(zustand): State<WsZustand>,
) -> Response {
    verbinden(ws, parameter, peer_addr, zustand, Endpunkt::Anruf)
}

/// Prueft Parameter und Client-Limit und uebernimmt die Verbindung
fn verbinden(
    ws: WebSocketUpgrade,
    parameter: VerbindungsParameter,
    peer_addr: SocketAddr,
    zustand: WsZustand,
    endpunkt: Endpunkt,
) -> Response {
    let start_user = match parameter.user.filter(|u| !u.is_empty()).map(UserId::parse) {
        None => None,
        Some(Ok(user_id)) => Some(user_id),
        Some(Err(e)) => {
            tracing::debug!(peer = %peer_addr, fehler = %e, "Ungueltiger user-Parameter");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Client-Limit pruefen
    if !zustand.state.verbindung_reservieren() {
        tracing::warn!(
            peer = %peer_addr,
            max = zustand.state.config.max_clients,
            "Server voll – Verbindung abgelehnt"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Server voll").into_response();
    }

    let WsZustand { state, shutdown_rx } = zustand;
    let bei_fehler = Arc::clone(&state);
    ws.on_failed_upgrade(move |e| {
        tracing::debug!(peer = %peer_addr, fehler = %e, "WebSocket-Upgrade fehlgeschlagen");
        bei_fehler.verbindung_freigeben();
    })
    .on_upgrade(move |socket| async move {
        ClientConnection::neu(state, peer_addr, endpunkt)
            .verarbeiten(socket, start_user, shutdown_rx)
            .await;
    })
}
