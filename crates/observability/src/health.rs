//! Health-Check-Endpunkt fuer Fernruf
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Signaling-Status

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub signaling_listening: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Der WebSocket-Server setzt `signaling_listening`, sobald sein Socket
/// gebunden ist, und nimmt es beim Herunterfahren zurueck.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    signaling_listening: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            signaling_listening: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn signaling_bereit(&self) -> bool {
        self.signaling_listening.load(Ordering::Relaxed)
    }

    pub fn signaling_status_setzen(&self, bereit: bool) {
        self.signaling_listening.store(bereit, Ordering::Relaxed);
    }

    fn antwort(&self) -> (StatusCode, HealthResponse) {
        let bereit = self.signaling_bereit();
        let (status, http_status) = if bereit {
            (HealthStatus::Healthy, StatusCode::OK)
        } else {
            (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE)
        };
        (
            http_status,
            HealthResponse {
                status,
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_seconds: self.uptime_seconds(),
                signaling_listening: bereit,
            },
        )
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (http_status, response) = state.antwort();
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frisch_gestartet_nicht_bereit() {
        let state = HealthState::neu();
        assert!(!state.signaling_bereit());
        let (code, antwort) = state.antwort();
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(antwort.status, HealthStatus::Unhealthy);
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn bereit_nach_signaling_start() {
        let state = HealthState::neu();
        let geteilt = state.clone();
        geteilt.signaling_status_setzen(true);

        let (code, antwort) = state.antwort();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert!(antwort.signaling_listening);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            signaling_listening: true,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"signaling_listening\":true"));
    }
}
