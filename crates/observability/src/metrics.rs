//! Prometheus-kompatible Metriken fuer Fernruf
//!
//! Registrierte Metriken:
//! - `fernruf_open_connections` – Gauge: Offene WebSocket-Verbindungen
//! - `fernruf_online_users` – Gauge: Benutzer mit mindestens einer Verbindung
//! - `fernruf_active_sessions` – Gauge: Nicht-terminale Anrufe
//! - `fernruf_envelopes_routed_total` – Counter: Zugestellte Envelopes (type)
//! - `fernruf_diagnostics_total` – Counter: Diagnosen an Absender (code)
//! - `fernruf_sessions_finished_total` – Counter: Beendete Anrufe (outcome)
//! - `fernruf_candidates_buffered_total` – Counter: Zwischengespeicherte Kandidaten
//! - `fernruf_call_setup_seconds` – Histogram: Klingeln bis ACTIVE

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Fernruf-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Zaehler.
#[derive(Clone)]
pub struct FernrufMetrics {
    pub registry: Arc<Registry>,

    // Presence
    pub open_connections: IntGauge,
    pub online_users: IntGauge,

    // Sessions
    pub active_sessions: IntGauge,
    pub sessions_finished_total: IntCounterVec,
    pub call_setup_seconds: Histogram,

    // Routing
    pub envelopes_routed_total: IntCounterVec,
    pub diagnostics_total: IntCounterVec,
    pub candidates_buffered_total: IntCounter,
}

impl FernrufMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Presence ---
        let open_connections = IntGauge::with_opts(Opts::new(
            "fernruf_open_connections",
            "Anzahl offener WebSocket-Verbindungen",
        ))?;
        registry.register(Box::new(open_connections.clone()))?;

        let online_users = IntGauge::with_opts(Opts::new(
            "fernruf_online_users",
            "Anzahl online Benutzer",
        ))?;
        registry.register(Box::new(online_users.clone()))?;

        // --- Sessions ---
        let active_sessions = IntGauge::with_opts(Opts::new(
            "fernruf_active_sessions",
            "Anzahl nicht-terminaler Anrufe",
        ))?;
        registry.register(Box::new(active_sessions.clone()))?;

        let sessions_finished_total = IntCounterVec::new(
            Opts::new(
                "fernruf_sessions_finished_total",
                "Beendete Anrufe nach Endzustand",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(sessions_finished_total.clone()))?;

        let call_setup_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "fernruf_call_setup_seconds",
                "Dauer vom Klingeln bis zur aktiven Verbindung in Sekunden",
            )
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(call_setup_seconds.clone()))?;

        // --- Routing ---
        let envelopes_routed_total = IntCounterVec::new(
            Opts::new(
                "fernruf_envelopes_routed_total",
                "Zugestellte Envelopes nach Typ",
            ),
            &["type"],
        )?;
        registry.register(Box::new(envelopes_routed_total.clone()))?;

        let diagnostics_total = IntCounterVec::new(
            Opts::new(
                "fernruf_diagnostics_total",
                "An Absender gemeldete Fehler nach Code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(diagnostics_total.clone()))?;

        let candidates_buffered_total = IntCounter::with_opts(Opts::new(
            "fernruf_candidates_buffered_total",
            "Kandidaten die bis zur Session-Beschreibung warten mussten",
        ))?;
        registry.register(Box::new(candidates_buffered_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            open_connections,
            online_users,
            active_sessions,
            sessions_finished_total,
            call_setup_seconds,
            envelopes_routed_total,
            diagnostics_total,
            candidates_buffered_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: FernrufMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<FernrufMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
