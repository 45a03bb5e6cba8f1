//! Prometheus-kompatible Metriken fuer Rendezvous
//!
//! Registrierte Metriken:
//! - `rendezvous_connections` – Gauge: Aktuell verbundene Clients
//! - `rendezvous_rooms_active` – Gauge: Raeume mit mindestens einem Mitglied
//! - `rendezvous_calls_established_total` – Counter: Zustande gekommene Anrufe
//! - `rendezvous_signals_relayed_total` – Counter: Weitergeleitete Aushandlungs-Nachrichten (kind)
//! - `rendezvous_signals_dropped_total` – Counter: Verworfene Nachrichten (Ziel unbekannt oder Queue voll)
//! - `rendezvous_transitions_rejected_total` – Counter: Abgelehnte Zustandsuebergaenge (reason)
//! - `rendezvous_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `rendezvous_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Rendezvous-Prometheus-Metriken
///
/// Klonen ist billig: alle Felder sind intern referenzgezaehlt.
#[derive(Clone)]
pub struct SignalingMetrics {
    pub registry: Arc<Registry>,

    // Signaling-Metriken
    pub connections: IntGauge,
    pub rooms_active: IntGauge,
    pub calls_established_total: IntCounter,
    pub signals_relayed_total: IntCounterVec,
    pub signals_dropped_total: IntCounter,
    pub transitions_rejected_total: IntCounterVec,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl SignalingMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Signaling-Metriken ---
        let connections = IntGauge::with_opts(Opts::new(
            "rendezvous_connections",
            "Anzahl aktuell verbundener Clients",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let rooms_active = IntGauge::with_opts(Opts::new(
            "rendezvous_rooms_active",
            "Anzahl nicht-leerer Raeume",
        ))?;
        registry.register(Box::new(rooms_active.clone()))?;

        let calls_established_total = IntCounter::with_opts(Opts::new(
            "rendezvous_calls_established_total",
            "Gesamtanzahl zustande gekommener Anrufe",
        ))?;
        registry.register(Box::new(calls_established_total.clone()))?;

        let signals_relayed_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_signals_relayed_total",
                "Gesamtanzahl weitergeleiteter Aushandlungs-Nachrichten",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(signals_relayed_total.clone()))?;

        let signals_dropped_total = IntCounter::with_opts(Opts::new(
            "rendezvous_signals_dropped_total",
            "Gesamtanzahl verworfener Nachrichten",
        ))?;
        registry.register(Box::new(signals_dropped_total.clone()))?;

        let transitions_rejected_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_transitions_rejected_total",
                "Gesamtanzahl abgelehnter Zustandsuebergaenge",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(transitions_rejected_total.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "rendezvous_http_requests_total",
                "Gesamtanzahl HTTP-Anfragen",
            ),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rendezvous_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections,
            rooms_active,
            calls_established_total,
            signals_relayed_total,
            signals_dropped_total,
            transitions_rejected_total,
            http_requests_total,
            http_request_duration_seconds,
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
pub fn metrics_router(metriken: SignalingMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<SignalingMetrics>) -> impl IntoResponse {
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
