//! Health-Check-Endpunkt fuer Rendezvous
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl verbundener Clients

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::SignalingMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Verbindungslimit erreicht, neue Clients werden abgewiesen
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    metriken: SignalingMetrics,
    max_verbindungen: usize,
}

impl HealthState {
    pub fn neu(metriken: SignalingMetrics, max_verbindungen: usize) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            metriken,
            max_verbindungen,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn verbindungen(&self) -> u64 {
        self.metriken.connections.get().max(0) as u64
    }

    pub fn status(&self) -> HealthStatus {
        if self.verbindungen() >= self.max_verbindungen as u64 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            connections: self.verbindungen(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
///
/// Auch `degraded` liefert 200, damit Liveness-Probes nicht fehlschlagen.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max: usize) -> HealthState {
        HealthState::neu(SignalingMetrics::neu().unwrap(), max)
    }

    #[test]
    fn health_state_frisch_erstellt() {
        let state = state(10);
        assert!(state.uptime_seconds() < 5);
        assert_eq!(state.verbindungen(), 0);
        assert_eq!(state.status(), HealthStatus::Healthy);
    }

    #[test]
    fn voller_server_ist_degraded() {
        let state = state(2);
        state.metriken.connections.set(2);
        assert_eq!(state.status(), HealthStatus::Degraded);
        state.metriken.connections.dec();
        assert_eq!(state.status(), HealthStatus::Healthy);
    }

    #[test]
    fn health_response_serialisierung() {
        let state = state(10);
        state.metriken.connections.set(3);

        let json = serde_json::to_string(&state.antwort()).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"connections\":3"));
        assert!(json.contains(&format!("\"version\":\"{}\"", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn health_response_deserialisierung() {
        let json = r#"{"status":"degraded","version":"0.1.0","uptime_seconds":100,"connections":512}"#;
        let response: HealthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.uptime_seconds, 100);
        assert_eq!(response.connections, 512);
    }
}
