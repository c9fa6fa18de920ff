//! Health-Check-Endpunkt
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Relay-Zustand

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
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub relay_aktiv: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    relay_aktiv: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            relay_aktiv: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn relay_aktiv(&self) -> bool {
        self.relay_aktiv.load(Ordering::Relaxed)
    }

    pub fn relay_status_setzen(&self, aktiv: bool) {
        self.relay_aktiv.store(aktiv, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        let relay_aktiv = self.relay_aktiv();
        HealthResponse {
            status: if relay_aktiv {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            relay_aktiv,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – 200 auch bei degraded (Healthcheck soll nicht failen)
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ohne_relay_degraded() {
        let state = HealthState::neu();
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Degraded);
        assert!(!antwort.relay_aktiv);
        assert!(antwort.uptime_seconds < 5);
    }

    #[test]
    fn relay_status_umschalten() {
        let state = HealthState::neu();
        let kopie = state.clone();
        kopie.relay_status_setzen(true);
        assert_eq!(state.antwort().status, HealthStatus::Healthy);
        kopie.relay_status_setzen(false);
        assert!(!state.relay_aktiv());
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            relay_aktiv: true,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"relay_aktiv\":true"));
    }
}
