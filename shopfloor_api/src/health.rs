//! Liveness and readiness probes.
//!
//! `/health/live` answers 200 as long as the process runs; `/health/ready`
//! requires the OPC UA sink to have started and a short startup grace period
//! to have passed. `/health` aliases readiness for container healthchecks.

use crate::types::HealthStatus;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// Shared readiness flags, written by the driver, read by the probes.
pub struct HealthState {
    opcua_ready: AtomicBool,
    driver_started: AtomicBool,
    started_at: Instant,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            opcua_ready: AtomicBool::new(false),
            driver_started: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn set_opcua_ready(&self, ready: bool) {
        self.opcua_ready.store(ready, Ordering::Relaxed);
    }

    pub fn set_driver_started(&self, started: bool) {
        self.driver_started.store(started, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.opcua_ready.load(Ordering::Relaxed)
            && self.driver_started.load(Ordering::Relaxed)
            && self.started_at.elapsed() > STARTUP_GRACE
    }

    fn checks(&self) -> BTreeMap<String, String> {
        let mut checks = BTreeMap::new();
        checks.insert(
            "opcua_server".to_string(),
            if self.opcua_ready.load(Ordering::Relaxed) {
                "healthy".to_string()
            } else {
                "not_ready".to_string()
            },
        );
        checks.insert(
            "driver".to_string(),
            if self.driver_started.load(Ordering::Relaxed) {
                "started".to_string()
            } else {
                "not_started".to_string()
            },
        );
        checks.insert(
            "startup".to_string(),
            if self.started_at.elapsed() > STARTUP_GRACE {
                "complete".to_string()
            } else {
                "in_progress".to_string()
            },
        );
        checks
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn handle_live() -> impl IntoResponse {
    Json(HealthStatus {
        status: "alive".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks: None,
    })
}

pub async fn handle_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.health.is_ready();
    let status = HealthStatus {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks: Some(state.health.checks()),
    };
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_until_all_flags() {
        let health = HealthState::new();
        assert!(!health.is_ready());
        health.set_opcua_ready(true);
        assert!(!health.is_ready());
        health.set_driver_started(true);
        // Startup grace still pending right after construction.
        assert!(!health.is_ready());
        let checks = health.checks();
        assert_eq!(checks["opcua_server"], "healthy");
        assert_eq!(checks["driver"], "started");
        assert_eq!(checks["startup"], "in_progress");
    }
}
