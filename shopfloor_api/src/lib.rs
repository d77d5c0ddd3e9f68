//! Observer REST surface and health probes.
//!
//! A thin axum layer over the running simulation: status, machine list and
//! detail, live runtime-config read/write, and liveness/readiness probes.
//! JSON only, no authentication, CORS `*`. The simulation state sits behind
//! one coarse mutex shared with the driver loop; handlers hold it just long
//! enough to assemble a response between ticks.

pub mod handlers;
pub mod health;
pub mod types;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use shopfloor_common::runtime::RuntimeConfig;
use shopfloor_sim::Simulator;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use health::HealthState;

/// Shared state of the observer server.
#[derive(Clone)]
pub struct AppState {
    pub simulator_name: String,
    pub sim: Arc<Mutex<Simulator>>,
    /// Present in line mode only; `None` renders config endpoints 501.
    pub runtime: Option<Arc<RuntimeConfig>>,
    pub health: Arc<HealthState>,
}

impl AppState {
    pub fn new(
        simulator_name: String,
        sim: Arc<Mutex<Simulator>>,
        runtime: Option<Arc<RuntimeConfig>>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            simulator_name,
            sim,
            runtime,
            health,
        }
    }

    /// Lock the simulation, surviving a poisoned mutex from a caught panic.
    pub fn lock_sim(&self) -> MutexGuard<'_, Simulator> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build the observer router with all routes and the CORS layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_index))
        .route("/api/status", get(handlers::handle_status))
        .route("/api/machines", get(handlers::handle_machines))
        .route("/api/machines/:id", get(handlers::handle_machine_detail))
        .route(
            "/api/config",
            get(handlers::handle_config_get)
                .post(handlers::handle_config_update)
                .options(handlers::handle_config_options),
        )
        .route("/health", get(health::handle_ready))
        .route("/health/live", get(health::handle_live))
        .route("/health/ready", get(health::handle_ready))
        .layer(from_fn(cors_middleware))
        .with_state(state)
}

/// Allow any origin; the observer is an unauthenticated read surface.
async fn cors_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shopfloor_common::config::{Config, ShiftModel};
    use shopfloor_sim::machines::welding::WeldingConfig;
    use shopfloor_sim::{Coordinator, LineConfig, MachineConfig, WeldingRobot};
    use std::time::Duration;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    fn machine_config(runtime: Option<Arc<RuntimeConfig>>) -> MachineConfig {
        MachineConfig {
            name: "WeldingRobot".into(),
            cycle_time: Duration::from_secs(10),
            setup_time: Duration::from_secs(2),
            scrap_rate: 0.0,
            error_rate: 0.0,
            publish_interval: Duration::from_secs(1),
            runtime,
        }
    }

    fn static_config() -> Config {
        Config {
            line_type: Some("line".into()),
            simulator_name: "TestLine".into(),
            opcua_port: 4840,
            health_port: 8081,
            erp_endpoint: String::new(),
            erp_order_path: String::new(),
            erp_shift_path: String::new(),
            publish_interval: Duration::from_secs(1),
            cycle_time: Duration::from_secs(12),
            setup_time: Duration::from_secs(2),
            scrap_rate: 0.03,
            error_rate: 0.02,
            order_min_qty: 50,
            order_max_qty: 500,
            timezone: "UTC".into(),
            shift_model: ShiftModel::ThreeShift,
        }
    }

    fn welding_state() -> AppState {
        let robot = WeldingRobot::with_seed(
            machine_config(None),
            WeldingConfig::default(),
            t0(),
            1,
        );
        AppState::new(
            "TestRobot".into(),
            Arc::new(Mutex::new(Simulator::Welding(robot))),
            None,
            Arc::new(HealthState::new()),
        )
    }

    fn line_state() -> AppState {
        let runtime = Arc::new(RuntimeConfig::new(&static_config()));
        let mut base = machine_config(Some(runtime.clone()));
        base.cycle_time = Duration::from_secs(12);
        let mut line = Coordinator::with_seed(LineConfig::default(), base, t0(), 1);
        line.start(t0());
        AppState::new(
            "TestLine".into(),
            Arc::new(Mutex::new(Simulator::Line(line))),
            Some(runtime),
            Arc::new(HealthState::new()),
        )
    }

    async fn spawn_server(state: AppState) -> String {
        let app = router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_status_welding_mode() {
        let base = spawn_server(welding_state()).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["mode"], "welding-robot");
        assert_eq!(body["simulatorName"], "TestRobot");
        assert_eq!(body["machines"][0]["id"], "welding");
        assert_eq!(body["machines"][0]["namespace"], 2);
        assert!(body.get("line").is_none());
    }

    #[tokio::test]
    async fn test_status_line_mode_lists_three_machines() {
        let base = spawn_server(line_state()).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["mode"], "production-line");
        assert_eq!(body["machines"].as_array().unwrap().len(), 3);
        assert_eq!(body["machines"][2]["id"], "spotwelder");
        assert_eq!(body["machines"][2]["namespace"], 4);
        assert_eq!(body["line"]["lineState"], "Running");
    }

    #[tokio::test]
    async fn test_machines_list_and_detail() {
        let base = spawn_server(line_state()).await;

        let list: serde_json::Value = reqwest::get(format!("{base}/api/machines"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let machines = list["machines"].as_array().unwrap();
        assert_eq!(machines.len(), 3);
        assert_eq!(machines[0]["stateName"], "Idle");

        let detail: serde_json::Value = reqwest::get(format!("{base}/api/machines/forming"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["name"], "FormingMachine");
        assert!(detail["data"].get("Pressure").is_some());
        let nodes = detail["nodes"].as_array().unwrap();
        assert!(nodes
            .iter()
            .any(|n| n["nodeId"] == "ns=2;s=FormingMachine.RamPosition"));
    }

    #[tokio::test]
    async fn test_unknown_machine_is_404() {
        let base = spawn_server(line_state()).await;
        let response = reqwest::get(format!("{base}/api/machines/mill"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let base = spawn_server(line_state()).await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/api/machines"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }

    #[tokio::test]
    async fn test_config_roundtrip_and_validation() {
        let base = spawn_server(line_state()).await;
        let client = reqwest::Client::new();

        let config: serde_json::Value = reqwest::get(format!("{base}/api/config"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(config["cycleTimeScale"], 1.0);
        assert_eq!(config["baseCycleTime"], "12s");

        // Valid partial update.
        let updated: serde_json::Value = client
            .post(format!("{base}/api/config"))
            .body(r#"{"cycleTimeScale": 2.0, "scrapRate": 0.1}"#)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["cycleTimeScale"], 2.0);
        assert_eq!(updated["scrapRate"], 0.1);
        assert_eq!(updated["effectiveCycleTime"], "6s");

        // Range violation.
        let response = client
            .post(format!("{base}/api/config"))
            .body(r#"{"errorRate": 0.9}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Malformed JSON.
        let response = client
            .post(format!("{base}/api/config"))
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_config_not_implemented_in_welding_mode() {
        let base = spawn_server(welding_state()).await;
        let response = reqwest::get(format!("{base}/api/config")).await.unwrap();
        assert_eq!(response.status(), 501);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let state = line_state();
        let health = state.health.clone();
        let base = spawn_server(state).await;

        let response = reqwest::get(format!("{base}/health/live")).await.unwrap();
        assert_eq!(response.status(), 200);

        // Not ready before the driver marks its flags.
        let response = reqwest::get(format!("{base}/health/ready")).await.unwrap();
        assert_eq!(response.status(), 503);

        health.set_opcua_ready(true);
        health.set_driver_started(true);
        // Startup grace keeps readiness at 503 immediately after boot.
        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_cors_header_present() {
        let base = spawn_server(welding_state()).await;
        let response = reqwest::get(format!("{base}/api/status")).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}
