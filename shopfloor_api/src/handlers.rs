//! REST handlers for the observer surface.

use crate::types::{
    ConfigResponse, ConfigUpdateRequest, LineInfo, MachineDetailResponse, MachineInfo,
    MachineListResponse, MachineSummary, NodeInfo, OrderInfo, StatusResponse,
};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use shopfloor_common::nodes::node_id;
use shopfloor_common::{
    NAMESPACE_FORMING, NAMESPACE_PICKER, NAMESPACE_SPOT_WELDER, NAMESPACE_WELDING,
};
use shopfloor_sim::{MachineSimulator, Simulator};
use std::time::Duration;

/// Line-mode machine ids with their namespaces.
const LINE_MACHINES: [(&str, u16); 3] = [
    ("forming", NAMESPACE_FORMING),
    ("picker", NAMESPACE_PICKER),
    ("spotwelder", NAMESPACE_SPOT_WELDER),
];

/// GET /api/status
pub async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut sim = state.lock_sim();

    let mut response = StatusResponse {
        mode: sim.mode().to_string(),
        simulator_name: state.simulator_name.clone(),
        machines: Vec::new(),
        current_order: None,
        line: None,
    };

    match &mut *sim {
        Simulator::Welding(robot) => {
            response.machines.push(MachineInfo {
                id: "welding".to_string(),
                name: robot.name().to_string(),
                machine_type: "Welding Robot".to_string(),
                namespace: NAMESPACE_WELDING,
            });
            response.current_order = robot.current_order().map(|order| OrderInfo {
                order_id: order.order_id.clone(),
                part_number: order.part_number.clone(),
                quantity: order.quantity,
                completed: order.quantity_completed,
                scrap: order.quantity_scrap,
                status: order.status.as_str().to_string(),
            });
        }
        Simulator::Line(line) => {
            for ((id, namespace), machine) in LINE_MACHINES.iter().zip(line.machines()) {
                response.machines.push(MachineInfo {
                    id: (*id).to_string(),
                    name: machine.name().to_string(),
                    machine_type: machine.machine_type().to_string(),
                    namespace: *namespace,
                });
            }
            response.current_order = line.order_snapshot().map(|order| OrderInfo {
                completed: order.quantity_completed,
                scrap: order.quantity_scrap,
                status: order.status.as_str().to_string(),
                quantity: order.quantity,
                order_id: order.order_id,
                part_number: order.part_number,
            });
            let oee = line.oee();
            response.line = Some(LineInfo {
                line_state: line.line_state().as_str().to_string(),
                wip_count: line.wip_count(),
                availability: oee.availability,
                performance: oee.performance,
                quality: oee.quality,
                oee: oee.oee,
                bottleneck_machine: line.metrics().bottleneck(),
            });
        }
    }

    Json(response)
}

/// GET /api/machines
pub async fn handle_machines(State(state): State<AppState>) -> Json<MachineListResponse> {
    let now = Utc::now();
    let mut sim = state.lock_sim();
    let mut machines = Vec::new();

    match &mut *sim {
        Simulator::Welding(robot) => {
            machines.push(summarize("welding", NAMESPACE_WELDING, robot, now));
        }
        Simulator::Line(line) => {
            for ((id, namespace), machine) in LINE_MACHINES.iter().zip(line.machines()) {
                machines.push(summarize(id, *namespace, machine, now));
            }
        }
    }

    Json(MachineListResponse { machines })
}

fn summarize(
    id: &str,
    namespace: u16,
    machine: &dyn MachineSimulator,
    now: chrono::DateTime<Utc>,
) -> MachineSummary {
    let (good, scrap) = machine.counters();
    MachineSummary {
        id: id.to_string(),
        name: machine.name().to_string(),
        machine_type: machine.machine_type().to_string(),
        namespace,
        state: machine.state() as i32,
        state_name: machine.state().as_str().to_string(),
        good_parts: good,
        scrap_parts: scrap,
        cycle_progress: machine.cycle_progress(now),
    }
}

/// GET /api/machines/{id}
pub async fn handle_machine_detail(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> Response {
    let now = Utc::now();
    let mut sim = state.lock_sim();

    let detail = match &mut *sim {
        Simulator::Welding(robot) => {
            if machine_id == "welding" {
                // The standalone robot publishes under the `Robot` folder.
                Some(detail_for(
                    "welding",
                    NAMESPACE_WELDING,
                    "Robot",
                    robot,
                    now,
                ))
            } else {
                None
            }
        }
        Simulator::Line(line) => LINE_MACHINES
            .iter()
            .find(|(id, _)| *id == machine_id)
            .and_then(|(id, namespace)| {
                let machine = line.machine_by_id(id)?;
                let folder = machine.name().to_string();
                Some(detail_for(id, *namespace, &folder, machine, now))
            }),
    };

    match detail {
        Some(detail) => Json(detail).into_response(),
        None => (StatusCode::NOT_FOUND, "Machine not found").into_response(),
    }
}

fn detail_for(
    id: &str,
    namespace: u16,
    folder: &str,
    machine: &mut dyn MachineSimulator,
    now: chrono::DateTime<Utc>,
) -> MachineDetailResponse {
    let nodes = machine
        .opcua_nodes()
        .into_iter()
        .map(|node| NodeInfo {
            node_id: node_id(namespace, folder, node.name),
            name: node.name.to_string(),
            data_type: node.data_type.as_str().to_string(),
            unit: node.unit.to_string(),
            description: node.description.to_string(),
        })
        .collect();

    MachineDetailResponse {
        id: id.to_string(),
        name: machine.name().to_string(),
        machine_type: machine.machine_type().to_string(),
        namespace,
        state: machine.state() as i32,
        state_name: machine.state().as_str().to_string(),
        data: machine.generate_data(now),
        nodes,
    }
}

/// GET /api/config
pub async fn handle_config_get(State(state): State<AppState>) -> Response {
    let Some(runtime) = &state.runtime else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            "Config only available in production line mode",
        )
            .into_response();
    };
    Json(config_response(runtime.snapshot())).into_response()
}

/// POST /api/config
///
/// Body is parsed by hand so malformed JSON maps to a clean 400.
pub async fn handle_config_update(State(state): State<AppState>, body: String) -> Response {
    let Some(runtime) = &state.runtime else {
        return (
            StatusCode::NOT_IMPLEMENTED,
            "Config only available in production line mode",
        )
            .into_response();
    };

    let request: ConfigUpdateRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON: {err}")).into_response();
        }
    };

    if let Some(scale) = request.cycle_time_scale {
        if let Err(err) = runtime.set_cycle_time_scale(scale) {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    }
    if let Some(rate) = request.scrap_rate {
        if let Err(err) = runtime.set_scrap_rate(rate) {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    }
    if let Some(rate) = request.error_rate {
        if let Err(err) = runtime.set_error_rate(rate) {
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    }

    let snapshot = runtime.snapshot();
    tracing::info!(
        cycle_time_scale = snapshot.cycle_time_scale,
        scrap_rate = snapshot.scrap_rate,
        error_rate = snapshot.error_rate,
        "runtime config updated"
    );
    Json(config_response(snapshot)).into_response()
}

/// OPTIONS /api/config (CORS preflight; headers come from the middleware).
pub async fn handle_config_options() -> StatusCode {
    StatusCode::OK
}

fn config_response(snapshot: shopfloor_common::RuntimeSnapshot) -> ConfigResponse {
    ConfigResponse {
        cycle_time_scale: snapshot.cycle_time_scale,
        base_cycle_time: format_duration(snapshot.base_cycle_time),
        effective_cycle_time: format_duration(snapshot.effective_cycle_time),
        scrap_rate: snapshot.scrap_rate,
        error_rate: snapshot.error_rate,
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if (secs - secs.round()).abs() < 1e-9 {
        format!("{}s", secs.round() as u64)
    } else {
        format!("{secs:.3}s")
    }
}

/// GET / - minimal landing page in place of the bundled web UI.
pub async fn handle_index(State(state): State<AppState>) -> axum::response::Html<String> {
    axum::response::Html(format!(
        "<!doctype html><html><head><title>{name}</title></head><body>\
         <h1>{name}</h1>\
         <p>Observer API: <a href=\"/api/status\">/api/status</a>, \
         <a href=\"/api/machines\">/api/machines</a></p>\
         <p>Health: <a href=\"/health\">/health</a></p>\
         </body></html>",
        name = state.simulator_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(60)), "60s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }
}
