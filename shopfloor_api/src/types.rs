//! Response and request DTOs of the observer REST surface.

use serde::{Deserialize, Serialize};
use shopfloor_common::nodes::ValueMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub mode: String,
    pub simulator_name: String,
    pub machines: Vec<MachineInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_order: Option<OrderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<LineInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub namespace: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInfo {
    pub order_id: String,
    pub part_number: String,
    pub quantity: u32,
    pub completed: u32,
    pub scrap: u32,
    pub status: String,
}

/// Line-level aggregates, present in line mode only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineInfo {
    pub line_state: String,
    pub wip_count: usize,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub bottleneck_machine: String,
}

#[derive(Debug, Serialize)]
pub struct MachineListResponse {
    pub machines: Vec<MachineSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub namespace: u16,
    pub state: i32,
    pub state_name: String,
    pub good_parts: u32,
    pub scrap_parts: u32,
    pub cycle_progress: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetailResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub namespace: u16,
    pub state: i32,
    pub state_name: String,
    pub data: ValueMap,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub node_id: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub cycle_time_scale: f64,
    pub base_cycle_time: String,
    pub effective_cycle_time: String,
    pub scrap_rate: f64,
    pub error_rate: f64,
}

/// Partial runtime-config update.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigUpdateRequest {
    pub cycle_time_scale: Option<f64>,
    pub scrap_rate: Option<f64>,
    pub error_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<std::collections::BTreeMap<String, String>>,
}
