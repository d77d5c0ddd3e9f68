//! Production line coordinator.
//!
//! Owns the three stations and the buffers between them for their full
//! lifetime and advances everything on one common tick. The picker borrows
//! the forming output buffer and the welder input buffer for the duration of
//! each tick, so no cross-station state is ever shared between ticks.
//!
//! The line order is assigned to the forming press (head of the line) while
//! progress is reported from the spot welder (end of the line).

use crate::machine::{MachineConfig, MachineEvent, MachineSimulator};
use crate::machines::forming::{FormingConfig, FormingMachine};
use crate::machines::picker::{PickerConfig, PickerRobot};
use crate::machines::spotwelder::{SpotWelder, SpotWelderConfig};
use crate::metrics::{MetricsCollector, OeeResult, StationSample};
use chrono::{DateTime, Utc};
use shopfloor_common::nodes::{DataType, NodeDefinition, Value, ValueMap};
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{OrderStatus, ProductionOrder};
use std::time::Duration;
use tracing::{info, warn};

/// Overall production line state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Startup, before the first tick.
    Setup,
    /// All machines productive or between jobs.
    Running,
    /// No machine active (e.g. shift break).
    Stopped,
    /// At least one machine in an unplanned stop.
    Error,
}

impl LineState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "Setup",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

/// Production line configuration.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub forming_machine_name: String,
    pub picker_robot_name: String,
    pub spot_welder_name: String,
    pub line_name: String,
    /// Nominal line takt used for the OEE performance component.
    pub theoretical_cycle_time: Duration,
    pub forming_buffer_capacity: usize,
    pub welder_buffer_capacity: usize,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            forming_machine_name: "FormingMachine".to_string(),
            picker_robot_name: "PickerRobot".to_string(),
            spot_welder_name: "SpotWelder".to_string(),
            line_name: "ProductionLine".to_string(),
            theoretical_cycle_time: Duration::from_secs(60),
            forming_buffer_capacity: 5,
            welder_buffer_capacity: 3,
        }
    }
}

/// Coordinates the forming press, picker robot and spot welder.
pub struct Coordinator {
    config: LineConfig,
    forming: FormingMachine,
    picker: PickerRobot,
    welder: SpotWelder,
    metrics: MetricsCollector,

    line_state: LineState,
    start_time: DateTime<Utc>,
    last_update: DateTime<Utc>,
    uptime: Duration,
    downtime: Duration,

    total_parts_completed: u32,
    total_parts_scrap: u32,
    total_parts_started: u32,
    forming_completed: u32,
    picking_completed: u32,
    welding_completed: u32,

    current_order: Option<ProductionOrder>,
    /// Welder good count when the current order was assigned.
    order_baseline_good: u32,

    active_errors: u32,
    last_error_code: String,
    last_error_machine: String,
}

impl Coordinator {
    /// Build the line: machines created, buffers wired.
    ///
    /// `base` carries the shared cycle/setup/scrap/error settings; the picker
    /// runs at a third of the base cycle time to act as transport between the
    /// two slower stations.
    pub fn new(config: LineConfig, base: MachineConfig, now: DateTime<Utc>) -> Self {
        Self::build(config, base, now, None)
    }

    /// Deterministic variant for tests; per-machine seeds derive from `seed`.
    pub fn with_seed(config: LineConfig, base: MachineConfig, now: DateTime<Utc>, seed: u64) -> Self {
        Self::build(config, base, now, Some(seed))
    }

    fn build(config: LineConfig, base: MachineConfig, now: DateTime<Utc>, seed: Option<u64>) -> Self {
        let mut forming_cfg = base.clone();
        forming_cfg.name = config.forming_machine_name.clone();
        let mut forming_process = FormingConfig::default();
        forming_process.output_buffer_capacity = config.forming_buffer_capacity;

        let mut picker_cfg = base.clone();
        picker_cfg.name = config.picker_robot_name.clone();
        picker_cfg.cycle_time = base.cycle_time / 3;

        let mut welder_cfg = base;
        welder_cfg.name = config.spot_welder_name.clone();
        let mut welder_process = SpotWelderConfig::default();
        welder_process.input_buffer_capacity = config.welder_buffer_capacity;

        let (forming, picker, welder) = match seed {
            Some(seed) => (
                FormingMachine::with_seed(forming_cfg, forming_process, now, seed),
                PickerRobot::with_seed(picker_cfg, PickerConfig::default(), now, seed.wrapping_add(1)),
                SpotWelder::with_seed(welder_cfg, welder_process, now, seed.wrapping_add(2)),
            ),
            None => (
                FormingMachine::new(forming_cfg, forming_process, now),
                PickerRobot::new(picker_cfg, PickerConfig::default(), now),
                SpotWelder::new(welder_cfg, welder_process, now),
            ),
        };

        let metrics = MetricsCollector::new(
            &config.forming_machine_name,
            &config.picker_robot_name,
            &config.spot_welder_name,
            config.theoretical_cycle_time,
            now,
        );

        Self {
            config,
            forming,
            picker,
            welder,
            metrics,
            line_state: LineState::Setup,
            start_time: now,
            last_update: now,
            uptime: Duration::ZERO,
            downtime: Duration::ZERO,
            total_parts_completed: 0,
            total_parts_scrap: 0,
            total_parts_started: 0,
            forming_completed: 0,
            picking_completed: 0,
            welding_completed: 0,
            current_order: None,
            order_baseline_good: 0,
            active_errors: 0,
            last_error_code: String::new(),
            last_error_machine: String::new(),
        }
    }

    /// Start the line: stamps the epoch for uptime and OEE accounting.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.start_time = now;
        self.last_update = now;
        self.line_state = LineState::Running;
        self.metrics.reset(now);
    }

    /// Stop the line.
    pub fn stop(&mut self) {
        self.line_state = LineState::Stopped;
    }

    /// Advance every machine one tick and recompute the line aggregates.
    ///
    /// Ordering within the tick: line state and up/downtime accounting,
    /// machine updates in line order with tick-scoped buffer borrows, counter
    /// aggregation, error tracking, OEE sampling.
    pub fn update(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        let elapsed = (now - self.last_update).to_std().unwrap_or(Duration::ZERO);
        self.last_update = now;

        self.update_line_state();
        match self.line_state {
            LineState::Running => self.uptime += elapsed,
            LineState::Error | LineState::Stopped => self.downtime += elapsed,
            LineState::Setup => {}
        }

        self.forming.update(now, is_break_time);
        {
            let Self {
                forming,
                picker,
                welder,
                ..
            } = self;
            picker.update(
                now,
                is_break_time,
                forming.output_buffer_mut(),
                welder.input_buffer_mut(),
            );
        }
        self.welder.update(now, is_break_time);

        self.update_counters();
        self.update_error_tracking();

        self.metrics.update(
            station_sample(&self.forming, self.forming.cycle_count()),
            station_sample(&self.picker, self.picker.cycle_count()),
            station_sample(&self.welder, self.welder.cycle_count()),
            now,
        );
    }

    fn update_line_state(&mut self) {
        let states = [
            self.forming.state(),
            self.picker.state(),
            self.welder.state(),
        ];

        let new_state = if states.iter().any(|s| *s == MachineState::UnplannedStop) {
            LineState::Error
        } else if states.iter().all(|s| {
            matches!(
                s,
                MachineState::Running | MachineState::Idle | MachineState::Setup
            )
        }) {
            // Automatic recovery from Error happens here as well.
            LineState::Running
        } else {
            LineState::Stopped
        };

        if new_state != self.line_state {
            match new_state {
                LineState::Error => {
                    warn!(line = %self.config.line_name, "line entered error state")
                }
                _ => info!(
                    line = %self.config.line_name,
                    state = new_state.as_str(),
                    "line state changed"
                ),
            }
        }
        self.line_state = new_state;
    }

    fn update_counters(&mut self) {
        let (welder_good, welder_scrap) = self.welder.counters();
        self.welding_completed = welder_good;
        self.total_parts_completed = welder_good;

        let (picker_good, picker_scrap) = self.picker.counters();
        self.picking_completed = picker_good;

        let (forming_good, forming_scrap) = self.forming.counters();
        self.forming_completed = forming_good;
        self.total_parts_started = forming_good;

        self.total_parts_scrap = forming_scrap + picker_scrap + welder_scrap;
    }

    fn update_error_tracking(&mut self) {
        self.active_errors = 0;

        let stations: [(&dyn MachineSimulator, &str); 3] = [
            (&self.forming, &self.config.forming_machine_name),
            (&self.picker, &self.config.picker_robot_name),
            (&self.welder, &self.config.spot_welder_name),
        ];
        let mut last: Option<(String, String)> = None;
        for (machine, name) in stations {
            if let Some(err) = machine.current_error() {
                self.active_errors += 1;
                last = Some((err.code.clone(), name.to_string()));
            }
        }
        if let Some((code, machine)) = last {
            self.last_error_code = code;
            self.last_error_machine = machine;
        }
    }

    // ─── Orders ─────────────────────────────────────────────────────

    /// Assign a new line order: recorded here, queued on the forming press.
    pub fn set_order(&mut self, order: ProductionOrder) {
        self.order_baseline_good = self.welder.counters().0;
        self.forming.add_order(order.clone());
        self.current_order = Some(order);
    }

    pub fn current_order(&self) -> Option<&ProductionOrder> {
        self.current_order.as_ref()
    }

    /// Completed and scrap counts of the current order, measured at the end
    /// of the line.
    pub fn order_progress(&self) -> (u32, u32) {
        let completed = self
            .welder
            .counters()
            .0
            .saturating_sub(self.order_baseline_good);
        (completed, self.total_parts_scrap)
    }

    pub fn is_order_complete(&self) -> bool {
        match &self.current_order {
            Some(order) => self.order_progress().0 >= order.quantity,
            None => false,
        }
    }

    /// Clone of the current order with up-to-date line progress.
    pub fn order_snapshot(&self) -> Option<ProductionOrder> {
        let order = self.current_order.as_ref()?;
        let mut snapshot = order.clone();
        snapshot.quantity_completed = self.order_progress().0.min(order.quantity);
        Some(snapshot)
    }

    /// Release the current order once complete, returning it for the ERP push.
    pub fn take_completed_order(&mut self) -> Option<ProductionOrder> {
        if !self.is_order_complete() {
            return None;
        }
        let mut order = self.current_order.take()?;
        order.quantity_completed = order.quantity.min(
            self.welder
                .counters()
                .0
                .saturating_sub(self.order_baseline_good),
        );
        order.status = OrderStatus::Completed;
        Some(order)
    }

    // ─── Aggregates & access ────────────────────────────────────────

    pub fn line_state(&self) -> LineState {
        self.line_state
    }

    /// Parts currently inside the line: both buffers plus the picker gripper.
    pub fn wip_count(&self) -> usize {
        self.forming.output_buffer().len()
            + self.welder.input_buffer().len()
            + usize::from(self.picker.is_holding_part())
    }

    pub fn oee(&self) -> OeeResult {
        self.metrics.calculate_oee()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn line_name(&self) -> &str {
        &self.config.line_name
    }

    pub fn uptime(&self) -> Duration {
        self.uptime
    }

    pub fn forming(&self) -> &FormingMachine {
        &self.forming
    }

    pub fn forming_mut(&mut self) -> &mut FormingMachine {
        &mut self.forming
    }

    pub fn picker(&self) -> &PickerRobot {
        &self.picker
    }

    pub fn picker_mut(&mut self) -> &mut PickerRobot {
        &mut self.picker
    }

    pub fn welder(&self) -> &SpotWelder {
        &self.welder
    }

    pub fn welder_mut(&mut self) -> &mut SpotWelder {
        &mut self.welder
    }

    /// The stations in line order for read-only iteration.
    pub fn machines(&self) -> [&dyn MachineSimulator; 3] {
        [&self.forming, &self.picker, &self.welder]
    }

    /// Resolve a REST machine id to its engine.
    pub fn machine_by_id(&mut self, id: &str) -> Option<&mut dyn MachineSimulator> {
        match id {
            "forming" => Some(&mut self.forming),
            "picker" => Some(&mut self.picker),
            "spotwelder" => Some(&mut self.welder),
            _ => None,
        }
    }

    /// Drain lifecycle events of all stations, tagged with machine names.
    pub fn take_events(&mut self) -> Vec<(String, MachineEvent)> {
        let mut events = Vec::new();
        for (name, machine) in [
            (
                self.config.forming_machine_name.clone(),
                &mut self.forming as &mut dyn MachineSimulator,
            ),
            (
                self.config.picker_robot_name.clone(),
                &mut self.picker as &mut dyn MachineSimulator,
            ),
            (
                self.config.spot_welder_name.clone(),
                &mut self.welder as &mut dyn MachineSimulator,
            ),
        ] {
            for event in machine.take_events() {
                events.push((name.clone(), event));
            }
        }
        events
    }

    /// Static line-level node schema.
    pub fn opcua_nodes(&self) -> Vec<NodeDefinition> {
        vec![
            NodeDefinition::new("LineState", "Line State", "Production line state", DataType::String, "", Value::Text("Stopped".into())),
            NodeDefinition::new("WIPCount", "WIP Count", "Work in progress count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("ThroughputPerHour", "Throughput/Hour", "Parts per hour", DataType::Double, "parts/hr", Value::Double(0.0)),
            NodeDefinition::new("BottleneckMachine", "Bottleneck Machine", "Current bottleneck", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("TotalPartsCompleted", "Total Parts Completed", "Parts through entire line", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("TotalPartsScrap", "Total Parts Scrap", "Scrapped parts", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("TotalPartsStarted", "Total Parts Started", "Parts started", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("FormingCompleted", "Forming Completed", "Parts through forming", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("PickingCompleted", "Picking Completed", "Parts through picker", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("WeldingCompleted", "Welding Completed", "Parts through welder", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("FormingBufferCount", "Forming Buffer Count", "Parts in forming buffer", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("PickerBufferCount", "Picker Buffer Count", "Parts in welder input", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("Availability", "Availability", "OEE availability", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("Performance", "Performance", "OEE performance", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("Quality", "Quality", "OEE quality", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("OEE", "OEE", "Overall Equipment Effectiveness", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("LineUptime", "Line Uptime", "Total uptime", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("LineDowntime", "Line Downtime", "Total downtime", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("AverageCycleTime", "Average Cycle Time", "Average part cycle time", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("CurrentOrderId", "Current Order ID", "Active order ID", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CurrentPartNumber", "Current Part Number", "Active part number", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("OrderProgress", "Order Progress", "Order completion 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("ActiveErrors", "Active Errors", "Number of active errors", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("LastErrorCode", "Last Error Code", "Most recent error code", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("LastErrorMachine", "Last Error Machine", "Machine with last error", DataType::String, "", Value::Text(String::new())),
        ]
    }

    /// Line-level observable map.
    pub fn generate_data(&self) -> ValueMap {
        let mut data = ValueMap::new();

        data.insert("LineState".into(), self.line_state.as_str().into());
        data.insert("WIPCount".into(), (self.wip_count() as i32).into());
        data.insert(
            "TotalPartsCompleted".into(),
            self.total_parts_completed.into(),
        );
        data.insert("TotalPartsScrap".into(), self.total_parts_scrap.into());
        data.insert("TotalPartsStarted".into(), self.total_parts_started.into());
        data.insert("FormingCompleted".into(), self.forming_completed.into());
        data.insert("PickingCompleted".into(), self.picking_completed.into());
        data.insert("WeldingCompleted".into(), self.welding_completed.into());
        data.insert(
            "FormingBufferCount".into(),
            (self.forming.output_buffer().len() as i32).into(),
        );
        data.insert(
            "PickerBufferCount".into(),
            (self.welder.input_buffer().len() as i32).into(),
        );

        let throughput = if self.uptime.as_secs_f64() > 0.0 {
            f64::from(self.total_parts_completed) / (self.uptime.as_secs_f64() / 3600.0)
        } else {
            0.0
        };
        data.insert("ThroughputPerHour".into(), throughput.into());

        let oee = self.metrics.calculate_oee();
        data.insert("Availability".into(), oee.availability.into());
        data.insert("Performance".into(), oee.performance.into());
        data.insert("Quality".into(), oee.quality.into());
        data.insert("OEE".into(), oee.oee.into());

        data.insert("LineUptime".into(), self.uptime.as_secs_f64().into());
        data.insert("LineDowntime".into(), self.downtime.as_secs_f64().into());

        let average_cycle = if self.total_parts_completed > 0 {
            self.uptime.as_secs_f64() / f64::from(self.total_parts_completed)
        } else {
            0.0
        };
        data.insert("AverageCycleTime".into(), average_cycle.into());

        data.insert("BottleneckMachine".into(), self.metrics.bottleneck().into());

        let (order_id, part_number, progress) = match &self.current_order {
            Some(order) => {
                let progress = if order.quantity > 0 {
                    f64::from(self.order_progress().0) / f64::from(order.quantity) * 100.0
                } else {
                    0.0
                };
                (order.order_id.clone(), order.part_number.clone(), progress)
            }
            None => (String::new(), String::new(), 0.0),
        };
        data.insert("CurrentOrderId".into(), order_id.into());
        data.insert("CurrentPartNumber".into(), part_number.into());
        data.insert("OrderProgress".into(), progress.into());

        data.insert("ActiveErrors".into(), self.active_errors.into());
        data.insert("LastErrorCode".into(), self.last_error_code.clone().into());
        data.insert(
            "LastErrorMachine".into(),
            self.last_error_machine.clone().into(),
        );

        data
    }
}

fn station_sample(machine: &dyn MachineSimulator, cycle_count: u32) -> StationSample {
    let (good, scrap) = machine.counters();
    StationSample {
        state: machine.state(),
        cycle_count,
        good_parts: good,
        scrap_parts: scrap,
    }
}
