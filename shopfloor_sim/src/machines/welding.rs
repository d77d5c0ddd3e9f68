//! Welding robot phase engine.
//!
//! Cycle phases: ramp-up 5 %, steady 90 %, ramp-down 5 %. Current and
//! voltage are correlated through a shared common factor (voltage at half the
//! noise level); current carries an independent spike channel. Arc time
//! accumulates one publish interval per tick spent in `Steady`.

use crate::machine::{BaseMachine, MachineConfig, MachineEvent, MachineSimulator};
use chrono::{DateTime, Utc};
use shopfloor_common::nodes::{DataType, NodeDefinition, Value, ValueMap};
use shopfloor_common::noise::{clamp_positive, NoiseGenerator};
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{ErrorInfo, ProductionOrder};
use std::time::Duration;

const RAMP_UP_FRACTION: f64 = 0.05;
const STEADY_FRACTION: f64 = 0.90;
const RAMP_DOWN_FRACTION: f64 = 0.05;

/// Phase within a welding cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeldPhase {
    Off,
    RampUp,
    Steady,
    RampDown,
}

impl WeldPhase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::RampUp => "RampUp",
            Self::Steady => "Steady",
            Self::RampDown => "RampDown",
        }
    }
}

/// Welding-specific error codes with message and duration range.
pub const WELDING_ERROR_CODES: [&str; 5] = ["E001", "E002", "E003", "E004", "E005"];

pub fn error_info(code: &str) -> (&'static str, Duration, Duration) {
    match code {
        "E001" => (
            "Wire feed jam detected",
            Duration::from_secs(5 * 60),
            Duration::from_secs(10 * 60),
        ),
        "E002" => (
            "Gas flow fault",
            Duration::from_secs(2 * 60),
            Duration::from_secs(5 * 60),
        ),
        "E003" => (
            "Arc fault detected",
            Duration::from_secs(60),
            Duration::from_secs(3 * 60),
        ),
        "E004" => (
            "Robot collision detected",
            Duration::from_secs(15 * 60),
            Duration::from_secs(30 * 60),
        ),
        "E005" => (
            "Quality reject",
            Duration::from_secs(60),
            Duration::from_secs(2 * 60),
        ),
        _ => ("", Duration::ZERO, Duration::ZERO),
    }
}

/// Target process parameters of the welding robot.
#[derive(Debug, Clone)]
pub struct WeldingConfig {
    /// Amps.
    pub target_current: f64,
    /// Volts.
    pub target_voltage: f64,
    /// m/min.
    pub target_wire_feed_speed: f64,
    /// l/min.
    pub target_gas_flow: f64,
    /// mm/s.
    pub target_travel_speed: f64,
    /// Total notional weld path length, mm.
    pub weld_path_length: f64,
}

impl Default for WeldingConfig {
    fn default() -> Self {
        // Mild steel, 0.035-0.045" wire.
        Self {
            target_current: 200.0,
            target_voltage: 24.0,
            target_wire_feed_speed: 9.6,
            target_gas_flow: 15.0,
            target_travel_speed: 10.0,
            weld_path_length: 500.0,
        }
    }
}

/// Welding robot simulator.
pub struct WeldingRobot {
    base: BaseMachine,
    weld_config: WeldingConfig,
    phase: WeldPhase,
    arc_time: f64,
    weld_path_progress: f64,
    noise: NoiseGenerator,
}

impl WeldingRobot {
    pub fn new(config: MachineConfig, weld_config: WeldingConfig, now: DateTime<Utc>) -> Self {
        Self {
            base: BaseMachine::new(config, now),
            weld_config,
            phase: WeldPhase::Off,
            arc_time: 0.0,
            weld_path_progress: 0.0,
            noise: NoiseGenerator::new(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(
        config: MachineConfig,
        weld_config: WeldingConfig,
        now: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut robot = Self::new(config, weld_config, now);
        robot.noise = NoiseGenerator::with_seed(seed);
        robot
    }

    pub fn phase(&self) -> WeldPhase {
        self.phase
    }

    /// Cumulative arc seconds this shift.
    pub fn arc_time(&self) -> f64 {
        self.arc_time
    }

    pub fn add_order(&mut self, order: ProductionOrder) {
        self.base.add_order(order);
    }

    pub fn base(&self) -> &BaseMachine {
        &self.base
    }

    /// Advance the state machine by one tick.
    pub fn update(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        match self.base.state() {
            MachineState::Idle => self.update_idle(now),
            MachineState::Setup => self.update_setup(now),
            MachineState::Running => self.update_running(now, is_break_time),
            MachineState::PlannedStop => self.update_planned_stop(now, is_break_time),
            MachineState::UnplannedStop => self.update_unplanned_stop(now),
        }
    }

    fn update_idle(&mut self, now: DateTime<Utc>) {
        self.phase = WeldPhase::Off;
        if self.base.has_work() {
            if self.base.current_order().is_none() {
                self.base.start_next_order(now);
            }
            self.base.transition_to(MachineState::Setup, now);
        }
    }

    fn update_setup(&mut self, now: DateTime<Utc>) {
        if self.base.elapsed_in_state(now) >= self.base.config().effective_setup_time() {
            self.base.transition_to(MachineState::Running, now);
            self.base.mark_cycle_start(now);
            self.phase = WeldPhase::RampUp;
        }
    }

    fn update_running(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        if is_break_time {
            self.base.transition_to(MachineState::PlannedStop, now);
            self.phase = WeldPhase::Off;
            return;
        }

        if self.should_trigger_error() {
            self.trigger_error(now);
            return;
        }

        let cycle_elapsed = self.base.elapsed_in_cycle(now);
        let cycle_time = self.base.config().effective_cycle_time();
        let ramp_up_end = cycle_time.mul_f64(RAMP_UP_FRACTION);
        let steady_end = cycle_time.mul_f64(RAMP_UP_FRACTION + STEADY_FRACTION);

        match self.phase {
            WeldPhase::RampUp => {
                if cycle_elapsed >= ramp_up_end {
                    self.phase = WeldPhase::Steady;
                }
            }
            WeldPhase::Steady => {
                self.arc_time += self.base.config().publish_interval.as_secs_f64();
                if cycle_elapsed >= steady_end {
                    self.phase = WeldPhase::RampDown;
                }
            }
            WeldPhase::RampDown | WeldPhase::Off => {}
        }

        if self.phase != WeldPhase::Off && cycle_elapsed >= cycle_time {
            self.complete_cycle(now);
        }
    }

    fn update_planned_stop(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        if !is_break_time {
            self.base.transition_to(MachineState::Idle, now);
        }
    }

    fn update_unplanned_stop(&mut self, now: DateTime<Utc>) {
        if self.base.is_error_resolved(now) {
            self.base.clear_error();
            self.base.transition_to(MachineState::Idle, now);
        }
    }

    fn should_trigger_error(&mut self) -> bool {
        // Arc faults only happen with a burning arc.
        if self.phase != WeldPhase::Steady {
            return false;
        }
        let cfg = self.base.config();
        let (rate, tick, cycle) = (
            cfg.effective_error_rate(),
            cfg.publish_interval,
            cfg.effective_cycle_time(),
        );
        self.noise.should_trigger(rate, tick, cycle)
    }

    fn trigger_error(&mut self, now: DateTime<Utc>) {
        let idx = self
            .noise
            .uniform_int(0, WELDING_ERROR_CODES.len() as i64 - 1) as usize;
        self.apply_error(WELDING_ERROR_CODES[idx], now);
    }

    /// Inject a specific fault (scenario control).
    pub fn force_error(&mut self, code: &str, now: DateTime<Utc>) {
        self.apply_error(code, now);
    }

    fn apply_error(&mut self, code: &str, now: DateTime<Utc>) {
        let (message, min_dur, max_dur) = error_info(code);
        let duration = self.noise.uniform_duration(min_dur, max_dur);
        let duration = self.base.config().effective_error_duration(duration);

        self.base.trigger_error(code, message, duration, now);
        self.phase = WeldPhase::Off;
    }

    fn complete_cycle(&mut self, now: DateTime<Utc>) {
        let is_scrap = self
            .noise
            .bool_with(self.base.config().effective_scrap_rate());
        self.base.complete_cycle(is_scrap);

        if self.base.is_order_complete() {
            self.base.finish_order();
            self.base.transition_to(MachineState::Idle, now);
            self.phase = WeldPhase::Off;
            return;
        }

        self.base.mark_cycle_start(now);
        self.phase = WeldPhase::RampUp;
    }

    fn phase_progress(&self, now: DateTime<Utc>) -> f64 {
        let cycle = self.base.config().effective_cycle_time().as_secs_f64();
        if cycle <= 0.0 {
            return 0.0;
        }
        let elapsed = self.base.elapsed_in_cycle(now).as_secs_f64();
        let ramp_up = cycle * RAMP_UP_FRACTION;
        let steady = cycle * STEADY_FRACTION;
        let ramp_down = cycle * RAMP_DOWN_FRACTION;

        let progress = match self.phase {
            WeldPhase::RampUp => elapsed / ramp_up,
            WeldPhase::Steady => (elapsed - ramp_up) / steady,
            WeldPhase::RampDown => (elapsed - ramp_up - steady) / ramp_down,
            WeldPhase::Off => 0.0,
        };
        progress.clamp(0.0, 1.0)
    }

    fn running_values(&mut self, data: &mut ValueMap, phase_progress: f64) {
        let (phase_mult, noise_level) = match self.phase {
            WeldPhase::RampUp => (self.noise.ramp_value(1.0, phase_progress, true, 0.15), 0.05),
            WeldPhase::Steady => (1.0, 0.02),
            WeldPhase::RampDown => (
                self.noise.ramp_value(1.0, phase_progress, false, 0.15),
                0.05,
            ),
            WeldPhase::Off => (0.0, 0.0),
        };

        // Current and voltage share a common factor for correlation ~0.5.
        let common = self.noise.common_factor(0.02);

        let base_current = self.weld_config.target_current * phase_mult;
        let mut current = self
            .noise
            .correlated_noise(base_current, noise_level, common, 1.0);
        current += self
            .noise
            .spike(self.weld_config.target_current, 0.003, 0.10);
        let current = clamp_positive(current);

        let base_voltage = self.weld_config.target_voltage * phase_mult;
        let voltage = clamp_positive(self.noise.correlated_noise(
            base_voltage,
            noise_level * 0.5,
            common,
            0.5,
        ));

        let wire_feed = clamp_positive(
            self.noise
                .gaussian_noise(self.weld_config.target_wire_feed_speed * phase_mult, 0.005),
        );

        // Shielding gas keeps flowing through every weld phase.
        let gas_flow = if self.phase == WeldPhase::Off {
            0.0
        } else {
            self.noise
                .gaussian_noise(self.weld_config.target_gas_flow, 0.003)
        };

        let travel_speed = clamp_positive(
            self.noise
                .gaussian_noise(self.weld_config.target_travel_speed * phase_mult, 0.02),
        );

        // Weld path traversal: progress accumulates with travel speed.
        let dt = self.base.config().publish_interval.as_secs_f64();
        self.weld_path_progress += travel_speed * dt;
        if self.weld_path_progress > self.weld_config.weld_path_length {
            self.weld_path_progress = 0.0;
        }
        let path = self.weld_path_progress / self.weld_config.weld_path_length;

        let pos_x = -250.0 + path * 500.0 + self.noise.gaussian(0.0, 2.0);
        let pos_y =
            (path * std::f64::consts::PI * 4.0).sin() * 50.0 + self.noise.gaussian(0.0, 2.0);
        let pos_z =
            200.0 + (path * std::f64::consts::PI * 2.0).sin() * 20.0 + self.noise.gaussian(0.0, 1.0);
        let torch_angle =
            30.0 + (path * std::f64::consts::PI * 2.0).sin() * 10.0 + self.noise.gaussian(0.0, 2.0);

        data.insert("WeldingCurrent".into(), current.into());
        data.insert("Voltage".into(), voltage.into());
        data.insert("WireFeedSpeed".into(), wire_feed.into());
        data.insert("GasFlow".into(), gas_flow.into());
        data.insert("TravelSpeed".into(), travel_speed.into());
        data.insert("Position.X".into(), pos_x.into());
        data.insert("Position.Y".into(), pos_y.into());
        data.insert("Position.Z".into(), pos_z.into());
        data.insert("TorchAngle".into(), torch_angle.into());
    }

    fn setup_values(&mut self, data: &mut ValueMap) {
        data.insert("WeldingCurrent".into(), 0.0.into());
        data.insert("Voltage".into(), 0.0.into());
        data.insert("WireFeedSpeed".into(), 0.0.into());
        data.insert("GasFlow".into(), 0.0.into());
        data.insert("TravelSpeed".into(), 0.0.into());
        // Robot jogs around home while the operator prepares the job.
        data.insert("Position.X".into(), self.noise.gaussian(0.0, 5.0).into());
        data.insert("Position.Y".into(), self.noise.gaussian(0.0, 5.0).into());
        data.insert(
            "Position.Z".into(),
            (200.0 + self.noise.gaussian(0.0, 2.0)).into(),
        );
        data.insert("TorchAngle".into(), 0.0.into());
        self.weld_path_progress = 0.0;
    }

    fn idle_values(&mut self, data: &mut ValueMap) {
        data.insert("WeldingCurrent".into(), 0.0.into());
        data.insert("Voltage".into(), 0.0.into());
        data.insert("WireFeedSpeed".into(), 0.0.into());
        data.insert("GasFlow".into(), 0.0.into());
        data.insert("TravelSpeed".into(), 0.0.into());
        data.insert("Position.X".into(), 0.0.into());
        data.insert("Position.Y".into(), 0.0.into());
        data.insert("Position.Z".into(), 200.0.into());
        data.insert("TorchAngle".into(), 0.0.into());
        self.weld_path_progress = 0.0;
    }
}

impl MachineSimulator for WeldingRobot {
    fn name(&self) -> &str {
        &self.base.config().name
    }

    fn machine_type(&self) -> &'static str {
        "welding"
    }

    fn state(&self) -> MachineState {
        self.base.state()
    }

    fn counters(&self) -> (u32, u32) {
        self.base.counters()
    }

    fn reset_counters(&mut self) {
        self.base.reset_counters();
        self.arc_time = 0.0;
    }

    fn current_order(&self) -> Option<&ProductionOrder> {
        self.base.current_order()
    }

    fn current_error(&self) -> Option<&ErrorInfo> {
        self.base.current_error()
    }

    fn cycle_progress(&self, now: DateTime<Utc>) -> f64 {
        self.base.cycle_progress(now)
    }

    fn opcua_nodes(&self) -> Vec<NodeDefinition> {
        vec![
            NodeDefinition::new("WeldingCurrent", "Welding Current", "Current in Amps", DataType::Double, "A", Value::Double(0.0)),
            NodeDefinition::new("Voltage", "Voltage", "Arc voltage in Volts", DataType::Double, "V", Value::Double(0.0)),
            NodeDefinition::new("WireFeedSpeed", "Wire Feed Speed", "Wire feed in m/min", DataType::Double, "m/min", Value::Double(0.0)),
            NodeDefinition::new("GasFlow", "Gas Flow", "Shielding gas flow l/min", DataType::Double, "l/min", Value::Double(0.0)),
            NodeDefinition::new("TravelSpeed", "Travel Speed", "Travel speed mm/s", DataType::Double, "mm/s", Value::Double(0.0)),
            NodeDefinition::new("ArcTime", "Arc Time", "Cumulative arc time seconds", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("Position.X", "Position X", "X position mm", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("Position.Y", "Position Y", "Y position mm", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("Position.Z", "Position Z", "Z position mm", DataType::Double, "mm", Value::Double(200.0)),
            NodeDefinition::new("TorchAngle", "Torch Angle", "Torch angle degrees", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("State", "State", "Machine state (0-4)", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("GoodParts", "Good Parts", "Good parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("ScrapParts", "Scrap Parts", "Scrap parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CurrentOrderId", "Current Order ID", "Active order ID", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CurrentPartNumber", "Current Part Number", "Active part number", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CycleProgress", "Cycle Progress", "Progress 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("ErrorCode", "Error Code", "Current error code", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ErrorMessage", "Error Message", "Error description", DataType::String, "", Value::Text(String::new())),
        ]
    }

    fn generate_data(&mut self, now: DateTime<Utc>) -> ValueMap {
        let mut data = ValueMap::new();
        let phase_progress = self.phase_progress(now);

        match self.base.state() {
            MachineState::Running => self.running_values(&mut data, phase_progress),
            MachineState::Setup => self.setup_values(&mut data),
            _ => self.idle_values(&mut data),
        }

        data.insert("ArcTime".into(), self.arc_time.into());
        data.insert("State".into(), (self.base.state() as i32).into());
        let (good, scrap) = self.base.counters();
        data.insert("GoodParts".into(), good.into());
        data.insert("ScrapParts".into(), scrap.into());
        data.insert("CycleProgress".into(), self.base.cycle_progress(now).into());

        let (order_id, part_number) = match self.base.current_order() {
            Some(order) => (order.order_id.clone(), order.part_number.clone()),
            None => (String::new(), String::new()),
        };
        data.insert("CurrentOrderId".into(), order_id.into());
        data.insert("CurrentPartNumber".into(), part_number.into());

        let (code, message) = match self.base.current_error() {
            Some(err) => (err.code.clone(), err.message.clone()),
            None => (String::new(), String::new()),
        };
        data.insert("ErrorCode".into(), code.into());
        data.insert("ErrorMessage".into(), message.into());

        data
    }

    fn take_events(&mut self) -> Vec<MachineEvent> {
        self.base.take_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use shopfloor_common::types::OrderStatus;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    fn make_config(cycle_s: u64, setup_s: u64, scrap: f64, error: f64) -> MachineConfig {
        MachineConfig {
            name: "WeldingRobot".into(),
            cycle_time: Duration::from_secs(cycle_s),
            setup_time: Duration::from_secs(setup_s),
            scrap_rate: scrap,
            error_rate: error,
            publish_interval: Duration::from_secs(1),
            runtime: None,
        }
    }

    fn make_order(quantity: u32) -> ProductionOrder {
        ProductionOrder {
            order_id: "PO-2026-01001".into(),
            part_number: "WLD-FRAME-A01".into(),
            part_description: "Front Frame Assembly".into(),
            quantity,
            quantity_completed: 0,
            quantity_scrap: 0,
            due_date: t0(),
            customer: "AutoCorp Inc.".into(),
            priority: 2,
            status: OrderStatus::Queued,
            started_at: None,
        }
    }

    /// Drive the robot at 1 Hz from `start` through `start + seconds`.
    fn run_for(robot: &mut WeldingRobot, start: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
        let mut now = start;
        for i in 0..=seconds {
            now = start + TimeDelta::seconds(i);
            robot.update(now, false);
        }
        now
    }

    #[test]
    fn test_quiet_startup_single_cycle() {
        // Cycle 10 s, setup 5 s, no errors, no scrap: after 15 s one good
        // part and ~9 s of arc time (the steady portion).
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 5, 0.0, 0.0), WeldingConfig::default(), t0(), 1);
        robot.add_order(make_order(100));

        let now = run_for(&mut robot, t0(), 15);

        assert_eq!(robot.state(), MachineState::Running);
        let (good, scrap) = robot.counters();
        assert_eq!(good, 1);
        assert_eq!(scrap, 0);
        assert!(
            (robot.arc_time() - 9.0).abs() <= 1.0,
            "arc time was {}",
            robot.arc_time()
        );
        assert!(robot.cycle_progress(now) < 100.0);
    }

    #[test]
    fn test_forced_scrap() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 5, 1.0, 0.0), WeldingConfig::default(), t0(), 1);
        robot.add_order(make_order(100));

        run_for(&mut robot, t0(), 15);

        let (good, scrap) = robot.counters();
        assert_eq!(good, 0);
        assert_eq!(scrap, 1);
    }

    #[test]
    fn test_phase_sequence_within_cycle() {
        let mut robot =
            WeldingRobot::with_seed(make_config(20, 2, 0.0, 0.0), WeldingConfig::default(), t0(), 3);
        robot.add_order(make_order(10));

        let mut now = t0();
        // Into setup, then running.
        now += TimeDelta::seconds(1);
        robot.update(now, false);
        assert_eq!(robot.state(), MachineState::Setup);
        now += TimeDelta::seconds(2);
        robot.update(now, false);
        assert_eq!(robot.state(), MachineState::Running);
        assert_eq!(robot.phase(), WeldPhase::RampUp);

        // 5% of 20 s = 1 s ramp-up.
        now += TimeDelta::seconds(2);
        robot.update(now, false);
        assert_eq!(robot.phase(), WeldPhase::Steady);

        // 95% boundary at 19 s.
        now += TimeDelta::seconds(17);
        robot.update(now, false);
        assert_eq!(robot.phase(), WeldPhase::RampDown);
    }

    #[test]
    fn test_break_moves_to_planned_stop_and_back() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 2, 0.0, 0.0), WeldingConfig::default(), t0(), 5);
        robot.add_order(make_order(10));
        let now = run_for(&mut robot, t0(), 5);
        assert_eq!(robot.state(), MachineState::Running);

        let now2 = now + TimeDelta::seconds(1);
        robot.update(now2, true);
        assert_eq!(robot.state(), MachineState::PlannedStop);
        assert_eq!(robot.phase(), WeldPhase::Off);

        let now3 = now2 + TimeDelta::seconds(60);
        robot.update(now3, false);
        assert_eq!(robot.state(), MachineState::Idle);
    }

    #[test]
    fn test_error_recovery_returns_to_idle() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 2, 0.0, 0.0), WeldingConfig::default(), t0(), 7);
        robot.add_order(make_order(10));
        let mut now = run_for(&mut robot, t0(), 5);
        assert_eq!(robot.state(), MachineState::Running);

        // Force an error directly through the base machine.
        robot
            .base
            .trigger_error("E003", "Arc fault detected", Duration::from_secs(90), now);
        robot.phase = WeldPhase::Off;
        assert_eq!(robot.state(), MachineState::UnplannedStop);

        now += TimeDelta::seconds(30);
        robot.update(now, false);
        assert_eq!(robot.state(), MachineState::UnplannedStop);

        now += TimeDelta::seconds(61);
        robot.update(now, false);
        assert_eq!(robot.state(), MachineState::Idle);
        assert!(robot.current_error().is_none());
    }

    #[test]
    fn test_order_completion_emits_event_and_idles() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 5, 0.0, 0.0), WeldingConfig::default(), t0(), 9);
        robot.add_order(make_order(2));

        run_for(&mut robot, t0(), 5 + 2 * 10 + 1);

        assert_eq!(robot.state(), MachineState::Idle);
        let events = robot.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, MachineEvent::OrderCompleted(o) if o.quantity_completed == 2)));
    }

    #[test]
    fn test_observables_silent_when_idle() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 5, 0.0, 0.0), WeldingConfig::default(), t0(), 2);
        let data = robot.generate_data(t0());
        assert_eq!(data.get("WeldingCurrent"), Some(&Value::Double(0.0)));
        assert_eq!(data.get("GasFlow"), Some(&Value::Double(0.0)));
        assert_eq!(data.get("State"), Some(&Value::Int32(0)));
    }

    #[test]
    fn test_observables_active_while_running() {
        let mut robot =
            WeldingRobot::with_seed(make_config(10, 2, 0.0, 0.0), WeldingConfig::default(), t0(), 4);
        robot.add_order(make_order(10));
        let now = run_for(&mut robot, t0(), 8);
        assert_eq!(robot.state(), MachineState::Running);

        let data = robot.generate_data(now);
        let Some(Value::Double(current)) = data.get("WeldingCurrent") else {
            panic!("missing WeldingCurrent");
        };
        let Some(Value::Double(voltage)) = data.get("Voltage") else {
            panic!("missing Voltage");
        };
        // Steady state: close to targets.
        assert!(*current > 150.0 && *current < 250.0, "current {current}");
        assert!(*voltage > 18.0 && *voltage < 30.0, "voltage {voltage}");
        assert_eq!(data.get("CurrentOrderId"), Some(&Value::Text("PO-2026-01001".into())));
    }

    #[test]
    fn test_node_set_is_stable_contract() {
        let robot =
            WeldingRobot::with_seed(make_config(10, 5, 0.0, 0.0), WeldingConfig::default(), t0(), 1);
        let nodes = robot.opcua_nodes();
        assert_eq!(nodes.len(), 18);
        assert!(nodes.iter().any(|n| n.name == "WeldingCurrent" && n.unit == "A"));
        assert!(nodes.iter().any(|n| n.name == "Position.Z"
            && n.initial_value == Value::Double(200.0)));
    }
}
