//! Forming press phase engine.
//!
//! Cycle phases: load 10 %, form 40 %, hold 15 %, eject 15 %, raise 20 %.
//! Ram position is an explicit function of the phase; hydraulic pressure
//! builds quadratically through the form phase, holds flat, then releases.
//! The press owns the line's first buffer: ejection stalls while that output
//! buffer is full and resumes once a consumer frees a slot.

use crate::buffer::PartBuffer;
use crate::machine::{BaseMachine, MachineConfig, MachineEvent, MachineSimulator};
use chrono::{DateTime, Utc};
use shopfloor_common::nodes::{DataType, NodeDefinition, Value, ValueMap};
use shopfloor_common::noise::{clamp, clamp_positive, NoiseGenerator};
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{ErrorInfo, Part, PartStatus, ProductionOrder};
use std::time::Duration;

const AMBIENT_TEMP: f64 = 25.0;

/// Phase within a forming cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormingPhase {
    Idle,
    /// Sheet metal loading, ram at top.
    Load,
    /// Ram descending, forming.
    Form,
    /// Pressure maintained at the bottom.
    Hold,
    /// Part ejection.
    Eject,
    /// Ram returning to top.
    Raise,
}

impl FormingPhase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Load => "Load",
            Self::Form => "Form",
            Self::Hold => "Hold",
            Self::Eject => "Eject",
            Self::Raise => "Raise",
        }
    }
}

pub const FORMING_ERROR_CODES: [&str; 6] = ["F001", "F002", "F003", "F004", "F005", "F006"];

pub fn error_info(code: &str) -> (&'static str, Duration, Duration) {
    match code {
        "F001" => (
            "Sheet metal misfeed detected",
            Duration::from_secs(30),
            Duration::from_secs(60),
        ),
        "F002" => (
            "Hydraulic system fault",
            Duration::from_secs(60),
            Duration::from_secs(3 * 60),
        ),
        "F003" => (
            "Overpressure detected",
            Duration::from_secs(45),
            Duration::from_secs(2 * 60),
        ),
        "F004" => (
            "Ram stuck in position",
            Duration::from_secs(2 * 60),
            Duration::from_secs(5 * 60),
        ),
        "F005" => (
            "Quality reject - forming defect",
            Duration::from_secs(15),
            Duration::from_secs(45),
        ),
        "F006" => (
            "Temperature out of range",
            Duration::from_secs(60),
            Duration::from_secs(2 * 60),
        ),
        _ => ("", Duration::ZERO, Duration::ZERO),
    }
}

/// Forming press process parameters and phase fractions.
#[derive(Debug, Clone)]
pub struct FormingConfig {
    /// Die temperature target under production load, deg C.
    pub target_temperature: f64,
    /// bar.
    pub max_pressure: f64,
    /// kN.
    pub max_forming_force: f64,
    /// Total ram travel, mm.
    pub ram_travel: f64,
    /// mm/s.
    pub max_ram_speed: f64,

    pub load_fraction: f64,
    pub form_fraction: f64,
    pub hold_fraction: f64,
    pub eject_fraction: f64,
    pub raise_fraction: f64,

    pub output_buffer_capacity: usize,
}

impl Default for FormingConfig {
    fn default() -> Self {
        // Cold forming defaults.
        Self {
            target_temperature: 45.0,
            max_pressure: 150.0,
            max_forming_force: 250.0,
            ram_travel: 400.0,
            max_ram_speed: 80.0,
            load_fraction: 0.10,
            form_fraction: 0.40,
            hold_fraction: 0.15,
            eject_fraction: 0.15,
            raise_fraction: 0.20,
            output_buffer_capacity: 5,
        }
    }
}

struct PhaseBounds {
    load_end: Duration,
    form_end: Duration,
    hold_end: Duration,
    eject_end: Duration,
}

/// Forming press simulator, head of the line.
pub struct FormingMachine {
    base: BaseMachine,
    form_config: FormingConfig,
    phase: FormingPhase,
    cycle_count: u32,
    ram_position: f64,
    current_part_id: String,
    part_counter: u32,
    output_buffer: PartBuffer,
    noise: NoiseGenerator,

    // Thermal and hydraulic carry-over between ticks.
    last_temperature: f64,
    last_die_temperature: f64,
    last_pressure: f64,
    last_forming_force: f64,
}

impl FormingMachine {
    pub fn new(config: MachineConfig, form_config: FormingConfig, now: DateTime<Utc>) -> Self {
        let capacity = form_config.output_buffer_capacity;
        Self {
            base: BaseMachine::new(config, now),
            form_config,
            phase: FormingPhase::Idle,
            cycle_count: 0,
            ram_position: 0.0,
            current_part_id: String::new(),
            part_counter: 0,
            output_buffer: PartBuffer::new(capacity),
            noise: NoiseGenerator::new(),
            last_temperature: AMBIENT_TEMP,
            last_die_temperature: AMBIENT_TEMP,
            last_pressure: 0.0,
            last_forming_force: 0.0,
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(
        config: MachineConfig,
        form_config: FormingConfig,
        now: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut machine = Self::new(config, form_config, now);
        machine.noise = NoiseGenerator::with_seed(seed);
        machine
    }

    pub fn phase(&self) -> FormingPhase {
        self.phase
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn output_buffer(&self) -> &PartBuffer {
        &self.output_buffer
    }

    pub fn output_buffer_mut(&mut self) -> &mut PartBuffer {
        &mut self.output_buffer
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
            MachineState::PlannedStop => {
                if !is_break_time {
                    self.base.transition_to(MachineState::Idle, now);
                }
            }
            MachineState::UnplannedStop => {
                if self.base.is_error_resolved(now) {
                    self.base.clear_error();
                    self.base.transition_to(MachineState::Idle, now);
                }
            }
        }
    }

    fn update_idle(&mut self, now: DateTime<Utc>) {
        self.phase = FormingPhase::Idle;
        self.ram_position = 0.0;

        if self.base.has_work() {
            if self.base.current_order().is_none() {
                self.base.start_next_order(now);
            }
            self.base.transition_to(MachineState::Setup, now);
        }
    }

    fn update_setup(&mut self, now: DateTime<Utc>) {
        // Die heating and calibration.
        if self.base.elapsed_in_state(now) >= self.base.config().effective_setup_time() {
            self.base.transition_to(MachineState::Running, now);
            self.base.mark_cycle_start(now);
            self.phase = FormingPhase::Load;
            self.generate_part_id(now);
        }
    }

    fn update_running(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        if is_break_time {
            self.base.transition_to(MachineState::PlannedStop, now);
            self.phase = FormingPhase::Idle;
            return;
        }

        if self.should_trigger_error() {
            self.trigger_error(now);
            return;
        }

        let bounds = self.phase_bounds();
        let cycle_elapsed = self.base.elapsed_in_cycle(now);
        let cycle_time = self.base.config().effective_cycle_time();

        match self.phase {
            FormingPhase::Load => {
                self.ram_position = 0.0;
                if cycle_elapsed >= bounds.load_end {
                    self.phase = FormingPhase::Form;
                }
            }
            FormingPhase::Form => {
                let progress = phase_fraction(cycle_elapsed, bounds.load_end, bounds.form_end);
                self.ram_position = progress * self.form_config.ram_travel;
                if cycle_elapsed >= bounds.form_end {
                    self.phase = FormingPhase::Hold;
                }
            }
            FormingPhase::Hold => {
                self.ram_position = self.form_config.ram_travel;
                if cycle_elapsed >= bounds.hold_end {
                    self.phase = FormingPhase::Eject;
                }
            }
            FormingPhase::Eject => {
                // Stall here while the downstream buffer is full; the press
                // resumes on the tick after a consumer pops. The scrap roll
                // waits with it, so each cycle resolves on a single draw.
                if cycle_elapsed >= bounds.eject_end && !self.output_buffer.is_full() {
                    self.eject_part(now);
                    self.phase = FormingPhase::Raise;
                }
            }
            FormingPhase::Raise => {
                let progress =
                    phase_fraction(cycle_elapsed, bounds.eject_end, cycle_time);
                self.ram_position = self.form_config.ram_travel * (1.0 - progress);
                if cycle_elapsed >= cycle_time {
                    self.complete_cycle(now);
                }
            }
            FormingPhase::Idle => {}
        }
    }

    fn should_trigger_error(&mut self) -> bool {
        // The press is only vulnerable under load.
        if self.phase != FormingPhase::Form && self.phase != FormingPhase::Hold {
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
            .uniform_int(0, FORMING_ERROR_CODES.len() as i64 - 1) as usize;
        self.apply_error(FORMING_ERROR_CODES[idx], now);
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
        self.phase = FormingPhase::Idle;
    }

    fn generate_part_id(&mut self, now: DateTime<Utc>) {
        self.part_counter += 1;
        self.current_part_id = format!(
            "PART-{}-{:04}",
            now.format("%Y-%m-%d"),
            self.part_counter
        );
    }

    /// Resolve the formed part: one scrap roll, then a push on good.
    ///
    /// The caller guarantees buffer space, so the roll happens exactly once
    /// per cycle and a scrap outcome never enters the buffer.
    fn eject_part(&mut self, now: DateTime<Utc>) {
        let is_scrap = self
            .noise
            .bool_with(self.base.config().effective_scrap_rate());

        if is_scrap {
            self.base.complete_cycle(true);
            return;
        }

        let order_id = self
            .base
            .current_order()
            .map(|o| o.order_id.clone())
            .unwrap_or_default();
        let machine_name = self.base.config().name.clone();
        let part = Part::new(self.current_part_id.clone(), order_id, &machine_name, now);
        // Space was checked by the caller; the push cannot fail.
        let _ = self.output_buffer.push(part);
        self.base.complete_cycle(false);
    }

    fn complete_cycle(&mut self, now: DateTime<Utc>) {
        self.cycle_count += 1;

        if self.base.is_order_complete() {
            self.base.finish_order();
            self.base.transition_to(MachineState::Idle, now);
            self.phase = FormingPhase::Idle;
            return;
        }

        self.base.mark_cycle_start(now);
        self.phase = FormingPhase::Load;
        self.generate_part_id(now);
    }

    fn phase_bounds(&self) -> PhaseBounds {
        let cycle = self.base.config().effective_cycle_time();
        let cfg = &self.form_config;
        let load_end = cycle.mul_f64(cfg.load_fraction);
        let form_end = load_end + cycle.mul_f64(cfg.form_fraction);
        let hold_end = form_end + cycle.mul_f64(cfg.hold_fraction);
        let eject_end = hold_end + cycle.mul_f64(cfg.eject_fraction);
        PhaseBounds {
            load_end,
            form_end,
            hold_end,
            eject_end,
        }
    }

    fn phase_progress(&self, now: DateTime<Utc>) -> f64 {
        let bounds = self.phase_bounds();
        let cycle = self.base.config().effective_cycle_time();
        let elapsed = self.base.elapsed_in_cycle(now);
        match self.phase {
            FormingPhase::Load => phase_fraction(elapsed, Duration::ZERO, bounds.load_end),
            FormingPhase::Form => phase_fraction(elapsed, bounds.load_end, bounds.form_end),
            FormingPhase::Hold => phase_fraction(elapsed, bounds.form_end, bounds.hold_end),
            FormingPhase::Eject => phase_fraction(elapsed, bounds.hold_end, bounds.eject_end),
            FormingPhase::Raise => phase_fraction(elapsed, bounds.eject_end, cycle),
            FormingPhase::Idle => 0.0,
        }
    }

    // ─── Observable generation ──────────────────────────────────────

    fn running_values(&mut self, data: &mut ValueMap, progress: f64) {
        match self.phase {
            FormingPhase::Load => self.load_values(data, progress),
            FormingPhase::Form => self.form_values(data, progress),
            FormingPhase::Hold => self.hold_values(data, progress),
            FormingPhase::Eject => self.eject_values(data, progress),
            FormingPhase::Raise => self.raise_values(data, progress),
            FormingPhase::Idle => self.idle_values(data),
        }
    }

    fn load_values(&mut self, data: &mut ValueMap, progress: f64) {
        let target = self.form_config.target_temperature;
        let temp = self.noise.colored_noise("temp", target, 0.02, 0.7);
        let die_temp = self.noise.colored_noise("dieTemp", target * 0.95, 0.02, 0.7);
        self.set_temps(data, temp, die_temp);

        // Hydraulics pressurizing for the stroke.
        let pressure = self
            .noise
            .ramp_value(self.form_config.max_pressure * 0.3, progress, true, 3.0);
        let pressure = clamp(
            self.noise.gaussian_noise(pressure, 0.03),
            0.0,
            self.form_config.max_pressure,
        );
        data.insert("Pressure".into(), pressure.into());
        data.insert("FormingForce".into(), 0.0.into());
        data.insert("RamSpeed".into(), 0.0.into());
    }

    fn form_values(&mut self, data: &mut ValueMap, progress: f64) {
        // Friction and deformation heat, up to 10 degC across the stroke.
        let temp_rise = progress * 10.0;
        let target = self.form_config.target_temperature;
        let temp = self
            .noise
            .colored_noise("temp", target + temp_rise, 0.02, 0.6);
        let die_temp = self
            .noise
            .colored_noise("dieTemp", target + temp_rise * 0.7, 0.02, 0.6);
        self.set_temps(data, temp, die_temp);

        // Quadratic pressure build as the ram descends.
        let pressure_progress = progress * progress;
        let pressure = clamp(
            self.noise.colored_noise(
                "pressure",
                self.form_config.max_pressure * pressure_progress,
                0.03,
                0.5,
            ),
            0.0,
            self.form_config.max_pressure * 1.1,
        );
        data.insert("Pressure".into(), pressure.into());

        let force = clamp_positive(self.noise.colored_noise(
            "force",
            self.form_config.max_forming_force * progress,
            0.03,
            0.5,
        ));
        data.insert("FormingForce".into(), force.into());

        // Fast at entry, slowing to half speed as force builds.
        let speed_profile = 1.0 - progress * 0.5;
        let ram_speed = clamp_positive(
            self.noise
                .gaussian_noise(self.form_config.max_ram_speed * speed_profile, 0.05),
        );
        data.insert("RamSpeed".into(), ram_speed.into());
    }

    fn hold_values(&mut self, data: &mut ValueMap, progress: f64) {
        let temp_rise = 10.0 + progress * 2.0;
        let target = self.form_config.target_temperature;
        let temp = self
            .noise
            .colored_noise("temp", target + temp_rise, 0.02, 0.7);
        let die_temp = self
            .noise
            .colored_noise("dieTemp", target + temp_rise * 0.8, 0.02, 0.7);
        self.set_temps(data, temp, die_temp);

        let pressure = clamp(
            self.noise
                .colored_noise("pressure", self.form_config.max_pressure, 0.02, 0.6),
            0.0,
            self.form_config.max_pressure * 1.1,
        );
        data.insert("Pressure".into(), pressure.into());

        let force = clamp_positive(self.noise.colored_noise(
            "force",
            self.form_config.max_forming_force,
            0.02,
            0.6,
        ));
        data.insert("FormingForce".into(), force.into());
        data.insert(
            "RamSpeed".into(),
            self.noise.gaussian_noise(0.0, 0.01).into(),
        );
    }

    fn eject_values(&mut self, data: &mut ValueMap, progress: f64) {
        let target = self.form_config.target_temperature;
        let temp = self
            .noise
            .colored_noise("temp", target + 8.0 * (1.0 - progress), 0.02, 0.7);
        let die_temp = self
            .noise
            .colored_noise("dieTemp", target + 5.0 * (1.0 - progress), 0.02, 0.7);
        self.set_temps(data, temp, die_temp);

        // Linear pressure release through ejection.
        let pressure = clamp_positive(
            self.noise
                .gaussian_noise(self.form_config.max_pressure * (1.0 - progress), 0.03),
        );
        data.insert("Pressure".into(), pressure.into());
        data.insert(
            "FormingForce".into(),
            clamp_positive(self.form_config.max_forming_force * (1.0 - progress)).into(),
        );
        data.insert("RamSpeed".into(), 0.0.into());
    }

    fn raise_values(&mut self, data: &mut ValueMap, progress: f64) {
        let target = self.form_config.target_temperature;
        let temp = self
            .noise
            .colored_noise("temp", target + 5.0 * (1.0 - progress), 0.02, 0.7);
        let die_temp = self
            .noise
            .colored_noise("dieTemp", target + 3.0 * (1.0 - progress), 0.02, 0.7);
        self.set_temps(data, temp, die_temp);

        let pressure = clamp_positive(
            self.noise
                .gaussian_noise(self.form_config.max_pressure * 0.15, 0.05),
        );
        data.insert("Pressure".into(), pressure.into());
        data.insert("FormingForce".into(), 0.0.into());

        // Return stroke, negative speed.
        data.insert(
            "RamSpeed".into(),
            self.noise
                .gaussian_noise(-self.form_config.max_ram_speed * 0.8, 0.05)
                .into(),
        );
    }

    fn setup_values(&mut self, data: &mut ValueMap, progress: f64) {
        // Dies warming up from hydraulic activity, not yet at temperature.
        let temp = self
            .noise
            .ramp_value(self.form_config.target_temperature * 0.8, progress, true, 2.0);
        let temp = clamp(self.noise.gaussian_noise(temp, 0.02), 20.0, 100.0);
        let die = self
            .noise
            .ramp_value(self.form_config.target_temperature * 0.7, progress, true, 2.5);
        let die = clamp(self.noise.gaussian_noise(die, 0.02), 20.0, 100.0);
        self.set_temps(data, temp, die);

        let pressure = clamp(
            self.noise
                .gaussian_noise(self.form_config.max_pressure * 0.1, 0.05),
            0.0,
            self.form_config.max_pressure,
        );
        data.insert("Pressure".into(), pressure.into());
        data.insert("FormingForce".into(), 0.0.into());
        data.insert("RamSpeed".into(), 0.0.into());
    }

    fn idle_values(&mut self, data: &mut ValueMap) {
        // First-order decay toward ambient.
        let temp = self.noise.colored_noise(
            "temp",
            AMBIENT_TEMP + (self.last_temperature - AMBIENT_TEMP) * 0.99,
            0.02,
            0.7,
        );
        let die = self.noise.colored_noise(
            "dieTemp",
            AMBIENT_TEMP + (self.last_die_temperature - AMBIENT_TEMP) * 0.98,
            0.02,
            0.7,
        );
        self.set_temps(data, temp, die);

        data.insert(
            "Pressure".into(),
            clamp_positive(self.noise.gaussian_noise(0.0, 0.01)).into(),
        );
        data.insert("FormingForce".into(), 0.0.into());
        data.insert("RamSpeed".into(), 0.0.into());
    }

    fn stopped_values(&mut self, data: &mut ValueMap) {
        // Slower cooldown when stopped mid-operation.
        let temp = self.noise.colored_noise(
            "temp",
            AMBIENT_TEMP + (self.last_temperature - AMBIENT_TEMP) * 0.995,
            0.02,
            0.7,
        );
        let die = self.noise.colored_noise(
            "dieTemp",
            AMBIENT_TEMP + (self.last_die_temperature - AMBIENT_TEMP) * 0.99,
            0.02,
            0.7,
        );
        self.set_temps(data, clamp(temp, 20.0, 100.0), clamp(die, 20.0, 100.0));

        // Hydraulic pressure bleeds off.
        let mut pressure = self.last_pressure * 0.98;
        if pressure < 1.0 {
            pressure = 0.0;
        }
        data.insert(
            "Pressure".into(),
            clamp_positive(self.noise.gaussian_noise(pressure, 0.02)).into(),
        );

        let mut force = self.last_forming_force * 0.95;
        if force < 1.0 {
            force = 0.0;
        }
        data.insert("FormingForce".into(), force.into());
        data.insert("RamSpeed".into(), 0.0.into());
    }

    fn set_temps(&mut self, data: &mut ValueMap, temp: f64, die: f64) {
        let temp = clamp(temp, 20.0, 100.0);
        let die = clamp(die, 20.0, 100.0);
        data.insert("Temperature".into(), temp.into());
        data.insert("DieTemperature".into(), die.into());
    }
}

fn phase_fraction(elapsed: Duration, start: Duration, end: Duration) -> f64 {
    let span = end.saturating_sub(start).as_secs_f64();
    if span <= 0.0 {
        return 0.0;
    }
    ((elapsed.as_secs_f64() - start.as_secs_f64()) / span).clamp(0.0, 1.0)
}

impl MachineSimulator for FormingMachine {
    fn name(&self) -> &str {
        &self.base.config().name
    }

    fn machine_type(&self) -> &'static str {
        "forming"
    }

    fn state(&self) -> MachineState {
        self.base.state()
    }

    fn counters(&self) -> (u32, u32) {
        self.base.counters()
    }

    fn reset_counters(&mut self) {
        self.base.reset_counters();
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
            NodeDefinition::new("Temperature", "Temperature", "Process temperature", DataType::Double, "°C", Value::Double(25.0)),
            NodeDefinition::new("Pressure", "Pressure", "Hydraulic pressure", DataType::Double, "bar", Value::Double(0.0)),
            NodeDefinition::new("FormingForce", "Forming Force", "Forming force", DataType::Double, "kN", Value::Double(0.0)),
            NodeDefinition::new("RamPosition", "Ram Position", "Ram position (0=top)", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("RamSpeed", "Ram Speed", "Ram speed", DataType::Double, "mm/s", Value::Double(0.0)),
            NodeDefinition::new("DieTemperature", "Die Temperature", "Die surface temperature", DataType::Double, "°C", Value::Double(25.0)),
            NodeDefinition::new("CycleCount", "Cycle Count", "Total cycles completed", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CycleTime", "Cycle Time", "Current cycle time", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("State", "State", "Machine state (0-4)", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("GoodParts", "Good Parts", "Good parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("ScrapParts", "Scrap Parts", "Scrap parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CurrentOrderId", "Current Order ID", "Active order ID", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CurrentPartNumber", "Current Part Number", "Active part number", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CycleProgress", "Cycle Progress", "Progress 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("OutputBufferCount", "Output Buffer Count", "Parts in output buffer", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CurrentPartId", "Current Part ID", "Current part being formed", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ErrorCode", "Error Code", "Current error code", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ErrorMessage", "Error Message", "Error description", DataType::String, "", Value::Text(String::new())),
        ]
    }

    fn generate_data(&mut self, now: DateTime<Utc>) -> ValueMap {
        let mut data = ValueMap::new();
        let progress = self.phase_progress(now);

        match self.base.state() {
            MachineState::Idle => self.idle_values(&mut data),
            MachineState::Setup => self.setup_values(&mut data, progress),
            MachineState::Running => self.running_values(&mut data, progress),
            MachineState::PlannedStop | MachineState::UnplannedStop => {
                self.stopped_values(&mut data)
            }
        }

        // Carry thermal and hydraulic state into the next tick.
        if let Some(Value::Double(t)) = data.get("Temperature") {
            self.last_temperature = *t;
        }
        if let Some(Value::Double(t)) = data.get("DieTemperature") {
            self.last_die_temperature = *t;
        }
        if let Some(Value::Double(p)) = data.get("Pressure") {
            self.last_pressure = *p;
        }
        if let Some(Value::Double(f)) = data.get("FormingForce") {
            self.last_forming_force = *f;
        }

        data.insert("RamPosition".into(), self.ram_position.into());
        data.insert("CycleCount".into(), self.cycle_count.into());
        data.insert(
            "CycleTime".into(),
            self.base.elapsed_in_cycle(now).as_secs_f64().into(),
        );
        data.insert("State".into(), (self.base.state() as i32).into());
        let (good, scrap) = self.base.counters();
        data.insert("GoodParts".into(), good.into());
        data.insert("ScrapParts".into(), scrap.into());
        data.insert("CycleProgress".into(), self.base.cycle_progress(now).into());
        data.insert(
            "OutputBufferCount".into(),
            (self.output_buffer.len() as i32).into(),
        );
        data.insert("CurrentPartId".into(), self.current_part_id.clone().into());

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
