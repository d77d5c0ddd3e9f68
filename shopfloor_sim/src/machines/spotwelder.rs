//! Stud spot welder phase engine, end of the line.
//!
//! Seven-phase cycle with four discrete weld pulses inside the weld phase,
//! each shaped 10 % ramp-up / 80 % steady / 10 % ramp-down. Every pulse heats
//! the electrode by ~15 degC and the part by ~10 degC; both decay
//! geometrically outside the weld phase. Electrode wear grows with the weld
//! count: past 80 % wear the rolled error rate triples, and an electrode
//! above its temperature limit forces the `Overheat` error.

use crate::buffer::PartBuffer;
use crate::machine::{BaseMachine, MachineConfig, MachineEvent, MachineSimulator};
use chrono::{DateTime, Utc};
use shopfloor_common::nodes::{DataType, NodeDefinition, Value, ValueMap};
use shopfloor_common::noise::{clamp_positive, NoiseGenerator};
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{ErrorInfo, Part, PartStatus, ProductionOrder};
use std::time::Duration;

const AMBIENT_TEMP: f64 = 25.0;
/// Electrode heat input per weld pulse, degC.
const ELECTRODE_HEAT_PER_WELD: f64 = 15.0;
/// Part heat input per weld pulse, degC.
const PART_HEAT_PER_WELD: f64 = 10.0;
/// Wear threshold past which the error rate triples.
const WEAR_ERROR_THRESHOLD: f64 = 80.0;

/// Phase within a spot welding cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotWelderPhase {
    Idle,
    /// Part loaded onto the fixture.
    Load,
    /// Fixtures clamping the part.
    Clamp,
    /// Stud positioning before current flows.
    PreWeld,
    /// Welding current flowing, four pulses.
    Weld,
    /// Post-weld hold and cooling.
    Hold,
    /// Fixtures releasing.
    Release,
    /// Part unloading.
    Unload,
}

impl SpotWelderPhase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Load => "Load",
            Self::Clamp => "Clamp",
            Self::PreWeld => "PreWeld",
            Self::Weld => "Weld",
            Self::Hold => "Hold",
            Self::Release => "Release",
            Self::Unload => "Unload",
        }
    }
}

pub const SPOT_WELDER_ERROR_CODES: [&str; 6] = ["S001", "S002", "S003", "S004", "S005", "S006"];

/// Forced when the electrode runs past its temperature limit.
pub const ERROR_OVERHEAT: &str = "S004";
/// Scraps the part on the fixture immediately.
pub const ERROR_QUALITY_REJECT: &str = "S006";

pub fn error_info(code: &str) -> (&'static str, Duration, Duration) {
    match code {
        "S001" => (
            "Weld quality fault detected",
            Duration::from_secs(30),
            Duration::from_secs(60),
        ),
        "S002" => (
            "Clamp mechanism fault",
            Duration::from_secs(45),
            Duration::from_secs(2 * 60),
        ),
        "S003" => (
            "Stud feed mechanism jam",
            Duration::from_secs(30),
            Duration::from_secs(60),
        ),
        "S004" => (
            "Electrode overheat protection",
            Duration::from_secs(60),
            Duration::from_secs(3 * 60),
        ),
        "S005" => (
            "Weld current out of range",
            Duration::from_secs(45),
            Duration::from_secs(90),
        ),
        "S006" => (
            "Weld quality below threshold",
            Duration::from_secs(20),
            Duration::from_secs(45),
        ),
        _ => ("", Duration::ZERO, Duration::ZERO),
    }
}

/// Spot welder process parameters and phase fractions.
#[derive(Debug, Clone)]
pub struct SpotWelderConfig {
    /// kA.
    pub target_current: f64,
    /// V (secondary side).
    pub target_voltage: f64,
    /// Duration of each weld pulse.
    pub weld_duration: Duration,
    /// Studs per part.
    pub welds_per_part: u32,

    /// kN.
    pub max_electrode_force: f64,
    /// kN.
    pub max_clamp_force: f64,
    /// degC, overheat protection limit.
    pub max_electrode_temp: f64,

    pub load_fraction: f64,
    pub clamp_fraction: f64,
    pub pre_weld_fraction: f64,
    pub weld_fraction: f64,
    pub hold_fraction: f64,
    pub release_fraction: f64,
    pub unload_fraction: f64,

    /// Welds until the electrode needs replacement.
    pub electrode_life_welds: u32,
    pub input_buffer_capacity: usize,
}

impl Default for SpotWelderConfig {
    fn default() -> Self {
        // Steel sheet: 6-10 kA, 3-12 V secondary.
        Self {
            target_current: 8.0,
            target_voltage: 6.0,
            weld_duration: Duration::from_millis(200),
            welds_per_part: 4,
            max_electrode_force: 3.0,
            max_clamp_force: 5.0,
            max_electrode_temp: 400.0,
            load_fraction: 0.10,
            clamp_fraction: 0.10,
            pre_weld_fraction: 0.05,
            weld_fraction: 0.35,
            hold_fraction: 0.15,
            release_fraction: 0.10,
            unload_fraction: 0.15,
            electrode_life_welds: 5000,
            input_buffer_capacity: 3,
        }
    }
}

struct PhaseBounds {
    load_end: Duration,
    clamp_end: Duration,
    pre_weld_end: Duration,
    weld_end: Duration,
    hold_end: Duration,
    release_end: Duration,
}

/// Stud spot welder simulator.
pub struct SpotWelder {
    base: BaseMachine,
    welder_config: SpotWelderConfig,
    phase: SpotWelderPhase,
    cycle_count: u32,
    welds_in_current_part: u32,
    total_welds: u32,
    electrode_weld_count: u32,
    current_part: Option<Part>,
    input_buffer: PartBuffer,
    electrode_temp: f64,
    part_temp: f64,
    noise: NoiseGenerator,
    last_electrode_force: f64,
    last_clamp_force: f64,
}

impl SpotWelder {
    pub fn new(config: MachineConfig, welder_config: SpotWelderConfig, now: DateTime<Utc>) -> Self {
        let capacity = welder_config.input_buffer_capacity;
        Self {
            base: BaseMachine::new(config, now),
            welder_config,
            phase: SpotWelderPhase::Idle,
            cycle_count: 0,
            welds_in_current_part: 0,
            total_welds: 0,
            electrode_weld_count: 0,
            current_part: None,
            input_buffer: PartBuffer::new(capacity),
            electrode_temp: AMBIENT_TEMP,
            part_temp: AMBIENT_TEMP,
            noise: NoiseGenerator::new(),
            last_electrode_force: 0.0,
            last_clamp_force: 0.0,
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(
        config: MachineConfig,
        welder_config: SpotWelderConfig,
        now: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut welder = Self::new(config, welder_config, now);
        welder.noise = NoiseGenerator::with_seed(seed);
        welder
    }

    pub fn phase(&self) -> SpotWelderPhase {
        self.phase
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn total_welds(&self) -> u32 {
        self.total_welds
    }

    pub fn electrode_temp(&self) -> f64 {
        self.electrode_temp
    }

    /// Electrode wear in percent of its rated life.
    pub fn electrode_wear(&self) -> f64 {
        f64::from(self.electrode_weld_count) / f64::from(self.welder_config.electrode_life_welds)
            * 100.0
    }

    pub fn input_buffer(&self) -> &PartBuffer {
        &self.input_buffer
    }

    pub fn input_buffer_mut(&mut self) -> &mut PartBuffer {
        &mut self.input_buffer
    }

    pub fn current_part_id(&self) -> Option<&str> {
        self.current_part.as_ref().map(|p| p.id.as_str())
    }

    pub fn base(&self) -> &BaseMachine {
        &self.base
    }

    /// Advance the state machine by one tick.
    pub fn update(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        // Thermal decay whenever no current is flowing.
        if self.phase != SpotWelderPhase::Weld {
            self.cool_down();
        }

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

    fn cool_down(&mut self) {
        // The water-cooled electrode sheds heat slowly; the part faster.
        self.electrode_temp = AMBIENT_TEMP + (self.electrode_temp - AMBIENT_TEMP) * 0.995;
        self.part_temp = AMBIENT_TEMP + (self.part_temp - AMBIENT_TEMP) * 0.98;
    }

    fn update_idle(&mut self, now: DateTime<Utc>) {
        self.phase = SpotWelderPhase::Idle;
        if !self.input_buffer.is_empty() {
            self.base.transition_to(MachineState::Setup, now);
        }
    }

    fn update_setup(&mut self, now: DateTime<Utc>) {
        // Electrode check and position calibration.
        if self.base.elapsed_in_state(now) >= self.base.config().effective_setup_time() {
            match self.take_next_part() {
                Some(()) => {
                    self.base.transition_to(MachineState::Running, now);
                    self.base.mark_cycle_start(now);
                    self.phase = SpotWelderPhase::Load;
                    self.welds_in_current_part = 0;
                }
                // Input drained while setting up: bounce back to idle.
                None => self.base.transition_to(MachineState::Idle, now),
            }
        }
    }

    fn take_next_part(&mut self) -> Option<()> {
        let mut part = self.input_buffer.pop()?;
        part.status = PartStatus::BeingWelded;
        part.location = self.base.config().name.clone();
        self.current_part = Some(part);
        Some(())
    }

    fn update_running(&mut self, now: DateTime<Utc>, is_break_time: bool) {
        // Break only between parts, never with a part on the fixture.
        if is_break_time && self.phase == SpotWelderPhase::Idle {
            self.base.transition_to(MachineState::PlannedStop, now);
            return;
        }

        if self.should_trigger_error() {
            self.trigger_error(now);
            return;
        }

        let bounds = self.phase_bounds();
        let elapsed = self.base.elapsed_in_cycle(now);
        let cycle_time = self.base.config().effective_cycle_time();

        match self.phase {
            SpotWelderPhase::Load => {
                if elapsed >= bounds.load_end {
                    self.phase = SpotWelderPhase::Clamp;
                }
            }
            SpotWelderPhase::Clamp => {
                if elapsed >= bounds.clamp_end {
                    self.phase = SpotWelderPhase::PreWeld;
                }
            }
            SpotWelderPhase::PreWeld => {
                if elapsed >= bounds.pre_weld_end {
                    self.phase = SpotWelderPhase::Weld;
                }
            }
            SpotWelderPhase::Weld => {
                self.update_weld_phase(elapsed, bounds.pre_weld_end, bounds.weld_end);
            }
            SpotWelderPhase::Hold => {
                if elapsed >= bounds.hold_end {
                    self.phase = SpotWelderPhase::Release;
                }
            }
            SpotWelderPhase::Release => {
                if elapsed >= bounds.release_end {
                    self.phase = SpotWelderPhase::Unload;
                }
            }
            SpotWelderPhase::Unload => {
                if elapsed >= cycle_time {
                    self.complete_cycle(now);
                }
            }
            SpotWelderPhase::Idle => {}
        }
    }

    fn update_weld_phase(&mut self, elapsed: Duration, start: Duration, end: Duration) {
        let span = end.saturating_sub(start).as_secs_f64();
        if span <= 0.0 {
            return;
        }
        let progress = ((elapsed.as_secs_f64() - start.as_secs_f64()) / span).clamp(0.0, 1.0);

        // Pulses are evenly spaced in phase progress; a coarse tick may
        // complete more than one.
        let welds_per_part = self.welder_config.welds_per_part;
        let weld_number = ((progress * f64::from(welds_per_part)) as u32).min(welds_per_part);
        while self.welds_in_current_part < weld_number {
            self.record_weld();
        }

        if elapsed >= end {
            while self.welds_in_current_part < welds_per_part {
                self.record_weld();
            }
            self.phase = SpotWelderPhase::Hold;
        }
    }

    fn record_weld(&mut self) {
        self.welds_in_current_part += 1;
        self.total_welds += 1;
        self.electrode_weld_count += 1;
        self.electrode_temp += ELECTRODE_HEAT_PER_WELD;
        self.part_temp += PART_HEAT_PER_WELD;
    }

    fn should_trigger_error(&mut self) -> bool {
        // Weld faults need a flowing current.
        if self.phase != SpotWelderPhase::Weld {
            return false;
        }

        let mut rate = self.base.config().effective_error_rate();
        if self.electrode_wear() > WEAR_ERROR_THRESHOLD {
            rate *= 3.0;
        }

        let cfg = self.base.config();
        let (tick, cycle) = (cfg.publish_interval, cfg.effective_cycle_time());
        self.noise.should_trigger(rate, tick, cycle)
    }

    fn trigger_error(&mut self, now: DateTime<Utc>) {
        let idx = self
            .noise
            .uniform_int(0, SPOT_WELDER_ERROR_CODES.len() as i64 - 1) as usize;
        let mut code = SPOT_WELDER_ERROR_CODES[idx];

        // Overheat protection overrides the random pick.
        if self.electrode_temp > self.welder_config.max_electrode_temp {
            code = ERROR_OVERHEAT;
        }

        self.apply_error(code, now);
    }

    /// Inject a specific fault (scenario control).
    pub fn force_error(&mut self, code: &str, now: DateTime<Utc>) {
        self.apply_error(code, now);
    }

    fn apply_error(&mut self, code: &str, now: DateTime<Utc>) {
        let (message, min_dur, max_dur) = error_info(code);
        let duration = self.noise.uniform_duration(min_dur, max_dur);
        let duration = self.base.config().effective_error_duration(duration);

        // A quality reject scraps the part on the fixture.
        if code == ERROR_QUALITY_REJECT {
            if let Some(mut part) = self.current_part.take() {
                part.status = PartStatus::Scrap;
                part.is_scrap = true;
                part.scrap_reason = "Weld quality reject".to_string();
                self.base.scrap_part_directly();
            }
        }

        self.base.trigger_error(code, message, duration, now);
        self.phase = SpotWelderPhase::Idle;
    }

    fn complete_cycle(&mut self, now: DateTime<Utc>) {
        self.cycle_count += 1;

        let is_scrap = self
            .noise
            .bool_with(self.base.config().effective_scrap_rate());

        if let Some(part) = &mut self.current_part {
            part.welding_complete = Some(now);
            part.spot_welder_id = self.base.config().name.clone();
            if is_scrap {
                part.status = PartStatus::Scrap;
                part.is_scrap = true;
                part.scrap_reason = "Quality inspection failed".to_string();
            } else {
                part.status = PartStatus::Complete;
            }
        }
        self.current_part = None;
        self.welds_in_current_part = 0;
        self.base.complete_cycle(is_scrap);

        // Chain into the next part or fall back to idle.
        if self.take_next_part().is_some() {
            self.base.mark_cycle_start(now);
            self.phase = SpotWelderPhase::Load;
        } else {
            self.base.transition_to(MachineState::Idle, now);
            self.phase = SpotWelderPhase::Idle;
        }
    }

    fn phase_bounds(&self) -> PhaseBounds {
        let cycle = self.base.config().effective_cycle_time();
        let cfg = &self.welder_config;
        let load_end = cycle.mul_f64(cfg.load_fraction);
        let clamp_end = load_end + cycle.mul_f64(cfg.clamp_fraction);
        let pre_weld_end = clamp_end + cycle.mul_f64(cfg.pre_weld_fraction);
        let weld_end = pre_weld_end + cycle.mul_f64(cfg.weld_fraction);
        let hold_end = weld_end + cycle.mul_f64(cfg.hold_fraction);
        let release_end = hold_end + cycle.mul_f64(cfg.release_fraction);
        PhaseBounds {
            load_end,
            clamp_end,
            pre_weld_end,
            weld_end,
            hold_end,
            release_end,
        }
    }

    fn phase_progress(&self, now: DateTime<Utc>) -> f64 {
        let b = self.phase_bounds();
        let cycle = self.base.config().effective_cycle_time();
        let elapsed = self.base.elapsed_in_cycle(now);
        match self.phase {
            SpotWelderPhase::Load => phase_fraction(elapsed, Duration::ZERO, b.load_end),
            SpotWelderPhase::Clamp => phase_fraction(elapsed, b.load_end, b.clamp_end),
            SpotWelderPhase::PreWeld => phase_fraction(elapsed, b.clamp_end, b.pre_weld_end),
            SpotWelderPhase::Weld => phase_fraction(elapsed, b.pre_weld_end, b.weld_end),
            SpotWelderPhase::Hold => phase_fraction(elapsed, b.weld_end, b.hold_end),
            SpotWelderPhase::Release => phase_fraction(elapsed, b.hold_end, b.release_end),
            SpotWelderPhase::Unload => phase_fraction(elapsed, b.release_end, cycle),
            SpotWelderPhase::Idle => 0.0,
        }
    }

    // ─── Observable generation ──────────────────────────────────────

    fn running_values(&mut self, data: &mut ValueMap, progress: f64) {
        match self.phase {
            SpotWelderPhase::Load => {
                self.quiet_electrics(data, 0.5);
                data.insert("ElectrodeForce".into(), 0.0.into());
                data.insert("ClampForce".into(), 0.0.into());
            }
            SpotWelderPhase::Clamp => {
                self.quiet_electrics(data, 0.5);
                data.insert("ElectrodeForce".into(), 0.0.into());
                let clamp = clamp_positive(self.noise.gaussian_noise(
                    self.noise
                        .ramp_value(self.welder_config.max_clamp_force, progress, true, 2.0),
                    0.03,
                ));
                data.insert("ClampForce".into(), clamp.into());
            }
            SpotWelderPhase::PreWeld => {
                self.quiet_electrics(data, 0.8);
                let clamp = self.noise.colored_noise(
                    "clamp",
                    self.welder_config.max_clamp_force,
                    0.02,
                    0.7,
                );
                data.insert("ClampForce".into(), clamp.into());
                let electrode = clamp_positive(self.noise.gaussian_noise(
                    self.noise.ramp_value(
                        self.welder_config.max_electrode_force * 0.8,
                        progress,
                        true,
                        2.0,
                    ),
                    0.02,
                ));
                data.insert("ElectrodeForce".into(), electrode.into());
            }
            SpotWelderPhase::Weld => self.weld_values(data, progress),
            SpotWelderPhase::Hold => {
                data.insert("WeldCurrent".into(), 0.0.into());
                data.insert(
                    "WeldVoltage".into(),
                    clamp_positive(self.noise.gaussian(0.5, 0.1)).into(),
                );
                data.insert("WeldTime".into(), 0.0.into());
                data.insert("WeldEnergy".into(), 0.0.into());
                // Forces taper while the nugget cools.
                let clamp = clamp_positive(self.noise.gaussian_noise(
                    self.welder_config.max_clamp_force * (1.0 - progress * 0.3),
                    0.02,
                ));
                data.insert("ClampForce".into(), clamp.into());
                let electrode = clamp_positive(self.noise.gaussian_noise(
                    self.welder_config.max_electrode_force * (1.0 - progress * 0.5),
                    0.02,
                ));
                data.insert("ElectrodeForce".into(), electrode.into());
            }
            SpotWelderPhase::Release => {
                data.insert("WeldCurrent".into(), 0.0.into());
                data.insert(
                    "WeldVoltage".into(),
                    clamp_positive(self.noise.gaussian(0.3, 0.1)).into(),
                );
                data.insert("WeldTime".into(), 0.0.into());
                data.insert("WeldEnergy".into(), 0.0.into());
                let clamp = clamp_positive(self.noise.gaussian_noise(
                    self.welder_config.max_clamp_force * 0.7 * (1.0 - progress),
                    0.02,
                ));
                data.insert("ClampForce".into(), clamp.into());
                let electrode = clamp_positive(self.noise.gaussian_noise(
                    self.welder_config.max_electrode_force * 0.5 * (1.0 - progress),
                    0.015,
                ));
                data.insert("ElectrodeForce".into(), electrode.into());
            }
            SpotWelderPhase::Unload => {
                self.quiet_electrics(data, 0.2);
                data.insert("ElectrodeForce".into(), 0.0.into());
                data.insert("ClampForce".into(), 0.0.into());
            }
            SpotWelderPhase::Idle => self.idle_values(data),
        }
    }

    fn weld_values(&mut self, data: &mut ValueMap, progress: f64) {
        let welds_per_part = f64::from(self.welder_config.welds_per_part);
        let progress_per_weld = 1.0 / welds_per_part;

        let current_weld = ((progress / progress_per_weld) as u32)
            .min(self.welder_config.welds_per_part - 1);
        let weld_progress =
            (progress - f64::from(current_weld) * progress_per_weld) / progress_per_weld;

        // Pulse profile: ramp up 10 %, steady 80 %, ramp down 10 %.
        let (current, voltage) = if weld_progress < 0.1 {
            let ramp = weld_progress / 0.1;
            (
                self.welder_config.target_current * ramp,
                self.welder_config.target_voltage * ramp,
            )
        } else if weld_progress < 0.9 {
            (
                self.noise
                    .colored_noise("current", self.welder_config.target_current, 0.03, 0.6),
                self.noise
                    .colored_noise("voltage", self.welder_config.target_voltage, 0.02, 0.6),
            )
        } else {
            let ramp = (weld_progress - 0.9) / 0.1;
            (
                self.welder_config.target_current * (1.0 - ramp),
                self.welder_config.target_voltage * (1.0 - ramp),
            )
        };

        let weld_ms = self.welder_config.weld_duration.as_secs_f64() * 1000.0;
        let weld_time = weld_progress * weld_ms;
        // E = I * U * t, current in kA.
        let weld_energy = current * 1000.0 * voltage * (weld_time / 1000.0);

        data.insert("WeldCurrent".into(), clamp_positive(current).into());
        data.insert("WeldVoltage".into(), clamp_positive(voltage).into());
        data.insert("WeldTime".into(), weld_time.into());
        data.insert("WeldEnergy".into(), clamp_positive(weld_energy).into());

        let clamp = self.noise.colored_noise(
            "clamp",
            self.welder_config.max_clamp_force,
            0.02,
            0.7,
        );
        data.insert("ClampForce".into(), clamp.into());
        let electrode = self.noise.colored_noise(
            "electrode",
            self.welder_config.max_electrode_force,
            0.02,
            0.7,
        );
        data.insert("ElectrodeForce".into(), electrode.into());
    }

    fn quiet_electrics(&mut self, data: &mut ValueMap, standby_voltage: f64) {
        data.insert("WeldCurrent".into(), 0.0.into());
        data.insert(
            "WeldVoltage".into(),
            clamp_positive(self.noise.gaussian(standby_voltage, 0.1)).into(),
        );
        data.insert("WeldTime".into(), 0.0.into());
        data.insert("WeldEnergy".into(), 0.0.into());
    }

    fn setup_values(&mut self, data: &mut ValueMap, progress: f64) {
        self.quiet_electrics(data, 0.5);
        // Clamp self-test.
        let clamp = clamp_positive(self.noise.ramp_value(
            self.welder_config.max_clamp_force * 0.3,
            progress,
            true,
            3.0,
        ));
        data.insert("ClampForce".into(), clamp.into());
        data.insert("ElectrodeForce".into(), 0.0.into());
    }

    fn idle_values(&mut self, data: &mut ValueMap) {
        data.insert("WeldCurrent".into(), 0.0.into());
        data.insert("WeldVoltage".into(), 0.0.into());
        data.insert("WeldTime".into(), 0.0.into());
        data.insert("WeldEnergy".into(), 0.0.into());
        data.insert("ElectrodeForce".into(), 0.0.into());
        data.insert("ClampForce".into(), 0.0.into());
    }

    fn stopped_values(&mut self, data: &mut ValueMap) {
        data.insert("WeldCurrent".into(), 0.0.into());
        data.insert(
            "WeldVoltage".into(),
            clamp_positive(self.noise.gaussian(0.1, 0.05)).into(),
        );
        data.insert("WeldTime".into(), 0.0.into());
        data.insert("WeldEnergy".into(), 0.0.into());

        // Forces bleed off.
        let mut electrode = self.last_electrode_force * 0.95;
        if electrode < 0.1 {
            electrode = 0.0;
        }
        data.insert("ElectrodeForce".into(), electrode.into());
        let mut clamp = self.last_clamp_force * 0.95;
        if clamp < 0.1 {
            clamp = 0.0;
        }
        data.insert("ClampForce".into(), clamp.into());
    }
}

fn phase_fraction(elapsed: Duration, start: Duration, end: Duration) -> f64 {
    let span = end.saturating_sub(start).as_secs_f64();
    if span <= 0.0 {
        return 0.0;
    }
    ((elapsed.as_secs_f64() - start.as_secs_f64()) / span).clamp(0.0, 1.0)
}

impl MachineSimulator for SpotWelder {
    fn name(&self) -> &str {
        &self.base.config().name
    }

    fn machine_type(&self) -> &'static str {
        "spotwelder"
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
            NodeDefinition::new("WeldCurrent", "Weld Current", "Welding current", DataType::Double, "kA", Value::Double(0.0)),
            NodeDefinition::new("WeldVoltage", "Weld Voltage", "Welding voltage", DataType::Double, "V", Value::Double(0.0)),
            NodeDefinition::new("WeldTime", "Weld Time", "Current weld duration", DataType::Double, "ms", Value::Double(0.0)),
            NodeDefinition::new("WeldEnergy", "Weld Energy", "Weld energy", DataType::Double, "J", Value::Double(0.0)),
            NodeDefinition::new("ElectrodeForce", "Electrode Force", "Electrode force", DataType::Double, "kN", Value::Double(0.0)),
            NodeDefinition::new("ClampForce", "Clamp Force", "Fixture clamp force", DataType::Double, "kN", Value::Double(0.0)),
            NodeDefinition::new("ElectrodeTemp", "Electrode Temperature", "Electrode temperature", DataType::Double, "°C", Value::Double(25.0)),
            NodeDefinition::new("PartTemp", "Part Temperature", "Part temperature", DataType::Double, "°C", Value::Double(25.0)),
            NodeDefinition::new("WeldCount", "Weld Count", "Welds in current part", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("TotalWelds", "Total Welds", "Total welds performed", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CycleCount", "Cycle Count", "Parts completed", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CycleTime", "Cycle Time", "Current cycle time", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("State", "State", "Machine state (0-4)", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("GoodParts", "Good Parts", "Good parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("ScrapParts", "Scrap Parts", "Scrap parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CurrentOrderId", "Current Order ID", "Active order ID", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CurrentPartNumber", "Current Part Number", "Active part number", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CycleProgress", "Cycle Progress", "Progress 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("CurrentPartId", "Current Part ID", "Part being welded", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ElectrodeWear", "Electrode Wear", "Electrode wear 0-100%", DataType::Double, "%", Value::Double(0.0)),
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

        if let Some(Value::Double(f)) = data.get("ElectrodeForce") {
            self.last_electrode_force = *f;
        }
        if let Some(Value::Double(f)) = data.get("ClampForce") {
            self.last_clamp_force = *f;
        }

        // Measured temperatures carry 2 % sensor noise.
        data.insert(
            "ElectrodeTemp".into(),
            self.noise.gaussian_noise(self.electrode_temp, 0.02).into(),
        );
        data.insert(
            "PartTemp".into(),
            self.noise.gaussian_noise(self.part_temp, 0.02).into(),
        );

        data.insert("WeldCount".into(), self.welds_in_current_part.into());
        data.insert("TotalWelds".into(), self.total_welds.into());
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
            "CurrentPartId".into(),
            self.current_part_id().unwrap_or_default().to_string().into(),
        );
        data.insert("ElectrodeWear".into(), self.electrode_wear().into());

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

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    fn make_config(cycle_s: u64, setup_s: u64, scrap: f64, error: f64) -> MachineConfig {
        MachineConfig {
            name: "SpotWelder".into(),
            cycle_time: Duration::from_secs(cycle_s),
            setup_time: Duration::from_secs(setup_s),
            scrap_rate: scrap,
            error_rate: error,
            publish_interval: Duration::from_secs(1),
            runtime: None,
        }
    }

    fn make_part(n: u32) -> Part {
        Part::new(
            format!("PART-2026-08-03-{n:04}"),
            "LN-2026-01001".into(),
            "FormingMachine",
            t0(),
        )
    }

    fn make_welder(cycle_s: u64, setup_s: u64) -> SpotWelder {
        SpotWelder::with_seed(
            make_config(cycle_s, setup_s, 0.0, 0.0),
            SpotWelderConfig::default(),
            t0(),
            1,
        )
    }

    fn run_for(welder: &mut SpotWelder, start: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
        let mut now = start;
        for i in 0..=seconds {
            now = start + TimeDelta::seconds(i);
            welder.update(now, false);
        }
        now
    }

    #[test]
    fn test_consumes_part_at_setup_end() {
        let mut welder = make_welder(20, 2);
        welder.input_buffer_mut().push(make_part(1)).unwrap();

        let mut now = t0();
        welder.update(now, false);
        assert_eq!(welder.state(), MachineState::Setup);

        now += TimeDelta::seconds(2);
        welder.update(now, false);
        assert_eq!(welder.state(), MachineState::Running);
        assert_eq!(welder.phase(), SpotWelderPhase::Load);
        assert_eq!(welder.current_part_id(), Some("PART-2026-08-03-0001"));
        assert!(welder.input_buffer().is_empty());
    }

    #[test]
    fn test_bounces_to_idle_when_input_drained_during_setup() {
        let mut welder = make_welder(20, 3);
        welder.input_buffer_mut().push(make_part(1)).unwrap();

        let mut now = t0();
        welder.update(now, false);
        assert_eq!(welder.state(), MachineState::Setup);

        // Part vanishes while setting up.
        welder.input_buffer_mut().pop();
        now += TimeDelta::seconds(3);
        welder.update(now, false);
        assert_eq!(welder.state(), MachineState::Idle);
        assert!(welder.current_part_id().is_none());
    }

    #[test]
    fn test_four_weld_pulses_heat_electrode() {
        // Cycle 20 s: weld phase spans 5 s..12 s.
        let mut welder = make_welder(20, 1);
        welder.input_buffer_mut().push(make_part(1)).unwrap();

        run_for(&mut welder, t0(), 14);
        assert_eq!(welder.total_welds(), 4);
        assert_eq!(welder.phase(), SpotWelderPhase::Hold);
        // Four pulses at ~15 degC each, minus some decay outside Weld.
        assert!(
            welder.electrode_temp() > 60.0,
            "electrode temp {}",
            welder.electrode_temp()
        );

        // One part, four welds of a 5000-weld electrode life.
        assert!((welder.electrode_wear() - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_cycle_completion_and_chaining() {
        let mut welder = make_welder(20, 1);
        welder.input_buffer_mut().push(make_part(1)).unwrap();
        welder.input_buffer_mut().push(make_part(2)).unwrap();

        run_for(&mut welder, t0(), 22);
        // First part done, second taken without a new setup.
        assert_eq!(welder.cycle_count(), 1);
        assert_eq!(welder.counters().0, 1);
        assert_eq!(welder.current_part_id(), Some("PART-2026-08-03-0002"));
        assert_eq!(welder.state(), MachineState::Running);

        run_for(&mut welder, t0() + TimeDelta::seconds(23), 21);
        assert_eq!(welder.cycle_count(), 2);
        assert_eq!(welder.state(), MachineState::Idle);
        assert_eq!(welder.total_welds(), 8);
    }

    #[test]
    fn test_electrode_cools_when_not_welding() {
        let mut welder = make_welder(20, 1);
        welder.input_buffer_mut().push(make_part(1)).unwrap();
        run_for(&mut welder, t0(), 14);
        let hot = welder.electrode_temp();

        // Idle out the rest of the cycle and beyond.
        run_for(&mut welder, t0() + TimeDelta::seconds(15), 300);
        assert!(welder.electrode_temp() < hot);
        assert!(welder.electrode_temp() > AMBIENT_TEMP);
    }

    #[test]
    fn test_overheat_forces_error_code() {
        let mut welder = make_welder(20, 1);
        welder.electrode_temp = 450.0; // past the 400 degC limit

        // Whatever code the roll picks, overheat protection wins.
        welder.trigger_error(t0());
        assert_eq!(welder.state(), MachineState::UnplannedStop);
        assert_eq!(welder.current_error().unwrap().code, ERROR_OVERHEAT);
        let err = welder.current_error().unwrap();
        assert!(err.expected_end > err.occurred_at);
    }

    #[test]
    fn test_worn_electrode_triples_error_rate() {
        let mut welder = make_welder(20, 1);
        welder.electrode_weld_count = 4500; // 90 % wear
        assert!(welder.electrode_wear() > WEAR_ERROR_THRESHOLD);

        // With base rate zero the multiplier has nothing to amplify.
        welder.input_buffer_mut().push(make_part(1)).unwrap();
        run_for(&mut welder, t0(), 14);
        assert_eq!(welder.state(), MachineState::Running);
    }

    #[test]
    fn test_quality_reject_scraps_current_part() {
        let mut welder = SpotWelder::with_seed(
            make_config(20, 1, 0.0, 0.0),
            SpotWelderConfig::default(),
            t0(),
            5,
        );
        welder.input_buffer_mut().push(make_part(1)).unwrap();
        let now = run_for(&mut welder, t0(), 8);
        assert!(welder.current_part_id().is_some());

        // Inject the reject directly.
        welder.force_error(ERROR_QUALITY_REJECT, now);
        assert_eq!(welder.counters().1, 1);
        assert!(welder.current_part_id().is_none());
        assert_eq!(welder.state(), MachineState::UnplannedStop);
        assert_eq!(welder.current_error().unwrap().code, ERROR_QUALITY_REJECT);
    }

    #[test]
    fn test_weld_observables_pulse() {
        let mut welder = make_welder(100, 1);
        welder.input_buffer_mut().push(make_part(1)).unwrap();

        // Weld phase spans 25 s..60 s of the 100 s cycle; each pulse is
        // 8.75 s. Sample mid-pulse (steady) and near a pulse boundary.
        let mut now = t0();
        let mut steady_current = 0.0;
        for i in 0..=30 {
            now = t0() + TimeDelta::seconds(i);
            welder.update(now, false);
        }
        assert_eq!(welder.phase(), SpotWelderPhase::Weld);
        let data = welder.generate_data(now);
        if let Some(Value::Double(c)) = data.get("WeldCurrent") {
            steady_current = *c;
        }
        assert!(steady_current > 6.0 && steady_current < 10.0, "current {steady_current}");

        let Some(Value::Double(energy)) = data.get("WeldEnergy") else {
            panic!("missing WeldEnergy")
        };
        assert!(*energy > 0.0);
    }
}
