//! Pick-and-place robot phase engine.
//!
//! Eight movement phases transport one part per cycle from the forming output
//! buffer to the spot-welder input buffer. The picker runs at a third of the
//! line cycle time so it never becomes the structural bottleneck. Its input
//! and output buffers belong to the neighbouring stations and are borrowed
//! for the duration of one tick.
//!
//! Two flow-control points:
//! - `Grip` pops the input head at phase end and retries next tick when the
//!   buffer turned out empty.
//! - `Release` pushes the held part at phase end and stalls in place while
//!   the downstream buffer is full.

use crate::buffer::PartBuffer;
use crate::machine::{BaseMachine, MachineConfig, MachineEvent, MachineSimulator};
use chrono::{DateTime, Utc};
use shopfloor_common::nodes::{DataType, NodeDefinition, Value, ValueMap};
use shopfloor_common::noise::{clamp_positive, NoiseGenerator};
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{ErrorInfo, Part, PartStatus, ProductionOrder};
use std::time::Duration;

/// Phase within a pick-and-place cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerPhase {
    Idle,
    /// Moving above the forming output at safe height.
    MoveToPickup,
    /// Descending to the part.
    ApproachPickup,
    /// Gripper closing on the part.
    Grip,
    /// Lifting the part to safe height.
    RetractPickup,
    /// Traversing to the welder input at safe height.
    MoveToPlace,
    /// Descending to the place position.
    ApproachPlace,
    /// Gripper opening, part handed off.
    Release,
    /// Lifting away from the placed part.
    RetractPlace,
}

impl PickerPhase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::MoveToPickup => "MoveToPickup",
            Self::ApproachPickup => "ApproachPickup",
            Self::Grip => "Grip",
            Self::RetractPickup => "RetractPickup",
            Self::MoveToPlace => "MoveToPlace",
            Self::ApproachPlace => "ApproachPlace",
            Self::Release => "Release",
            Self::RetractPlace => "RetractPlace",
        }
    }
}

/// Gripper actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperState {
    Open = 0,
    Closing = 1,
    Closed = 2,
    Opening = 3,
}

pub const PICKER_ERROR_CODES: [&str; 6] = ["P001", "P002", "P003", "P004", "P005", "P006"];

/// The error that scraps a held part immediately.
pub const ERROR_PART_DROPPED: &str = "P004";

pub fn error_info(code: &str) -> (&'static str, Duration, Duration) {
    match code {
        "P001" => (
            "Gripper mechanism fault",
            Duration::from_secs(30),
            Duration::from_secs(60),
        ),
        "P002" => (
            "Collision detected",
            Duration::from_secs(60),
            Duration::from_secs(3 * 60),
        ),
        "P003" => (
            "Position feedback error",
            Duration::from_secs(45),
            Duration::from_secs(2 * 60),
        ),
        "P004" => (
            "Part dropped during transfer",
            Duration::from_secs(30),
            Duration::from_secs(60),
        ),
        "P005" => (
            "Servo motor overload",
            Duration::from_secs(60),
            Duration::from_secs(2 * 60),
        ),
        "P006" => (
            "Emergency stop activated",
            Duration::from_secs(20),
            Duration::from_secs(60),
        ),
        _ => ("", Duration::ZERO, Duration::ZERO),
    }
}

/// A cartesian TCP position in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn lerp(self, to: Self, progress: f64) -> Self {
        Self {
            x: self.x + (to.x - self.x) * progress,
            y: self.y + (to.y - self.y) * progress,
            z: self.z + (to.z - self.z) * progress,
        }
    }

    fn distance(self, other: Self) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }
}

/// Picker robot workspace, waypoints and phase fractions.
#[derive(Debug, Clone)]
pub struct PickerConfig {
    /// mm, used by the joint-angle approximation.
    pub max_reach: f64,
    /// N.
    pub max_grip_force: f64,

    pub home_position: Position3D,
    pub pickup_position: Position3D,
    pub place_position: Position3D,
    /// Safe travel height for horizontal moves, mm.
    pub safe_z: f64,

    pub move_to_pickup_fraction: f64,
    pub approach_pickup_fraction: f64,
    pub grip_fraction: f64,
    pub retract_pickup_fraction: f64,
    pub move_to_place_fraction: f64,
    pub approach_place_fraction: f64,
    pub release_fraction: f64,
    pub retract_place_fraction: f64,
    // The remainder of the cycle is settle/wait time.
}

impl Default for PickerConfig {
    fn default() -> Self {
        // Forming output on the left, welder input on the right.
        Self {
            max_reach: 1500.0,
            max_grip_force: 100.0,
            home_position: Position3D::new(500.0, 0.0, 800.0),
            pickup_position: Position3D::new(100.0, 300.0, 200.0),
            place_position: Position3D::new(900.0, 300.0, 200.0),
            safe_z: 600.0,
            move_to_pickup_fraction: 0.15,
            approach_pickup_fraction: 0.08,
            grip_fraction: 0.05,
            retract_pickup_fraction: 0.08,
            move_to_place_fraction: 0.20,
            approach_place_fraction: 0.08,
            release_fraction: 0.05,
            retract_place_fraction: 0.08,
        }
    }
}

struct PhaseBounds {
    move_to_pickup_end: Duration,
    approach_pickup_end: Duration,
    grip_end: Duration,
    retract_pickup_end: Duration,
    move_to_place_end: Duration,
    approach_place_end: Duration,
    release_end: Duration,
    retract_place_end: Duration,
}

/// Pick-and-place robot simulator, transport between the two slower stations.
pub struct PickerRobot {
    base: BaseMachine,
    picker_config: PickerConfig,
    phase: PickerPhase,
    cycle_count: u32,
    position: Position3D,
    gripper: GripperState,
    /// 0 = open, 100 = closed.
    gripper_position: f64,
    held_part: Option<Part>,
    noise: NoiseGenerator,
    last_position: Position3D,
}

impl PickerRobot {
    pub fn new(config: MachineConfig, picker_config: PickerConfig, now: DateTime<Utc>) -> Self {
        let home = picker_config.home_position;
        Self {
            base: BaseMachine::new(config, now),
            picker_config,
            phase: PickerPhase::Idle,
            cycle_count: 0,
            position: home,
            gripper: GripperState::Open,
            gripper_position: 0.0,
            held_part: None,
            noise: NoiseGenerator::new(),
            last_position: home,
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(
        config: MachineConfig,
        picker_config: PickerConfig,
        now: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        let mut robot = Self::new(config, picker_config, now);
        robot.noise = NoiseGenerator::with_seed(seed);
        robot
    }

    pub fn phase(&self) -> PickerPhase {
        self.phase
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn gripper(&self) -> GripperState {
        self.gripper
    }

    pub fn held_part_id(&self) -> Option<&str> {
        self.held_part.as_ref().map(|p| p.id.as_str())
    }

    pub fn is_holding_part(&self) -> bool {
        self.held_part.is_some()
    }

    pub fn base(&self) -> &BaseMachine {
        &self.base
    }

    /// Advance the state machine by one tick.
    ///
    /// The input buffer belongs to the forming press, the output buffer to
    /// the spot welder; both are borrowed for this tick only.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        is_break_time: bool,
        input: &mut PartBuffer,
        output: &mut PartBuffer,
    ) {
        match self.base.state() {
            MachineState::Idle => self.update_idle(now, input),
            MachineState::Setup => self.update_setup(now),
            MachineState::Running => self.update_running(now, is_break_time, input, output),
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

    fn update_idle(&mut self, now: DateTime<Utc>, input: &mut PartBuffer) {
        self.phase = PickerPhase::Idle;
        self.position = self.picker_config.home_position;

        if !input.is_empty() {
            self.base.transition_to(MachineState::Setup, now);
        }
    }

    fn update_setup(&mut self, now: DateTime<Utc>) {
        // Quick setup, just position verification.
        if self.base.elapsed_in_state(now) >= self.base.config().effective_setup_time() {
            self.base.transition_to(MachineState::Running, now);
            self.base.mark_cycle_start(now);
            self.phase = PickerPhase::MoveToPickup;
        }
    }

    fn update_running(
        &mut self,
        now: DateTime<Utc>,
        is_break_time: bool,
        input: &mut PartBuffer,
        output: &mut PartBuffer,
    ) {
        // Breaks are honored only with an empty gripper; a held part is
        // carried to the welder first.
        if is_break_time && self.held_part.is_none() {
            self.base.transition_to(MachineState::PlannedStop, now);
            self.phase = PickerPhase::Idle;
            return;
        }

        if self.should_trigger_error() {
            self.trigger_error(now);
            return;
        }

        let bounds = self.phase_bounds();
        let elapsed = self.base.elapsed_in_cycle(now);
        let cfg = self.picker_config.clone();
        let pickup_safe = cfg.pickup_position.with_z(cfg.safe_z);
        let place_safe = cfg.place_position.with_z(cfg.safe_z);

        match self.phase {
            PickerPhase::MoveToPickup => {
                let p = phase_fraction(elapsed, Duration::ZERO, bounds.move_to_pickup_end);
                self.position = cfg.home_position.lerp(pickup_safe, p);
                if elapsed >= bounds.move_to_pickup_end {
                    self.phase = PickerPhase::ApproachPickup;
                }
            }
            PickerPhase::ApproachPickup => {
                let p = phase_fraction(elapsed, bounds.move_to_pickup_end, bounds.approach_pickup_end);
                self.position = pickup_safe.lerp(cfg.pickup_position, p);
                if elapsed >= bounds.approach_pickup_end {
                    self.phase = PickerPhase::Grip;
                    self.gripper = GripperState::Closing;
                }
            }
            PickerPhase::Grip => {
                let p = phase_fraction(elapsed, bounds.approach_pickup_end, bounds.grip_end);
                self.gripper_position = p * 100.0;
                if elapsed >= bounds.grip_end {
                    // Retry here every tick while the upstream buffer is
                    // empty; the part may still be in the press.
                    if let Some(mut part) = input.pop() {
                        part.status = PartStatus::InTransit;
                        part.location = self.base.config().name.clone();
                        self.held_part = Some(part);
                        self.gripper = GripperState::Closed;
                        self.gripper_position = 100.0;
                        self.phase = PickerPhase::RetractPickup;
                    }
                }
            }
            PickerPhase::RetractPickup => {
                let p = phase_fraction(elapsed, bounds.grip_end, bounds.retract_pickup_end);
                self.position = cfg.pickup_position.lerp(pickup_safe, p);
                if elapsed >= bounds.retract_pickup_end {
                    self.phase = PickerPhase::MoveToPlace;
                }
            }
            PickerPhase::MoveToPlace => {
                let p = phase_fraction(elapsed, bounds.retract_pickup_end, bounds.move_to_place_end);
                self.position = pickup_safe.lerp(place_safe, p);
                if elapsed >= bounds.move_to_place_end {
                    self.phase = PickerPhase::ApproachPlace;
                }
            }
            PickerPhase::ApproachPlace => {
                let p = phase_fraction(elapsed, bounds.move_to_place_end, bounds.approach_place_end);
                self.position = place_safe.lerp(cfg.place_position, p);
                if elapsed >= bounds.approach_place_end {
                    self.phase = PickerPhase::Release;
                    self.gripper = GripperState::Opening;
                }
            }
            PickerPhase::Release => {
                let p = phase_fraction(elapsed, bounds.approach_place_end, bounds.release_end);
                self.gripper_position = (1.0 - p) * 100.0;
                if elapsed >= bounds.release_end {
                    // Stall in Release while the welder input is full; the
                    // part stays in the gripper until a slot frees.
                    if self.try_release_part(now, output) {
                        self.gripper = GripperState::Open;
                        self.gripper_position = 0.0;
                        self.phase = PickerPhase::RetractPlace;
                    }
                }
            }
            PickerPhase::RetractPlace => {
                let p = phase_fraction(elapsed, bounds.release_end, bounds.retract_place_end);
                self.position = cfg.place_position.lerp(place_safe, p);
                if elapsed >= bounds.retract_place_end {
                    self.complete_cycle(now, input);
                }
            }
            PickerPhase::Idle => {}
        }
    }

    fn try_release_part(&mut self, now: DateTime<Utc>, output: &mut PartBuffer) -> bool {
        let Some(mut part) = self.held_part.take() else {
            return true;
        };
        if output.is_full() {
            self.held_part = Some(part);
            return false;
        }
        part.status = PartStatus::AwaitingWelding;
        part.picking_complete = Some(now);
        part.picker_robot_id = self.base.config().name.clone();
        let _ = output.push(part);
        true
    }

    fn complete_cycle(&mut self, now: DateTime<Utc>, input: &mut PartBuffer) {
        self.cycle_count += 1;
        self.base.complete_cycle(false);

        if !input.is_empty() {
            // Chain straight into the next pick from above the welder.
            self.base.mark_cycle_start(now);
            self.phase = PickerPhase::MoveToPickup;
            self.position = self
                .picker_config
                .place_position
                .with_z(self.picker_config.safe_z);
        } else {
            self.base.transition_to(MachineState::Idle, now);
            self.phase = PickerPhase::Idle;
        }
    }

    fn should_trigger_error(&mut self) -> bool {
        if self.phase == PickerPhase::Idle {
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
            .uniform_int(0, PICKER_ERROR_CODES.len() as i64 - 1) as usize;
        self.apply_error(PICKER_ERROR_CODES[idx], now);
    }

    /// Inject a specific fault (scenario control).
    pub fn force_error(&mut self, code: &str, now: DateTime<Utc>) {
        self.apply_error(code, now);
    }

    fn apply_error(&mut self, code: &str, now: DateTime<Utc>) {
        let (message, min_dur, max_dur) = error_info(code);
        let duration = self.noise.uniform_duration(min_dur, max_dur);
        let duration = self.base.config().effective_error_duration(duration);

        // A dropped part is lost and scrapped on the spot.
        if code == ERROR_PART_DROPPED {
            if let Some(mut part) = self.held_part.take() {
                part.status = PartStatus::Scrap;
                part.is_scrap = true;
                part.scrap_reason = "Dropped during transfer".to_string();
                self.base.scrap_part_directly();
                self.gripper = GripperState::Open;
                self.gripper_position = 0.0;
            }
        }

        self.base.trigger_error(code, message, duration, now);
        self.phase = PickerPhase::Idle;
    }

    fn phase_bounds(&self) -> PhaseBounds {
        let cycle = self.base.config().effective_cycle_time();
        let cfg = &self.picker_config;
        let move_to_pickup_end = cycle.mul_f64(cfg.move_to_pickup_fraction);
        let approach_pickup_end = move_to_pickup_end + cycle.mul_f64(cfg.approach_pickup_fraction);
        let grip_end = approach_pickup_end + cycle.mul_f64(cfg.grip_fraction);
        let retract_pickup_end = grip_end + cycle.mul_f64(cfg.retract_pickup_fraction);
        let move_to_place_end = retract_pickup_end + cycle.mul_f64(cfg.move_to_place_fraction);
        let approach_place_end = move_to_place_end + cycle.mul_f64(cfg.approach_place_fraction);
        let release_end = approach_place_end + cycle.mul_f64(cfg.release_fraction);
        let retract_place_end = release_end + cycle.mul_f64(cfg.retract_place_fraction);
        PhaseBounds {
            move_to_pickup_end,
            approach_pickup_end,
            grip_end,
            retract_pickup_end,
            move_to_place_end,
            approach_place_end,
            release_end,
            retract_place_end,
        }
    }

    /// Progress through the current movement phase, 0-1.
    pub fn phase_progress(&self, now: DateTime<Utc>) -> f64 {
        let b = self.phase_bounds();
        let elapsed = self.base.elapsed_in_cycle(now);
        match self.phase {
            PickerPhase::MoveToPickup => phase_fraction(elapsed, Duration::ZERO, b.move_to_pickup_end),
            PickerPhase::ApproachPickup => {
                phase_fraction(elapsed, b.move_to_pickup_end, b.approach_pickup_end)
            }
            PickerPhase::Grip => phase_fraction(elapsed, b.approach_pickup_end, b.grip_end),
            PickerPhase::RetractPickup => phase_fraction(elapsed, b.grip_end, b.retract_pickup_end),
            PickerPhase::MoveToPlace => {
                phase_fraction(elapsed, b.retract_pickup_end, b.move_to_place_end)
            }
            PickerPhase::ApproachPlace => {
                phase_fraction(elapsed, b.move_to_place_end, b.approach_place_end)
            }
            PickerPhase::Release => phase_fraction(elapsed, b.approach_place_end, b.release_end),
            PickerPhase::RetractPlace => {
                phase_fraction(elapsed, b.release_end, b.retract_place_end)
            }
            PickerPhase::Idle => 0.0,
        }
    }

    // ─── Observable generation ──────────────────────────────────────

    /// Simplified inverse-kinematics approximation for the six joints.
    fn joint_angles(&mut self) -> [f64; 6] {
        let pos = self.position;
        let j1 = pos.y.atan2(pos.x).to_degrees();

        let xy_distance = (pos.x * pos.x + pos.y * pos.y).sqrt();
        // Arm length assumed at 70 % of max reach.
        let reach_ratio = (xy_distance / (self.picker_config.max_reach * 0.7)).min(1.0);
        let j2 = 45.0 + reach_ratio * 45.0;
        let j3 = 180.0 - j2 * 1.5;
        let j4 = 0.0;
        // Keep the tool vertical.
        let j5 = 90.0 - (j2 + j3 - 90.0);
        let j6 = -j1;

        [
            self.noise.gaussian_noise(j1, 0.1),
            self.noise.gaussian_noise(j2, 0.1),
            self.noise.gaussian_noise(j3, 0.1),
            self.noise.gaussian_noise(j4, 0.1),
            self.noise.gaussian_noise(j5, 0.1),
            self.noise.gaussian_noise(j6, 0.1),
        ]
    }

    fn grip_force(&mut self) -> f64 {
        let max = self.picker_config.max_grip_force;
        let force = match self.gripper {
            GripperState::Open => 0.0,
            GripperState::Closing => {
                if self.gripper_position > 80.0 {
                    // Contacting the part; force rises fast.
                    let contact = (self.gripper_position - 80.0) / 20.0;
                    max * 0.3 * contact
                } else {
                    self.noise.gaussian(2.0, 0.5)
                }
            }
            GripperState::Closed => self.noise.colored_noise("gripForce", max * 0.7, 0.05, 0.6),
            GripperState::Opening => {
                if self.gripper_position > 80.0 {
                    let release = (100.0 - self.gripper_position) / 20.0;
                    max * 0.7 * (1.0 - release)
                } else {
                    self.noise.gaussian(1.0, 0.3)
                }
            }
        };
        clamp_positive(force)
    }
}

fn phase_fraction(elapsed: Duration, start: Duration, end: Duration) -> f64 {
    let span = end.saturating_sub(start).as_secs_f64();
    if span <= 0.0 {
        return 0.0;
    }
    ((elapsed.as_secs_f64() - start.as_secs_f64()) / span).clamp(0.0, 1.0)
}

impl MachineSimulator for PickerRobot {
    fn name(&self) -> &str {
        &self.base.config().name
    }

    fn machine_type(&self) -> &'static str {
        "picker"
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
            NodeDefinition::new("PositionX", "Position X", "TCP X position", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("PositionY", "Position Y", "TCP Y position", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("PositionZ", "Position Z", "TCP Z position", DataType::Double, "mm", Value::Double(0.0)),
            NodeDefinition::new("Speed", "Speed", "TCP speed", DataType::Double, "mm/s", Value::Double(0.0)),
            NodeDefinition::new("Joint1", "Joint 1", "Base rotation", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("Joint2", "Joint 2", "Shoulder", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("Joint3", "Joint 3", "Elbow", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("Joint4", "Joint 4", "Wrist 1", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("Joint5", "Joint 5", "Wrist 2", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("Joint6", "Joint 6", "Wrist 3", DataType::Double, "deg", Value::Double(0.0)),
            NodeDefinition::new("GripperState", "Gripper State", "Gripper state (0=Open,1=Closing,2=Closed,3=Opening)", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("GripperPosition", "Gripper Position", "Gripper position 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("GripForce", "Grip Force", "Gripper force", DataType::Double, "N", Value::Double(0.0)),
            NodeDefinition::new("CycleCount", "Cycle Count", "Total cycles completed", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CycleTime", "Cycle Time", "Current cycle time", DataType::Double, "s", Value::Double(0.0)),
            NodeDefinition::new("State", "State", "Machine state (0-4)", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("GoodParts", "Good Parts", "Good parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("ScrapParts", "Scrap Parts", "Scrap parts count", DataType::Int32, "", Value::Int32(0)),
            NodeDefinition::new("CurrentOrderId", "Current Order ID", "Active order ID", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CurrentPartNumber", "Current Part Number", "Active part number", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("CycleProgress", "Cycle Progress", "Progress 0-100%", DataType::Double, "%", Value::Double(0.0)),
            NodeDefinition::new("PartInGripper", "Part In Gripper", "Part ID being held", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ErrorCode", "Error Code", "Current error code", DataType::String, "", Value::Text(String::new())),
            NodeDefinition::new("ErrorMessage", "Error Message", "Error description", DataType::String, "", Value::Text(String::new())),
        ]
    }

    fn generate_data(&mut self, now: DateTime<Utc>) -> ValueMap {
        let mut data = ValueMap::new();

        // TCP speed from the position delta over one publish interval.
        let dt = self.base.config().publish_interval.as_secs_f64();
        let speed = if dt > 0.0 {
            self.last_position.distance(self.position) / dt
        } else {
            0.0
        };
        let speed = clamp_positive(self.noise.gaussian(speed, 3.0));
        self.last_position = self.position;

        data.insert(
            "PositionX".into(),
            self.noise.gaussian(self.position.x, 0.1).into(),
        );
        data.insert(
            "PositionY".into(),
            self.noise.gaussian(self.position.y, 0.1).into(),
        );
        data.insert(
            "PositionZ".into(),
            self.noise.gaussian(self.position.z, 0.1).into(),
        );
        data.insert("Speed".into(), speed.into());

        let joints = self.joint_angles();
        data.insert("Joint1".into(), joints[0].into());
        data.insert("Joint2".into(), joints[1].into());
        data.insert("Joint3".into(), joints[2].into());
        data.insert("Joint4".into(), joints[3].into());
        data.insert("Joint5".into(), joints[4].into());
        data.insert("Joint6".into(), joints[5].into());

        data.insert("GripperState".into(), (self.gripper as i32).into());
        data.insert("GripperPosition".into(), self.gripper_position.into());
        data.insert("GripForce".into(), self.grip_force().into());

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
            "PartInGripper".into(),
            self.held_part_id().unwrap_or_default().to_string().into(),
        );

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

    fn make_config(cycle_s: u64, setup_s: u64) -> MachineConfig {
        MachineConfig {
            name: "PickerRobot".into(),
            cycle_time: Duration::from_secs(cycle_s),
            setup_time: Duration::from_secs(setup_s),
            scrap_rate: 0.0,
            error_rate: 0.0,
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

    fn make_robot(cycle_s: u64, setup_s: u64) -> PickerRobot {
        PickerRobot::with_seed(make_config(cycle_s, setup_s), PickerConfig::default(), t0(), 1)
    }

    /// Drive the robot at 1 Hz through `seconds`, with the given buffers.
    fn run_for(
        robot: &mut PickerRobot,
        input: &mut PartBuffer,
        output: &mut PartBuffer,
        start: DateTime<Utc>,
        seconds: i64,
    ) -> DateTime<Utc> {
        let mut now = start;
        for i in 0..=seconds {
            now = start + TimeDelta::seconds(i);
            robot.update(now, false, input, output);
        }
        now
    }

    #[test]
    fn test_full_transfer_cycle() {
        // Cycle 20 s, setup 1 s; grip ends at 5.6 s, release at 13.2 s.
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(3);
        input.push(make_part(1)).unwrap();

        run_for(&mut robot, &mut input, &mut output, t0(), 24);

        assert_eq!(robot.cycle_count(), 1);
        assert_eq!(robot.counters().0, 1);
        assert!(input.is_empty());
        assert_eq!(output.len(), 1);
        let part = output.pop().unwrap();
        assert_eq!(part.status, PartStatus::AwaitingWelding);
        assert_eq!(part.picker_robot_id, "PickerRobot");
        assert!(part.picking_complete.is_some());
        // Nothing left to pick: robot idles.
        assert_eq!(robot.state(), MachineState::Idle);
        assert!(!robot.is_holding_part());
    }

    #[test]
    fn test_grip_retries_on_empty_input() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(3);
        input.push(make_part(1)).unwrap();

        // Start the cycle, then steal the part before the grip closes.
        let now = run_for(&mut robot, &mut input, &mut output, t0(), 3);
        assert_eq!(robot.state(), MachineState::Running);
        input.pop();

        // The robot reaches Grip and stays there, retrying.
        let now = run_for(&mut robot, &mut input, &mut output, now + TimeDelta::seconds(1), 10);
        assert_eq!(robot.phase(), PickerPhase::Grip);
        assert!(!robot.is_holding_part());

        // A part arrives: picked on the next tick.
        input.push(make_part(2)).unwrap();
        let mut now2 = now + TimeDelta::seconds(1);
        robot.update(now2, false, &mut input, &mut output);
        assert_eq!(robot.phase(), PickerPhase::RetractPickup);
        assert_eq!(robot.held_part_id(), Some("PART-2026-08-03-0002"));
        now2 += TimeDelta::seconds(1);
        robot.update(now2, false, &mut input, &mut output);
        assert_eq!(robot.gripper(), GripperState::Closed);
    }

    #[test]
    fn test_release_stalls_on_full_output() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(1);
        output.push(make_part(99)).unwrap(); // downstream already full
        input.push(make_part(1)).unwrap();

        let now = run_for(&mut robot, &mut input, &mut output, t0(), 30);
        assert_eq!(robot.phase(), PickerPhase::Release);
        assert!(robot.is_holding_part(), "part stays in the gripper");
        assert_eq!(output.len(), 1);

        // The welder consumes; the picker places on the following tick.
        output.pop();
        let mut now2 = now + TimeDelta::seconds(1);
        robot.update(now2, false, &mut input, &mut output);
        assert_eq!(robot.phase(), PickerPhase::RetractPlace);
        assert!(!robot.is_holding_part());
        assert_eq!(output.len(), 1);

        now2 += TimeDelta::seconds(1);
        robot.update(now2, false, &mut input, &mut output);
        assert_eq!(robot.gripper(), GripperState::Open);
    }

    #[test]
    fn test_break_deferred_while_holding_part() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(3);
        input.push(make_part(1)).unwrap();

        // Run until the part is gripped (grip ends at 5.6 s into the cycle).
        let now = run_for(&mut robot, &mut input, &mut output, t0(), 8);
        assert!(robot.is_holding_part());

        // Break starts: the robot keeps running to deliver the part.
        let mut now2 = now;
        for i in 1..=20 {
            now2 = now + TimeDelta::seconds(i);
            robot.update(now2, true, &mut input, &mut output);
        }
        assert_eq!(output.len(), 1, "part was delivered during the break");
        // With the gripper empty the break is honored.
        robot.update(now2 + TimeDelta::seconds(1), true, &mut input, &mut output);
        assert_eq!(robot.state(), MachineState::PlannedStop);
    }

    #[test]
    fn test_chains_cycles_while_input_available() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(5);
        for n in 1..=3 {
            input.push(make_part(n)).unwrap();
        }

        run_for(&mut robot, &mut input, &mut output, t0(), 70);
        assert_eq!(robot.cycle_count(), 3);
        assert_eq!(output.len(), 3);
        assert_eq!(robot.state(), MachineState::Idle);
    }

    #[test]
    fn test_phase_progress_bounded() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(3);
        input.push(make_part(1)).unwrap();

        let mut now = t0();
        for i in 0..=16 {
            now = t0() + TimeDelta::seconds(i);
            robot.update(now, false, &mut input, &mut output);
            let p = robot.phase_progress(now);
            assert!((0.0..=1.0).contains(&p), "progress {p} out of range");
        }
    }

    #[test]
    fn test_joint_angles_follow_position() {
        let mut robot = make_robot(20, 1);
        robot.position = Position3D::new(500.0, 0.0, 800.0);
        let joints = robot.joint_angles();
        // Base rotation near zero when y = 0.
        assert!(joints[0].abs() < 2.0);
        // Shoulder between 45 and 90 degrees by construction.
        assert!(joints[1] > 40.0 && joints[1] < 95.0);

        robot.position = Position3D::new(0.0, 500.0, 200.0);
        let joints = robot.joint_angles();
        assert!((joints[0] - 90.0).abs() < 2.0);
    }

    #[test]
    fn test_data_map_exposes_gripper_and_held_part() {
        let mut robot = make_robot(20, 1);
        let mut input = PartBuffer::new(5);
        let mut output = PartBuffer::new(3);
        input.push(make_part(7)).unwrap();
        let now = run_for(&mut robot, &mut input, &mut output, t0(), 8);

        let data = robot.generate_data(now);
        assert_eq!(
            data.get("PartInGripper"),
            Some(&Value::Text("PART-2026-08-03-0007".into()))
        );
        assert_eq!(data.get("GripperState"), Some(&Value::Int32(2)));
        assert_eq!(data.get("State"), Some(&Value::Int32(2)));
    }
}
