//! Shared machine lifecycle: state machine, order queue, counters, error
//! handling and event dispatch.
//!
//! Every phase engine owns a [`BaseMachine`] and delegates the common
//! lifecycle to it while advancing its own phase sub-FSM. Lifecycle events
//! are queued on the machine and drained by the driver once per tick.
//!
//! Shared transition set (pre-checked by the engines, applied here):
//!
//! ```text
//! Idle ──order available──▶ Setup ──setup elapsed──▶ Running
//! Running ──break starts──▶ PlannedStop
//! Running ──error roll──▶ UnplannedStop
//! Running ──order done──▶ Idle
//! PlannedStop ──break ends──▶ Idle
//! UnplannedStop ──error resolved──▶ Idle
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use shopfloor_common::nodes::{NodeDefinition, ValueMap};
use shopfloor_common::runtime::RuntimeConfig;
use shopfloor_common::state::MachineState;
use shopfloor_common::types::{ErrorInfo, OrderStatus, ProductionOrder};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Configuration common to all machine types.
///
/// When a shared [`RuntimeConfig`] is attached, the `effective_*` accessors
/// follow its live values; otherwise the static base values apply.
#[derive(Clone)]
pub struct MachineConfig {
    pub name: String,
    pub cycle_time: Duration,
    pub setup_time: Duration,
    pub scrap_rate: f64,
    pub error_rate: f64,
    pub publish_interval: Duration,
    pub runtime: Option<Arc<RuntimeConfig>>,
}

impl MachineConfig {
    pub fn effective_cycle_time(&self) -> Duration {
        match &self.runtime {
            // The runtime config scales its own base cycle time; machines with
            // a deviating base (the picker runs at a third of the line cycle)
            // apply the scale to their own base instead.
            Some(rt) => scale(self.cycle_time, rt.cycle_time_scale()),
            None => self.cycle_time,
        }
    }

    pub fn effective_setup_time(&self) -> Duration {
        match &self.runtime {
            Some(rt) => scale(self.setup_time, rt.cycle_time_scale()),
            None => self.setup_time,
        }
    }

    pub fn effective_scrap_rate(&self) -> f64 {
        match &self.runtime {
            Some(rt) => rt.scrap_rate(),
            None => self.scrap_rate,
        }
    }

    pub fn effective_error_rate(&self) -> f64 {
        match &self.runtime {
            Some(rt) => rt.error_rate(),
            None => self.error_rate,
        }
    }

    /// Error durations shrink as the simulation speeds up.
    pub fn effective_error_duration(&self, base: Duration) -> Duration {
        match &self.runtime {
            Some(rt) => rt.effective_error_duration(base),
            None => base,
        }
    }
}

fn scale(base: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64(base.as_secs_f64() / factor)
}

/// Lifecycle event emitted by a machine, drained by the driver each tick.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    StateChanged {
        from: MachineState,
        to: MachineState,
    },
    CycleCompleted {
        is_scrap: bool,
    },
    OrderCompleted(ProductionOrder),
    ErrorRaised(ErrorInfo),
}

/// Shared machine lifecycle state owned by every phase engine.
pub struct BaseMachine {
    config: MachineConfig,
    state: MachineState,
    state_entered_at: DateTime<Utc>,
    cycle_started_at: DateTime<Utc>,
    current_order: Option<ProductionOrder>,
    order_queue: VecDeque<ProductionOrder>,
    good_parts: u32,
    scrap_parts: u32,
    current_error: Option<ErrorInfo>,
    events: Vec<MachineEvent>,
}

impl BaseMachine {
    pub fn new(config: MachineConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: MachineState::Idle,
            state_entered_at: now,
            cycle_started_at: now,
            current_order: None,
            order_queue: VecDeque::new(),
            good_parts: 0,
            scrap_parts: 0,
            current_error: None,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Change state, stamping the entry time and emitting `StateChanged`.
    ///
    /// A transition to the current state is an idempotent no-op: no stamp,
    /// no event.
    pub fn transition_to(&mut self, new_state: MachineState, now: DateTime<Utc>) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        self.state_entered_at = now;
        self.events.push(MachineEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    pub fn add_order(&mut self, order: ProductionOrder) {
        self.order_queue.push_back(order);
    }

    pub fn current_order(&self) -> Option<&ProductionOrder> {
        self.current_order.as_ref()
    }

    pub fn has_work(&self) -> bool {
        self.current_order.is_some() || !self.order_queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.order_queue.len()
    }

    /// Dequeue the next order and mark it in progress. False when the queue
    /// is empty.
    pub fn start_next_order(&mut self, now: DateTime<Utc>) -> bool {
        let Some(mut order) = self.order_queue.pop_front() else {
            return false;
        };
        order.status = OrderStatus::InProgress;
        order.started_at = Some(now);
        self.current_order = Some(order);
        true
    }

    /// Record a finished cycle on the machine and the current order.
    pub fn complete_cycle(&mut self, is_scrap: bool) {
        if is_scrap {
            self.scrap_parts += 1;
            if let Some(order) = &mut self.current_order {
                order.quantity_scrap += 1;
            }
        } else {
            self.good_parts += 1;
            if let Some(order) = &mut self.current_order {
                order.quantity_completed += 1;
            }
        }
        self.events.push(MachineEvent::CycleCompleted { is_scrap });
    }

    /// True iff the current order has produced its full quantity.
    pub fn is_order_complete(&self) -> bool {
        self.current_order
            .as_ref()
            .is_some_and(ProductionOrder::is_complete)
    }

    /// Mark the current order completed, emit the event and release it.
    pub fn finish_order(&mut self) {
        if let Some(mut order) = self.current_order.take() {
            order.status = OrderStatus::Completed;
            self.events.push(MachineEvent::OrderCompleted(order));
        }
    }

    /// Install an error, transition to `UnplannedStop` and emit the event.
    pub fn trigger_error(
        &mut self,
        code: &str,
        message: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) {
        let info = ErrorInfo {
            code: code.to_string(),
            message: message.to_string(),
            occurred_at: now,
            expected_end: now + TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero()),
        };
        self.current_error = Some(info.clone());
        self.transition_to(MachineState::UnplannedStop, now);
        self.events.push(MachineEvent::ErrorRaised(info));
    }

    pub fn current_error(&self) -> Option<&ErrorInfo> {
        self.current_error.as_ref()
    }

    pub fn is_error_resolved(&self, now: DateTime<Utc>) -> bool {
        self.current_error
            .as_ref()
            .is_some_and(|e| now >= e.expected_end)
    }

    pub fn clear_error(&mut self) {
        self.current_error = None;
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.good_parts, self.scrap_parts)
    }

    pub fn good_parts(&self) -> u32 {
        self.good_parts
    }

    pub fn scrap_parts(&self) -> u32 {
        self.scrap_parts
    }

    /// Direct scrap outside a completed cycle (dropped or rejected part).
    pub fn scrap_part_directly(&mut self) {
        self.scrap_parts += 1;
    }

    /// Reset the shift-scoped counters.
    pub fn reset_counters(&mut self) {
        self.good_parts = 0;
        self.scrap_parts = 0;
    }

    pub fn mark_cycle_start(&mut self, now: DateTime<Utc>) {
        self.cycle_started_at = now;
    }

    pub fn cycle_started_at(&self) -> DateTime<Utc> {
        self.cycle_started_at
    }

    pub fn elapsed_in_state(&self, now: DateTime<Utc>) -> Duration {
        delta(self.state_entered_at, now)
    }

    pub fn elapsed_in_cycle(&self, now: DateTime<Utc>) -> Duration {
        delta(self.cycle_started_at, now)
    }

    /// Fraction of the effective cycle time elapsed, 0-100, clamped.
    pub fn cycle_progress(&self, now: DateTime<Utc>) -> f64 {
        if self.state != MachineState::Running {
            return 0.0;
        }
        let cycle = self.config.effective_cycle_time().as_secs_f64();
        if cycle <= 0.0 {
            return 0.0;
        }
        (self.elapsed_in_cycle(now).as_secs_f64() / cycle * 100.0).min(100.0)
    }

    /// Drain the queued lifecycle events.
    pub fn take_events(&mut self) -> Vec<MachineEvent> {
        std::mem::take(&mut self.events)
    }

    #[cfg(test)]
    pub(crate) fn pending_events(&self) -> &[MachineEvent] {
        &self.events
    }
}

fn delta(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Contract every phase engine implements against the base machine.
///
/// `update` is deliberately not part of the trait: the picker advances with
/// tick-scoped borrows of its neighbour buffers and therefore has its own
/// signature; the coordinator drives the concrete types.
pub trait MachineSimulator {
    fn name(&self) -> &str;
    fn machine_type(&self) -> &'static str;
    fn state(&self) -> MachineState;
    fn counters(&self) -> (u32, u32);
    fn reset_counters(&mut self);
    fn current_order(&self) -> Option<&ProductionOrder>;
    fn current_error(&self) -> Option<&ErrorInfo>;
    fn cycle_progress(&self, now: DateTime<Utc>) -> f64;
    /// Static OPC UA node schema of this machine type.
    fn opcua_nodes(&self) -> Vec<NodeDefinition>;
    /// Full named observable set for the current instant.
    fn generate_data(&mut self, now: DateTime<Utc>) -> ValueMap;
    /// Drain queued lifecycle events.
    fn take_events(&mut self) -> Vec<MachineEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_config() -> MachineConfig {
        MachineConfig {
            name: "TestMachine".into(),
            cycle_time: Duration::from_secs(60),
            setup_time: Duration::from_secs(45),
            scrap_rate: 0.03,
            error_rate: 0.02,
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
            due_date: Utc::now(),
            customer: "AutoCorp Inc.".into(),
            priority: 2,
            status: OrderStatus::Queued,
            started_at: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_transition_emits_event_and_stamps_time() {
        let mut bm = BaseMachine::new(make_config(), t0());
        let later = t0() + TimeDelta::seconds(5);
        bm.transition_to(MachineState::Setup, later);
        assert_eq!(bm.state(), MachineState::Setup);
        assert_eq!(bm.elapsed_in_state(later + TimeDelta::seconds(3)), Duration::from_secs(3));
        assert!(matches!(
            bm.pending_events().last(),
            Some(MachineEvent::StateChanged {
                from: MachineState::Idle,
                to: MachineState::Setup
            })
        ));
    }

    #[test]
    fn test_transition_to_same_state_is_noop() {
        let mut bm = BaseMachine::new(make_config(), t0());
        bm.transition_to(MachineState::Idle, t0() + TimeDelta::seconds(10));
        assert!(bm.pending_events().is_empty());
        // Entry timestamp untouched.
        assert_eq!(
            bm.elapsed_in_state(t0() + TimeDelta::seconds(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_start_next_order_dequeues_and_stamps() {
        let mut bm = BaseMachine::new(make_config(), t0());
        assert!(!bm.start_next_order(t0()));

        bm.add_order(make_order(5));
        bm.add_order(make_order(3));
        assert!(bm.start_next_order(t0()));

        let order = bm.current_order().unwrap();
        assert_eq!(order.status, OrderStatus::InProgress);
        assert_eq!(order.started_at, Some(t0()));
        assert_eq!(bm.queue_len(), 1);
    }

    #[test]
    fn test_complete_cycle_updates_counters_and_order() {
        let mut bm = BaseMachine::new(make_config(), t0());
        bm.add_order(make_order(2));
        bm.start_next_order(t0());

        bm.complete_cycle(false);
        bm.complete_cycle(true);

        assert_eq!(bm.counters(), (1, 1));
        let order = bm.current_order().unwrap();
        assert_eq!(order.quantity_completed, 1);
        assert_eq!(order.quantity_scrap, 1);
        assert!(bm.is_order_complete());
    }

    #[test]
    fn test_finish_order_releases_and_emits() {
        let mut bm = BaseMachine::new(make_config(), t0());
        bm.add_order(make_order(1));
        bm.start_next_order(t0());
        bm.complete_cycle(false);
        bm.finish_order();

        assert!(bm.current_order().is_none());
        assert!(bm
            .take_events()
            .iter()
            .any(|e| matches!(e, MachineEvent::OrderCompleted(o) if o.status == OrderStatus::Completed)));
    }

    #[test]
    fn test_error_lifecycle() {
        let mut bm = BaseMachine::new(make_config(), t0());
        bm.trigger_error("E001", "Wire feed jam detected", Duration::from_secs(300), t0());

        assert_eq!(bm.state(), MachineState::UnplannedStop);
        let err = bm.current_error().unwrap();
        assert_eq!(err.code, "E001");
        assert!(err.expected_end > err.occurred_at);

        assert!(!bm.is_error_resolved(t0() + TimeDelta::seconds(299)));
        assert!(bm.is_error_resolved(t0() + TimeDelta::seconds(300)));

        bm.clear_error();
        assert!(bm.current_error().is_none());
    }

    #[test]
    fn test_cycle_progress_clamped() {
        let mut bm = BaseMachine::new(make_config(), t0());
        assert_eq!(bm.cycle_progress(t0()), 0.0);

        bm.transition_to(MachineState::Running, t0());
        bm.mark_cycle_start(t0());
        assert!((bm.cycle_progress(t0() + TimeDelta::seconds(30)) - 50.0).abs() < 1e-9);
        assert_eq!(bm.cycle_progress(t0() + TimeDelta::seconds(600)), 100.0);
    }

    #[test]
    fn test_effective_values_follow_runtime_config() {
        use shopfloor_common::config::{Config, ShiftModel};

        let static_cfg = Config {
            line_type: None,
            simulator_name: "t".into(),
            opcua_port: 4840,
            health_port: 8081,
            erp_endpoint: String::new(),
            erp_order_path: String::new(),
            erp_shift_path: String::new(),
            publish_interval: Duration::from_secs(1),
            cycle_time: Duration::from_secs(60),
            setup_time: Duration::from_secs(30),
            scrap_rate: 0.03,
            error_rate: 0.02,
            order_min_qty: 50,
            order_max_qty: 500,
            timezone: "UTC".into(),
            shift_model: ShiftModel::ThreeShift,
        };
        let runtime = Arc::new(RuntimeConfig::new(&static_cfg));

        let mut cfg = make_config();
        cfg.cycle_time = Duration::from_secs(20); // picker-style deviating base
        cfg.runtime = Some(runtime.clone());

        assert_eq!(cfg.effective_cycle_time(), Duration::from_secs(20));
        runtime.set_cycle_time_scale(2.0).unwrap();
        assert_eq!(cfg.effective_cycle_time(), Duration::from_secs(10));
        runtime.set_scrap_rate(0.4).unwrap();
        assert_eq!(cfg.effective_scrap_rate(), 0.4);
        assert_eq!(
            cfg.effective_error_duration(Duration::from_secs(60)),
            Duration::from_secs(30)
        );
    }
}
