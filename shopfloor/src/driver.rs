//! Driver loop: one periodic tick advancing shift, machines and sinks.
//!
//! Per tick, strictly in order: shift-change detection, break lookup,
//! simulation update under the coarse state mutex (panic-guarded), OPC UA
//! publication, rate-limited ERP pushes, order regeneration. Termination is
//! signal-driven; shutdown stops machines then sinks under a bounded
//! deadline, without awaiting in-flight ERP pushes.

use chrono::{DateTime, Timelike, Utc};
use shopfloor_api::{AppState, HealthState};
use shopfloor_common::nodes::ValueMap;
use shopfloor_common::runtime::RuntimeConfig;
use shopfloor_common::shift::ShiftCalendar;
use shopfloor_common::{
    Config, MachineState, NAMESPACE_FORMING, NAMESPACE_PICKER, NAMESPACE_SPOT_WELDER,
    NAMESPACE_WELDING,
};
use shopfloor_erp::ErpClient;
use shopfloor_opcua::OpcUaServer;
use shopfloor_sim::machines::welding::WeldingConfig;
use shopfloor_sim::{
    Coordinator, LineConfig, MachineConfig, MachineEvent, MachineSimulator, OrderGenerator,
    Simulator, WeldingRobot,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bounded shutdown: machines, then sinks, then the HTTP server.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
/// ERP order updates go out at most this often unless progress changed.
const ORDER_PUSH_INTERVAL: Duration = Duration::from_secs(5);

/// What one guarded simulation tick hands back for the sink side.
struct TickOutput {
    publishes: Vec<(u16, ValueMap)>,
    order_pushes: Vec<shopfloor_common::ProductionOrder>,
    events: Vec<(String, MachineEvent)>,
}

/// Rate-limit memory for ERP order pushes.
struct OrderPushState {
    last_push: DateTime<Utc>,
    last_completed: u32,
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env()?;
    info!(
        name = %cfg.simulator_name,
        opcua_port = cfg.opcua_port,
        health_port = cfg.health_port,
        erp_endpoint = %cfg.erp_endpoint,
        cycle_time_s = cfg.cycle_time.as_secs_f64(),
        line_mode = cfg.is_line_mode(),
        "configuration loaded"
    );

    let mut calendar = ShiftCalendar::new(&cfg.timezone, cfg.shift_model)?;
    let erp = ErpClient::new(&cfg.erp_endpoint, &cfg.erp_order_path, &cfg.erp_shift_path)?;
    let health = Arc::new(HealthState::new());
    let now = Utc::now();

    // ─── Simulation construction per mode ───────────────────────────

    let base_machine_config = MachineConfig {
        name: String::new(),
        cycle_time: cfg.cycle_time,
        setup_time: cfg.setup_time,
        scrap_rate: cfg.scrap_rate,
        error_rate: cfg.error_rate,
        publish_interval: cfg.publish_interval,
        runtime: None,
    };

    let mut opcua = OpcUaServer::new(cfg.opcua_port, &cfg.simulator_name);
    let runtime: Option<Arc<RuntimeConfig>>;
    let mut order_generator;

    let simulator = if cfg.is_line_mode() {
        info!(line_type = ?cfg.line_type, "starting production line simulator");
        let rt = Arc::new(RuntimeConfig::new(&cfg));
        runtime = Some(rt.clone());

        let mut base = base_machine_config;
        base.runtime = Some(rt);

        let mut line_config = LineConfig::default();
        line_config.line_name = cfg.simulator_name.clone();
        let mut line = Coordinator::new(line_config, base, now);
        line.start(now);

        opcua.register_namespace(
            NAMESPACE_FORMING,
            "FormingMachine",
            "Sheet metal forming machine",
            line.forming().opcua_nodes(),
        )?;
        opcua.register_namespace(
            NAMESPACE_PICKER,
            "PickerRobot",
            "6-axis pick and place robot",
            line.picker().opcua_nodes(),
        )?;
        opcua.register_namespace(
            NAMESPACE_SPOT_WELDER,
            "SpotWelder",
            "Stud spot welding machine",
            line.welder().opcua_nodes(),
        )?;

        order_generator = OrderGenerator::for_line(cfg.order_min_qty, cfg.order_max_qty);
        let initial_order = order_generator.generate_order(now);
        info!(
            order_id = %initial_order.order_id,
            part = %initial_order.part_number,
            qty = initial_order.quantity,
            "initial order queued for production line"
        );
        spawn_order_push(&erp, initial_order.clone());
        line.set_order(initial_order);

        Simulator::Line(line)
    } else {
        info!("starting welding robot simulator");
        runtime = None;

        let mut robot_config = base_machine_config;
        robot_config.name = "WeldingRobot".to_string();
        let mut robot = WeldingRobot::new(robot_config, WeldingConfig::default(), now);

        opcua.register_namespace(
            NAMESPACE_WELDING,
            "Robot",
            "Welding robot",
            robot.opcua_nodes(),
        )?;

        order_generator = OrderGenerator::for_welding(cfg.order_min_qty, cfg.order_max_qty);
        for order in order_generator.generate_initial_queue(3, now) {
            info!(
                order_id = %order.order_id,
                part = %order.part_number,
                qty = order.quantity,
                "initial order queued"
            );
            robot.add_order(order);
        }

        Simulator::Welding(robot)
    };

    // ─── Sinks and observer ─────────────────────────────────────────

    opcua.start().await?;
    health.set_opcua_ready(true);

    let sim = Arc::new(Mutex::new(simulator));
    let app_state = AppState::new(
        cfg.simulator_name.clone(),
        sim.clone(),
        runtime,
        health.clone(),
    );
    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", cfg.health_port)).await?;
    info!(port = cfg.health_port, "HTTP server started (health + observer API)");
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, shopfloor_api::router(app_state)).await {
            error!(error = %err, "HTTP server error");
        }
    });

    // Initial shift propagation.
    if let Some(shift) = calendar.has_shift_changed(now) {
        info!(
            shift = %shift.shift_name,
            start = %shift.start_time,
            end = %shift.end_time,
            "current shift initialized"
        );
        spawn_shift_push(&erp, shift);
    }

    health.set_driver_started(true);

    // ─── Main simulation loop ───────────────────────────────────────

    info!(interval_s = cfg.publish_interval.as_secs_f64(), "starting simulation loop");

    let mut ticker = tokio::time::interval(cfg.publish_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut push_state = OrderPushState {
        last_push: now,
        last_completed: 0,
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                tick(
                    &sim,
                    &mut calendar,
                    &erp,
                    &opcua,
                    &mut order_generator,
                    &mut push_state,
                    cfg.is_line_mode(),
                );
            }
        }
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    info!("shutting down...");
    let shutdown_result = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        {
            let mut sim = lock_sim(&sim);
            if let Simulator::Line(line) = &mut *sim {
                line.stop();
            }
        }
        opcua.stop();
        server.abort();
    })
    .await;
    if shutdown_result.is_err() {
        warn!("shutdown deadline exceeded");
    }

    info!("simulator stopped");
    Ok(())
}

/// One driver tick. Panics inside the simulation are caught and logged; the
/// process keeps running and retries on the next tick.
fn tick(
    sim: &Arc<Mutex<Simulator>>,
    calendar: &mut ShiftCalendar,
    erp: &ErpClient,
    opcua: &OpcUaServer,
    order_generator: &mut OrderGenerator,
    push_state: &mut OrderPushState,
    line_mode: bool,
) {
    let now = Utc::now();

    if let Some(shift) = calendar.has_shift_changed(now) {
        info!(shift = %shift.shift_name, "shift changed");
        if !line_mode {
            // Shift-scoped counters only exist on the standalone robot; the
            // line keeps lifetime counters for order and OEE accounting.
            let mut sim = lock_sim(sim);
            if let Simulator::Welding(robot) = &mut *sim {
                robot.reset_counters();
            }
        }
        spawn_shift_push(erp, shift);
    }

    let is_break_time = calendar.is_break_time(now, calendar.current_shift_ref());

    let output = {
        let mut guard = lock_sim(sim);
        let result = catch_unwind(AssertUnwindSafe(|| {
            advance_simulation(&mut guard, now, is_break_time, order_generator, push_state)
        }));
        match result {
            Ok(output) => output,
            Err(panic) => {
                error!(?panic, "simulation tick panicked; continuing");
                return;
            }
        }
    };

    for (namespace, values) in output.publishes {
        opcua.update_namespace_values(namespace, values);
    }
    for order in output.order_pushes {
        spawn_order_push(erp, order);
    }
    for (machine, event) in output.events {
        log_event(&machine, &event);
    }

    if now.second() % 10 == 0 {
        let sim = lock_sim(sim);
        match &*sim {
            Simulator::Line(line) => {
                let oee = line.oee();
                debug!(
                    line_state = line.line_state().as_str(),
                    wip = line.wip_count(),
                    oee = format!("{:.1}", oee.oee),
                    bottleneck = %line.metrics().bottleneck(),
                    "production line tick"
                );
            }
            Simulator::Welding(robot) => {
                let (good, scrap) = robot.counters();
                debug!(
                    state = robot.state().as_str(),
                    good, scrap, "simulation tick"
                );
            }
        }
    }
}

/// Advance the simulation one tick and collect everything the sink side
/// needs, so no network work happens under the lock.
fn advance_simulation(
    sim: &mut Simulator,
    now: DateTime<Utc>,
    is_break_time: bool,
    order_generator: &mut OrderGenerator,
    push_state: &mut OrderPushState,
) -> TickOutput {
    let mut output = TickOutput {
        publishes: Vec::new(),
        order_pushes: Vec::new(),
        events: Vec::new(),
    };

    match sim {
        Simulator::Welding(robot) => {
            robot.update(now, is_break_time);
            output
                .publishes
                .push((NAMESPACE_WELDING, robot.generate_data(now)));

            for event in robot.take_events() {
                match &event {
                    MachineEvent::CycleCompleted { .. } => {
                        if let Some(order) = robot.current_order() {
                            output.order_pushes.push(order.clone());
                        }
                    }
                    MachineEvent::OrderCompleted(order) => {
                        output.order_pushes.push(order.clone());
                        let next = order_generator.generate_order(now);
                        info!(
                            order_id = %next.order_id,
                            qty = next.quantity,
                            "new order generated"
                        );
                        output.order_pushes.push(next.clone());
                        robot.add_order(next);
                    }
                    _ => {}
                }
                output.events.push(("WeldingRobot".to_string(), event));
            }
        }
        Simulator::Line(line) => {
            line.update(now, is_break_time);

            output
                .publishes
                .push((NAMESPACE_FORMING, line.forming_mut().generate_data(now)));
            output
                .publishes
                .push((NAMESPACE_PICKER, line.picker_mut().generate_data(now)));
            output
                .publishes
                .push((NAMESPACE_SPOT_WELDER, line.welder_mut().generate_data(now)));

            output.events.extend(line.take_events());

            // Keep the line fed: a completed order is pushed and replaced, a
            // missing order (stall after error recovery) regenerated.
            if line.is_order_complete() {
                if let Some(done) = line.take_completed_order() {
                    info!(
                        order_id = %done.order_id,
                        completed = done.quantity_completed,
                        "order completed"
                    );
                    output.order_pushes.push(done);
                }
            }
            if line.current_order().is_none() {
                let next = order_generator.generate_order(now);
                info!(order_id = %next.order_id, qty = next.quantity, "new order generated");
                output.order_pushes.push(next.clone());
                line.set_order(next);
                push_state.last_completed = 0;
            } else {
                let (completed, _) = line.order_progress();
                let due = completed != push_state.last_completed
                    || (now - push_state.last_push).to_std().unwrap_or(Duration::ZERO)
                        >= ORDER_PUSH_INTERVAL;
                if due {
                    if let Some(snapshot) = line.order_snapshot() {
                        output.order_pushes.push(snapshot);
                    }
                    push_state.last_push = now;
                    push_state.last_completed = completed;
                }
            }
        }
    }

    output
}

fn log_event(machine: &str, event: &MachineEvent) {
    match event {
        MachineEvent::StateChanged { from, to } => {
            info!(machine, from = from.as_str(), to = to.as_str(), "state changed");
        }
        MachineEvent::CycleCompleted { is_scrap } => {
            debug!(
                machine,
                result = if *is_scrap { "scrap" } else { "good" },
                "cycle completed"
            );
        }
        MachineEvent::OrderCompleted(order) => {
            info!(
                machine,
                order_id = %order.order_id,
                completed = order.quantity_completed,
                scrap = order.quantity_scrap,
                "order completed"
            );
        }
        MachineEvent::ErrorRaised(err) => {
            warn!(
                machine,
                code = %err.code,
                message = %err.message,
                expected_end = %err.expected_end,
                "machine error occurred"
            );
        }
    }
}

fn spawn_order_push(erp: &ErpClient, order: shopfloor_common::ProductionOrder) {
    let erp = erp.clone();
    tokio::spawn(async move { erp.send_order_update(&order).await });
}

fn spawn_shift_push(erp: &ErpClient, shift: shopfloor_common::Shift) {
    let erp = erp.clone();
    tokio::spawn(async move { erp.send_shift_update(&shift).await });
}

fn lock_sim(sim: &Arc<Mutex<Simulator>>) -> MutexGuard<'_, Simulator> {
    sim.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, using ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    fn base_config() -> MachineConfig {
        MachineConfig {
            name: "WeldingRobot".into(),
            cycle_time: Duration::from_secs(10),
            setup_time: Duration::from_secs(5),
            scrap_rate: 0.0,
            error_rate: 0.0,
            publish_interval: Duration::from_secs(1),
            runtime: None,
        }
    }

    #[test]
    fn test_welding_tick_publishes_and_regenerates_orders() {
        let mut order_generator = OrderGenerator::with_seed(false, 1, 1, 5);
        let mut push_state = OrderPushState {
            last_push: t0(),
            last_completed: 0,
        };

        let mut robot = WeldingRobot::with_seed(base_config(), WeldingConfig::default(), t0(), 2);
        let first = order_generator.generate_order(t0());
        robot.add_order(first);
        let mut sim = Simulator::Welding(robot);

        // Quantity 1: after setup (5 s) plus one cycle (10 s) the order is
        // complete and a replacement is queued automatically.
        let mut saw_completion = false;
        for i in 0..=20 {
            let now = t0() + chrono::TimeDelta::seconds(i);
            let output =
                advance_simulation(&mut sim, now, false, &mut order_generator, &mut push_state);
            assert_eq!(output.publishes.len(), 1);
            assert_eq!(output.publishes[0].0, NAMESPACE_WELDING);
            if output
                .events
                .iter()
                .any(|(_, e)| matches!(e, MachineEvent::OrderCompleted(_)))
            {
                saw_completion = true;
            }
        }
        assert!(saw_completion, "order never completed");

        let Simulator::Welding(robot) = &sim else {
            unreachable!()
        };
        // A fresh order keeps the robot working.
        assert!(robot.current_order().is_some() || robot.state() != MachineState::Idle);
    }

    #[test]
    fn test_line_tick_rate_limits_order_pushes() {
        let mut order_generator = OrderGenerator::with_seed(true, 100, 100, 7);
        let mut push_state = OrderPushState {
            last_push: t0(),
            last_completed: 0,
        };

        let mut base = base_config();
        base.cycle_time = Duration::from_secs(30);
        let mut line = Coordinator::with_seed(LineConfig::default(), base, t0(), 3);
        line.start(t0());
        line.set_order(order_generator.generate_order(t0()));
        let mut sim = Simulator::Line(line);

        // With no completions, pushes happen only on the 5 s cadence.
        let mut pushes = 0;
        for i in 1..=12 {
            let now = t0() + chrono::TimeDelta::seconds(i);
            let output =
                advance_simulation(&mut sim, now, false, &mut order_generator, &mut push_state);
            assert_eq!(output.publishes.len(), 3);
            pushes += output.order_pushes.len();
        }
        assert!(pushes <= 3, "pushed {pushes} times in 12 s");
    }
}
