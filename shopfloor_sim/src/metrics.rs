//! Line-level OEE metrics and bottleneck detection.
//!
//! A tick contributes to `total_running` only when every station reports
//! `Running`; anything else counts as stopped time. Each station emits a
//! cycle-time sample on the increment edge of its cycle counter; the last 100
//! samples form the moving window behind bottleneck detection.

use chrono::{DateTime, Utc};
use shopfloor_common::state::MachineState;
use std::collections::VecDeque;
use std::time::Duration;

/// Moving-window length for per-station cycle-time samples.
const CYCLE_WINDOW: usize = 100;

/// Calculated OEE components, all in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OeeResult {
    /// Running time / total time.
    pub availability: f64,
    /// Actual / theoretical output, capped at 100.
    pub performance: f64,
    /// Good parts / all parts; 100 while nothing was produced.
    pub quality: f64,
    /// availability * performance * quality.
    pub oee: f64,
}

/// One station's state as sampled by the coordinator on a tick.
#[derive(Debug, Clone, Copy)]
pub struct StationSample {
    pub state: MachineState,
    pub cycle_count: u32,
    pub good_parts: u32,
    pub scrap_parts: u32,
}

/// Per-station metrics snapshot for the observer surface.
#[derive(Debug, Clone)]
pub struct MachineMetrics {
    pub name: String,
    pub state: MachineState,
    pub cycle_count: u32,
    pub good_parts: u32,
    pub scrap_parts: u32,
    pub total_uptime: Duration,
    pub total_downtime: Duration,
    pub average_cycle_time: Duration,
    pub is_bottleneck: bool,
}

struct StationTracker {
    name: String,
    state: MachineState,
    cycle_count: u32,
    good_parts: u32,
    scrap_parts: u32,
    total_uptime: Duration,
    total_downtime: Duration,
    cycle_times: VecDeque<Duration>,
    last_cycle_count: u32,
    last_cycle_at: DateTime<Utc>,
}

impl StationTracker {
    fn new(name: String, now: DateTime<Utc>) -> Self {
        Self {
            name,
            state: MachineState::Idle,
            cycle_count: 0,
            good_parts: 0,
            scrap_parts: 0,
            total_uptime: Duration::ZERO,
            total_downtime: Duration::ZERO,
            cycle_times: VecDeque::with_capacity(CYCLE_WINDOW),
            last_cycle_count: 0,
            last_cycle_at: now,
        }
    }

    fn observe(&mut self, sample: StationSample, elapsed: Duration, now: DateTime<Utc>) {
        self.state = sample.state;
        self.cycle_count = sample.cycle_count;
        self.good_parts = sample.good_parts;
        self.scrap_parts = sample.scrap_parts;

        match sample.state {
            MachineState::Running => self.total_uptime += elapsed,
            MachineState::UnplannedStop => self.total_downtime += elapsed,
            _ => {}
        }

        // Sample a cycle time on the counter increment edge.
        if sample.cycle_count > self.last_cycle_count {
            let cycle_time = (now - self.last_cycle_at).to_std().unwrap_or(Duration::ZERO);
            if self.cycle_times.len() >= CYCLE_WINDOW {
                self.cycle_times.pop_front();
            }
            self.cycle_times.push_back(cycle_time);
            self.last_cycle_at = now;
            self.last_cycle_count = sample.cycle_count;
        }
    }

    fn average_cycle_time(&self) -> Duration {
        if self.cycle_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.cycle_times.iter().sum();
        total / self.cycle_times.len() as u32
    }
}

/// Collects and aggregates production-line metrics across the common tick.
pub struct MetricsCollector {
    start_time: DateTime<Utc>,
    last_update: DateTime<Utc>,
    total_running: Duration,
    total_stopped: Duration,
    theoretical_cycle_time: Duration,
    theoretical_output: u32,
    actual_output: u32,
    good_parts: u32,
    total_parts: u32,
    forming: StationTracker,
    picker: StationTracker,
    welder: StationTracker,
}

impl MetricsCollector {
    pub fn new(
        forming_name: &str,
        picker_name: &str,
        welder_name: &str,
        theoretical_cycle_time: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            start_time: now,
            last_update: now,
            total_running: Duration::ZERO,
            total_stopped: Duration::ZERO,
            theoretical_cycle_time,
            theoretical_output: 0,
            actual_output: 0,
            good_parts: 0,
            total_parts: 0,
            forming: StationTracker::new(forming_name.to_string(), now),
            picker: StationTracker::new(picker_name.to_string(), now),
            welder: StationTracker::new(welder_name.to_string(), now),
        }
    }

    /// Fold one tick of station samples into the aggregates.
    pub fn update(
        &mut self,
        forming: StationSample,
        picker: StationSample,
        welder: StationSample,
        now: DateTime<Utc>,
    ) {
        let elapsed = (now - self.last_update).to_std().unwrap_or(Duration::ZERO);
        self.last_update = now;

        self.forming.observe(forming, elapsed, now);
        self.picker.observe(picker, elapsed, now);
        self.welder.observe(welder, elapsed, now);

        // Output is measured at the end of the line.
        self.actual_output = welder.good_parts;
        self.good_parts = welder.good_parts;
        self.total_parts = welder.good_parts + welder.scrap_parts;

        // Theoretical output from wall time since start.
        let total_elapsed = (now - self.start_time).to_std().unwrap_or(Duration::ZERO);
        let cycle = self.theoretical_cycle_time.as_secs_f64();
        if cycle > 0.0 {
            self.theoretical_output = (total_elapsed.as_secs_f64() / cycle) as u32;
        }

        let all_running = forming.state == MachineState::Running
            && picker.state == MachineState::Running
            && welder.state == MachineState::Running;
        if all_running {
            self.total_running += elapsed;
        } else {
            self.total_stopped += elapsed;
        }
    }

    /// Overall equipment effectiveness from the accumulated samples.
    pub fn calculate_oee(&self) -> OeeResult {
        let total_time = self.total_running + self.total_stopped;
        let availability = if total_time > Duration::ZERO {
            self.total_running.as_secs_f64() / total_time.as_secs_f64() * 100.0
        } else {
            0.0
        };

        let performance = if self.theoretical_output > 0 {
            (f64::from(self.actual_output) / f64::from(self.theoretical_output) * 100.0).min(100.0)
        } else {
            0.0
        };

        let quality = if self.total_parts > 0 {
            f64::from(self.good_parts) / f64::from(self.total_parts) * 100.0
        } else {
            100.0
        };

        let oee = (availability / 100.0) * (performance / 100.0) * (quality / 100.0) * 100.0;

        OeeResult {
            availability,
            performance,
            quality,
            oee,
        }
    }

    /// Name of the station with the largest moving-average cycle time, or
    /// empty while no station has produced a sample.
    pub fn bottleneck(&self) -> String {
        let forming_avg = self.forming.average_cycle_time();
        let picker_avg = self.picker.average_cycle_time();
        let welder_avg = self.welder.average_cycle_time();

        if forming_avg.is_zero() && picker_avg.is_zero() && welder_avg.is_zero() {
            return String::new();
        }

        let mut max_time = forming_avg;
        let mut bottleneck = self.forming.name.clone();
        if picker_avg > max_time {
            max_time = picker_avg;
            bottleneck = self.picker.name.clone();
        }
        if welder_avg > max_time {
            bottleneck = self.welder.name.clone();
        }
        bottleneck
    }

    /// Metrics snapshot for one station by name.
    pub fn machine_metrics(&self, name: &str) -> Option<MachineMetrics> {
        let tracker = [&self.forming, &self.picker, &self.welder]
            .into_iter()
            .find(|t| t.name == name)?;
        Some(MachineMetrics {
            name: tracker.name.clone(),
            state: tracker.state,
            cycle_count: tracker.cycle_count,
            good_parts: tracker.good_parts,
            scrap_parts: tracker.scrap_parts,
            total_uptime: tracker.total_uptime,
            total_downtime: tracker.total_downtime,
            average_cycle_time: tracker.average_cycle_time(),
            is_bottleneck: self.bottleneck() == tracker.name,
        })
    }

    pub fn all_machine_metrics(&self) -> Vec<MachineMetrics> {
        [&self.forming, &self.picker, &self.welder]
            .into_iter()
            .filter_map(|t| self.machine_metrics(&t.name))
            .collect()
    }

    /// Re-arm every aggregate from `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let names = (
            self.forming.name.clone(),
            self.picker.name.clone(),
            self.welder.name.clone(),
        );
        *self = Self::new(&names.0, &names.1, &names.2, self.theoretical_cycle_time, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap()
    }

    fn sample(state: MachineState, cycles: u32, good: u32, scrap: u32) -> StationSample {
        StationSample {
            state,
            cycle_count: cycles,
            good_parts: good,
            scrap_parts: scrap,
        }
    }

    fn make_collector() -> MetricsCollector {
        MetricsCollector::new(
            "FormingMachine",
            "PickerRobot",
            "SpotWelder",
            Duration::from_secs(60),
            t0(),
        )
    }

    #[test]
    fn test_availability_splits_running_and_stopped() {
        let mut m = make_collector();
        let running = sample(MachineState::Running, 0, 0, 0);
        let idle = sample(MachineState::Idle, 0, 0, 0);

        // 30 ticks all running, 30 ticks with the picker idle.
        let mut now = t0();
        for _ in 0..30 {
            now += TimeDelta::seconds(1);
            m.update(running, running, running, now);
        }
        for _ in 0..30 {
            now += TimeDelta::seconds(1);
            m.update(running, idle, running, now);
        }

        let oee = m.calculate_oee();
        assert!((oee.availability - 50.0).abs() < 1.0, "availability {}", oee.availability);
    }

    #[test]
    fn test_quality_convention_without_parts() {
        let m = make_collector();
        assert_eq!(m.calculate_oee().quality, 100.0);
    }

    #[test]
    fn test_quality_from_welder_counters() {
        let mut m = make_collector();
        let w = sample(MachineState::Running, 10, 9, 1);
        let r = sample(MachineState::Running, 10, 10, 0);
        m.update(r, r, w, t0() + TimeDelta::seconds(1));
        assert!((m.calculate_oee().quality - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_capped_at_hundred() {
        let mut m = make_collector();
        // 2 minutes elapsed at 60 s theoretical cycle: theoretical 2, actual 50.
        let w = sample(MachineState::Running, 50, 50, 0);
        let r = sample(MachineState::Running, 50, 50, 0);
        m.update(r, r, w, t0() + TimeDelta::seconds(120));
        assert_eq!(m.calculate_oee().performance, 100.0);
    }

    #[test]
    fn test_bottleneck_is_slowest_station() {
        let mut m = make_collector();
        let mut now = t0();
        let mut forming_cycles = 0;
        let mut picker_cycles = 0;
        let mut welder_cycles = 0;

        // Forming finishes every 10 s, picker every 5 s, welder every 20 s.
        for i in 1..=120 {
            now += TimeDelta::seconds(1);
            if i % 10 == 0 {
                forming_cycles += 1;
            }
            if i % 5 == 0 {
                picker_cycles += 1;
            }
            if i % 20 == 0 {
                welder_cycles += 1;
            }
            m.update(
                sample(MachineState::Running, forming_cycles, forming_cycles, 0),
                sample(MachineState::Running, picker_cycles, picker_cycles, 0),
                sample(MachineState::Running, welder_cycles, welder_cycles, 0),
                now,
            );
        }

        assert_eq!(m.bottleneck(), "SpotWelder");
        let welder_metrics = m.machine_metrics("SpotWelder").unwrap();
        assert!(welder_metrics.is_bottleneck);
        assert!((welder_metrics.average_cycle_time.as_secs_f64() - 20.0).abs() < 1.0);
    }

    #[test]
    fn test_bottleneck_empty_without_samples() {
        let mut m = make_collector();
        m.update(
            sample(MachineState::Idle, 0, 0, 0),
            sample(MachineState::Idle, 0, 0, 0),
            sample(MachineState::Idle, 0, 0, 0),
            t0() + TimeDelta::seconds(1),
        );
        assert_eq!(m.bottleneck(), "");
    }

    #[test]
    fn test_cycle_window_is_bounded() {
        let mut m = make_collector();
        let mut now = t0();
        for i in 1..=300u32 {
            now += TimeDelta::seconds(1);
            m.update(
                sample(MachineState::Running, i, i, 0),
                sample(MachineState::Running, i, i, 0),
                sample(MachineState::Running, i, i, 0),
                now,
            );
        }
        assert!(m.forming.cycle_times.len() <= CYCLE_WINDOW);
    }

    #[test]
    fn test_reset_clears_aggregates() {
        let mut m = make_collector();
        let r = sample(MachineState::Running, 5, 5, 0);
        m.update(r, r, r, t0() + TimeDelta::seconds(10));
        m.reset(t0() + TimeDelta::seconds(20));

        let oee = m.calculate_oee();
        assert_eq!(oee.quality, 100.0);
        assert_eq!(m.bottleneck(), "");
        assert_eq!(m.machine_metrics("FormingMachine").unwrap().cycle_count, 0);
    }
}
