//! Live-adjustable runtime configuration.
//!
//! The only state shared across thread boundaries: the observer REST thread
//! writes, the simulation thread reads every tick. A single coarse RwLock
//! makes every operation appear atomic; [`RuntimeConfig::snapshot`] gives
//! consumers a consistent frame when deriving several values together.

use crate::config::{Config, ConfigError};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

const MIN_CYCLE_TIME_SCALE: f64 = 0.1;
const MAX_CYCLE_TIME_SCALE: f64 = 10.0;
const MAX_SCRAP_RATE: f64 = 0.5;
const MAX_ERROR_RATE: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct RuntimeValues {
    cycle_time_scale: f64,
    scrap_rate: f64,
    error_rate: f64,
}

/// Thread-safe holder for the live-adjustable cycle/scrap/error settings.
///
/// Base cycle and setup times are immutable; the effective times divide them
/// by the scale factor, so a higher scale means a faster simulation.
#[derive(Debug)]
pub struct RuntimeConfig {
    values: RwLock<RuntimeValues>,
    base_cycle_time: Duration,
    base_setup_time: Duration,
}

/// Point-in-time copy of all runtime config values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    pub cycle_time_scale: f64,
    #[serde(skip)]
    pub base_cycle_time: Duration,
    #[serde(skip)]
    pub effective_cycle_time: Duration,
    #[serde(skip)]
    pub base_setup_time: Duration,
    #[serde(skip)]
    pub effective_setup_time: Duration,
    pub scrap_rate: f64,
    pub error_rate: f64,
}

impl RuntimeConfig {
    /// Create from the static startup configuration, scale 1.0.
    pub fn new(cfg: &Config) -> Self {
        Self {
            values: RwLock::new(RuntimeValues {
                cycle_time_scale: 1.0,
                scrap_rate: cfg.scrap_rate,
                error_rate: cfg.error_rate,
            }),
            base_cycle_time: cfg.cycle_time,
            base_setup_time: cfg.setup_time,
        }
    }

    fn read(&self) -> RuntimeValues {
        *self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cycle_time_scale(&self) -> f64 {
        self.read().cycle_time_scale
    }

    pub fn scrap_rate(&self) -> f64 {
        self.read().scrap_rate
    }

    pub fn error_rate(&self) -> f64 {
        self.read().error_rate
    }

    pub fn base_cycle_time(&self) -> Duration {
        self.base_cycle_time
    }

    /// Cycle time adjusted by the scale factor.
    pub fn effective_cycle_time(&self) -> Duration {
        scale_duration(self.base_cycle_time, self.read().cycle_time_scale)
    }

    /// Setup time adjusted by the scale factor.
    pub fn effective_setup_time(&self) -> Duration {
        scale_duration(self.base_setup_time, self.read().cycle_time_scale)
    }

    /// Error duration adjusted by the scale factor.
    ///
    /// A faster simulation also recovers from errors faster.
    pub fn effective_error_duration(&self, base: Duration) -> Duration {
        scale_duration(base, self.read().cycle_time_scale)
    }

    /// Set the cycle time multiplier. Valid range 0.1 - 10.0.
    pub fn set_cycle_time_scale(&self, scale: f64) -> Result<(), ConfigError> {
        if !(MIN_CYCLE_TIME_SCALE..=MAX_CYCLE_TIME_SCALE).contains(&scale) {
            return Err(ConfigError::OutOfRange {
                key: "cycleTimeScale",
                reason: format!(
                    "must be between {MIN_CYCLE_TIME_SCALE} and {MAX_CYCLE_TIME_SCALE}, got {scale}"
                ),
            });
        }
        self.write(|v| v.cycle_time_scale = scale);
        Ok(())
    }

    /// Set the scrap rate. Valid range 0.0 - 0.5.
    pub fn set_scrap_rate(&self, rate: f64) -> Result<(), ConfigError> {
        if !(0.0..=MAX_SCRAP_RATE).contains(&rate) {
            return Err(ConfigError::OutOfRange {
                key: "scrapRate",
                reason: format!("must be between 0.0 and {MAX_SCRAP_RATE}, got {rate}"),
            });
        }
        self.write(|v| v.scrap_rate = rate);
        Ok(())
    }

    /// Set the error rate. Valid range 0.0 - 0.2.
    pub fn set_error_rate(&self, rate: f64) -> Result<(), ConfigError> {
        if !(0.0..=MAX_ERROR_RATE).contains(&rate) {
            return Err(ConfigError::OutOfRange {
                key: "errorRate",
                reason: format!("must be between 0.0 and {MAX_ERROR_RATE}, got {rate}"),
            });
        }
        self.write(|v| v.error_rate = rate);
        Ok(())
    }

    fn write(&self, f: impl FnOnce(&mut RuntimeValues)) {
        let mut guard = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Consistent point-in-time copy of all fields.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let v = self.read();
        RuntimeSnapshot {
            cycle_time_scale: v.cycle_time_scale,
            base_cycle_time: self.base_cycle_time,
            effective_cycle_time: scale_duration(self.base_cycle_time, v.cycle_time_scale),
            base_setup_time: self.base_setup_time,
            effective_setup_time: scale_duration(self.base_setup_time, v.cycle_time_scale),
            scrap_rate: v.scrap_rate,
            error_rate: v.error_rate,
        }
    }
}

fn scale_duration(base: Duration, scale: f64) -> Duration {
    Duration::from_secs_f64(base.as_secs_f64() / scale)
}
