//! Environment configuration loading and validation.
//!
//! All knobs come from environment variables; malformed values are fatal
//! startup errors rather than silently falling back to defaults. Durations
//! accept `ms`, `s`, `m` and `h` suffixes (`500ms`, `10s`, `1.5m`).

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A value parsed but violates its allowed range.
    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

/// Shift schedule model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShiftModel {
    /// One day shift 08-17 with three breaks.
    OneShift,
    /// Day and late shift, 06-14 and 14-22.
    TwoShift,
    /// Morning, afternoon and night, covering 24 h.
    ThreeShift,
}

impl ShiftModel {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "1-shift" => Ok(Self::OneShift),
            "2-shift" => Ok(Self::TwoShift),
            "3-shift" => Ok(Self::ThreeShift),
            other => Err(ConfigError::InvalidValue {
                key: "SHIFT_MODEL",
                value: other.to_string(),
                reason: "expected 1-shift, 2-shift or 3-shift".to_string(),
            }),
        }
    }
}

/// Static simulator configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Non-empty selects the three-station line; empty the single robot.
    pub line_type: Option<String>,
    pub simulator_name: String,
    pub opcua_port: u16,
    pub health_port: u16,

    pub erp_endpoint: String,
    pub erp_order_path: String,
    pub erp_shift_path: String,

    pub publish_interval: Duration,
    pub cycle_time: Duration,
    pub setup_time: Duration,

    pub scrap_rate: f64,
    pub error_rate: f64,
    pub order_min_qty: u32,
    pub order_max_qty: u32,

    pub timezone: String,
    pub shift_model: ShiftModel,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = Self {
            line_type: match env_or("LINE_TYPE", "") {
                s if s.is_empty() => None,
                s => Some(s),
            },
            simulator_name: env_or("SIMULATOR_NAME", "WeldingRobot-01"),
            opcua_port: env_parsed("OPCUA_PORT", 4840)?,
            health_port: env_parsed("HEALTH_PORT", 8081)?,

            erp_endpoint: env_or("ERP_ENDPOINT", "http://localhost:8080"),
            erp_order_path: env_or("ERP_ORDER_PATH", "/api/v1/production-orders"),
            erp_shift_path: env_or("ERP_SHIFT_PATH", "/api/v1/shifts"),

            publish_interval: env_duration("PUBLISH_INTERVAL", Duration::from_secs(1))?,
            cycle_time: env_duration("CYCLE_TIME", Duration::from_secs(60))?,
            setup_time: env_duration("SETUP_TIME", Duration::from_secs(45))?,

            scrap_rate: env_parsed("SCRAP_RATE", 0.03)?,
            error_rate: env_parsed("ERROR_RATE", 0.02)?,
            order_min_qty: env_parsed("ORDER_MIN_QTY", 50)?,
            order_max_qty: env_parsed("ORDER_MAX_QTY", 500)?,

            timezone: env_or("TIMEZONE", "Europe/Berlin"),
            shift_model: ShiftModel::parse(&env_or("SHIFT_MODEL", "3-shift"))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic validation of loaded values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.scrap_rate) {
            return Err(ConfigError::OutOfRange {
                key: "SCRAP_RATE",
                reason: format!("{} not in [0, 1]", self.scrap_rate),
            });
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(ConfigError::OutOfRange {
                key: "ERROR_RATE",
                reason: format!("{} not in [0, 1]", self.error_rate),
            });
        }
        if self.order_min_qty == 0 || self.order_min_qty > self.order_max_qty {
            return Err(ConfigError::OutOfRange {
                key: "ORDER_MIN_QTY",
                reason: format!(
                    "min {} must be positive and <= max {}",
                    self.order_min_qty, self.order_max_qty
                ),
            });
        }
        if self.publish_interval.is_zero() || self.cycle_time.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "PUBLISH_INTERVAL",
                reason: "publish interval and cycle time must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// True when running the three-station line.
    pub fn is_line_mode(&self) -> bool {
        self.line_type.is_some()
    }
}

fn env_or(key: &'static str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: v,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn env_duration(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => parse_duration(&v).ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: v,
            reason: "expected a duration such as 500ms, 10s, 1.5m or 1h".to_string(),
        }),
        _ => Ok(default),
    }
}

/// Parse a duration string with a unit suffix (`ms`, `s`, `m`, `h`).
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, unit) = value
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| value.split_at(i))?;
    let amount: f64 = number.parse().ok()?;
    if amount < 0.0 || !amount.is_finite() {
        return None;
    }
    let seconds = match unit {
        "ms" => amount / 1000.0,
        "s" => amount,
        "m" => amount * 60.0,
        "h" => amount * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("1.5m"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    fn make_config() -> Config {
        Config {
            line_type: None,
            simulator_name: "WeldingRobot-01".into(),
            opcua_port: 4840,
            health_port: 8081,
            erp_endpoint: "http://localhost:8080".into(),
            erp_order_path: "/api/v1/production-orders".into(),
            erp_shift_path: "/api/v1/shifts".into(),
            publish_interval: Duration::from_secs(1),
            cycle_time: Duration::from_secs(60),
            setup_time: Duration::from_secs(45),
            scrap_rate: 0.03,
            error_rate: 0.02,
            order_min_qty: 50,
            order_max_qty: 500,
            timezone: "Europe/Berlin".into(),
            shift_model: ShiftModel::ThreeShift,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(make_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let mut cfg = make_config();
        cfg.scrap_rate = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { key: "SCRAP_RATE", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_order_quantities() {
        let mut cfg = make_config();
        cfg.order_min_qty = 600;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_shift_model_parse() {
        assert_eq!(ShiftModel::parse("1-shift").unwrap(), ShiftModel::OneShift);
        assert_eq!(ShiftModel::parse("2-shift").unwrap(), ShiftModel::TwoShift);
        assert_eq!(ShiftModel::parse("3-shift").unwrap(), ShiftModel::ThreeShift);
        assert!(ShiftModel::parse("4-shift").is_err());
    }
}
