//! Seedable noise primitives for realistic sensor timeseries.
//!
//! Pure functions over a seeded RNG plus small named caches for colored noise
//! and drift. The per-cycle trigger scaling in [`NoiseGenerator::should_trigger`]
//! keeps error probabilities invariant under tick-rate changes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::HashMap;
use std::time::Duration;

/// Noise generator with per-key state for colored noise and drift.
///
/// Each phase engine owns its own generator so colored-noise keys never
/// cross-talk between machines.
pub struct NoiseGenerator {
    rng: StdRng,
    colored_state: HashMap<&'static str, f64>,
    last_values: HashMap<&'static str, f64>,
}

impl NoiseGenerator {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            colored_state: HashMap::new(),
            last_values: HashMap::new(),
        }
    }

    /// Deterministic generator for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            colored_state: HashMap::new(),
            last_values: HashMap::new(),
        }
    }

    fn norm(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// Draw from N(mean, std_dev).
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        mean + self.norm() * std_dev
    }

    /// `target * (1 + N(0, noise_percent))`.
    pub fn gaussian_noise(&mut self, target: f64, noise_percent: f64) -> f64 {
        target + self.norm() * (target * noise_percent)
    }

    /// Gaussian noise clamped to `[min, max]`.
    pub fn gaussian_noise_clamped(
        &mut self,
        target: f64,
        noise_percent: f64,
        min: f64,
        max: f64,
    ) -> f64 {
        clamp(self.gaussian_noise(target, noise_percent), min, max)
    }

    /// Noise correlated with a shared common factor.
    ///
    /// Two callers sharing the same `common_factor` draw achieve a Pearson
    /// correlation approximately equal to `correlation_strength`.
    pub fn correlated_noise(
        &mut self,
        target: f64,
        noise_percent: f64,
        common_factor: f64,
        correlation_strength: f64,
    ) -> f64 {
        let independent = self.norm() * noise_percent * target;
        let correlated = common_factor * correlation_strength * target;
        target + independent + correlated
    }

    /// Shared noise factor used to correlate two parameters.
    pub fn common_factor(&mut self, scale: f64) -> f64 {
        self.norm() * scale
    }

    /// Noise with temporal correlation (exponential smoothing).
    ///
    /// `alpha` is the smoothing factor: 0 = pure white noise, 1 = constant.
    /// The smoothed state persists per `key` across calls.
    pub fn colored_noise(
        &mut self,
        key: &'static str,
        target: f64,
        noise_percent: f64,
        alpha: f64,
    ) -> f64 {
        let prev = self.colored_state.get(key).copied().unwrap_or(0.0);
        let white = self.norm() * noise_percent * target;
        let state = alpha * prev + (1.0 - alpha) * white;
        self.colored_state.insert(key, state);
        target + state
    }

    /// Occasional signed spike offset.
    ///
    /// With probability `probability` returns an offset uniform in
    /// `[-target * max_magnitude, +target * max_magnitude]`, otherwise 0.
    pub fn spike(&mut self, target: f64, probability: f64, max_magnitude: f64) -> f64 {
        if self.rng.gen::<f64>() < probability {
            (self.rng.gen::<f64>() - 0.5) * 2.0 * target * max_magnitude
        } else {
            0.0
        }
    }

    /// Exponential ramp value.
    ///
    /// `progress` is 0-1 across the ramp. Ramp-up follows `1 - e^(-t/tau)`,
    /// ramp-down `e^(-t/tau)`, with `t = progress * 0.5`.
    pub fn ramp_value(&self, target: f64, progress: f64, ramp_up: bool, tau: f64) -> f64 {
        let t = progress * 0.5;
        let multiplier = if ramp_up {
            1.0 - (-t / tau).exp()
        } else {
            (-t / tau).exp()
        };
        target * multiplier
    }

    /// Uniform value in `[min, max]`.
    pub fn uniform(&mut self, min: f64, max: f64) -> f64 {
        min + self.rng.gen::<f64>() * (max - min)
    }

    /// Uniform integer in `[min, max]` inclusive.
    pub fn uniform_int(&mut self, min: i64, max: i64) -> i64 {
        self.rng.gen_range(min..=max)
    }

    /// Uniform duration in `[min, max]`.
    pub fn uniform_duration(&mut self, min: Duration, max: Duration) -> Duration {
        Duration::from_secs_f64(self.uniform(min.as_secs_f64(), max.as_secs_f64()))
    }

    /// True with the given probability.
    pub fn bool_with(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    /// Bernoulli draw with per-cycle probability scaled to the tick rate.
    ///
    /// The effective per-tick probability is
    /// `probability_per_cycle * tick / cycle`, so per-cycle rates stay
    /// invariant when the publish interval changes.
    pub fn should_trigger(
        &mut self,
        probability_per_cycle: f64,
        tick: Duration,
        cycle: Duration,
    ) -> bool {
        let cycle_s = cycle.as_secs_f64();
        if cycle_s <= 0.0 {
            return false;
        }
        let scaled = probability_per_cycle * tick.as_secs_f64() / cycle_s;
        self.rng.gen::<f64>() < scaled
    }

    /// Weighted selection, returning the chosen index.
    pub fn select_weighted(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        let r = self.rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (i, w) in weights.iter().enumerate() {
            cumulative += w;
            if r <= cumulative {
                return i;
            }
        }
        weights.len().saturating_sub(1)
    }

    /// Sinusoidal variation of `amplitude` percent across one period.
    pub fn sinusoidal_variation(&self, target: f64, amplitude: f64, progress: f64) -> f64 {
        target + (progress * 2.0 * std::f64::consts::PI).sin() * target * amplitude
    }

    /// Slowly drifting value with mean reversion (sensor drift).
    ///
    /// Random walk of at most `drift_rate` percent per tick, pulled back
    /// toward `target` at 1 % per call. State persists per `key`.
    pub fn drift_value(&mut self, key: &'static str, target: f64, drift_rate: f64) -> f64 {
        let last = self.last_values.get(key).copied().unwrap_or(target);
        let drift = self.norm() * drift_rate * target;
        let mean_reversion = (target - last) * 0.01;
        let value = last + drift + mean_reversion;
        self.last_values.insert(key, value);
        value
    }
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a value to be non-negative.
#[inline]
pub fn clamp_positive(value: f64) -> f64 {
    if value < 0.0 {
        0.0
    } else {
        value
    }
}

/// Clamp a value into `[min, max]`.
#[inline]
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}
