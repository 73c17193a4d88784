// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Adaptive timestep controller.
//!
//! A discrete-time feedback controller over a single value `dt`. Slow ticks
//! grow `dt`, ticks with plenty of headroom shrink it, and an integration
//! error above tolerance halves it regardless of throughput. `dt` never
//! leaves `[min_dt, max_dt]`.

use kpp_core::ConfigError;
use serde::{Deserialize, Serialize};

/// Tunables of the [`AdaptiveTimestepper`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestepConfig {
    /// Starting timestep (s).
    pub initial_dt: f64,
    /// Lower bound on `dt` (s).
    pub min_dt: f64,
    /// Upper bound on `dt` (s).
    pub max_dt: f64,
    /// Frame budget used when the caller supplies none (s).
    pub target_frame_time: f64,
    /// Ratio of computation time to budget above which `dt` grows.
    pub slow_ratio: f64,
    /// Ratio of computation time to budget below which `dt` shrinks.
    pub fast_ratio: f64,
    /// Largest growth factor applied in one step.
    pub max_growth: f64,
    /// Smallest shrink factor applied in one step.
    pub min_shrink: f64,
    /// Integration error above which `dt` is backed off.
    pub error_tolerance: f64,
    /// Factor applied on error backoff and on instability.
    pub backoff_factor: f64,
}

impl Default for TimestepConfig {
    fn default() -> Self {
        Self {
            initial_dt: 0.01,
            min_dt: 0.001,
            max_dt: 0.05,
            target_frame_time: 1.0 / 60.0,
            slow_ratio: 1.1,
            fast_ratio: 0.7,
            max_growth: 1.5,
            min_shrink: 0.67,
            error_tolerance: 1e-4,
            backoff_factor: 0.5,
        }
    }
}

impl TimestepConfig {
    /// Checks `0 < min_dt <= initial_dt <= max_dt` and the remaining
    /// factors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_bounds("dt", self.min_dt, self.max_dt)?;
        if !(self.min_dt..=self.max_dt).contains(&self.initial_dt) {
            return Err(ConfigError::OutOfRange {
                name: "initial_dt".to_string(),
                value: self.initial_dt,
                min: self.min_dt,
                max: self.max_dt,
            });
        }
        ConfigError::require_positive("target_frame_time", self.target_frame_time)?;
        ConfigError::require_positive("error_tolerance", self.error_tolerance)?;
        ConfigError::require_bounds("ratio", self.fast_ratio, self.slow_ratio)?;
        for (name, factor) in [
            ("min_shrink", self.min_shrink),
            ("backoff_factor", self.backoff_factor),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(ConfigError::OutOfRange {
                    name: name.to_string(),
                    value: factor,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }
        if !(self.max_growth.is_finite() && self.max_growth >= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "max_growth".to_string(),
                value: self.max_growth,
                min: 1.0,
                max: f64::MAX,
            });
        }
        Ok(())
    }
}

/// The controller's observable state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestepState {
    /// Current timestep (s).
    pub dt: f64,
    /// Lower bound (s).
    pub min_dt: f64,
    /// Upper bound (s).
    pub max_dt: f64,
}

/// What the last adaptation did to `dt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    /// `dt` was left as it was.
    Hold,
    /// The tick was slow and `dt` grew.
    Grow,
    /// The tick had headroom and `dt` shrank.
    Shrink,
    /// Integration error or instability halved `dt`.
    Backoff,
}

/// Keeps `dt` inside its bounds while trading fidelity against wall-clock
/// time.
#[derive(Debug, Clone)]
pub struct AdaptiveTimestepper {
    config: TimestepConfig,
    dt: f64,
    last_adjustment: Adjustment,
}

impl AdaptiveTimestepper {
    /// Creates a controller from a validated configuration.
    pub fn new(config: TimestepConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            dt: config.initial_dt,
            config,
            last_adjustment: Adjustment::Hold,
        })
    }

    /// Creates a controller with default factors and the given bounds.
    pub fn with_bounds(initial_dt: f64, min_dt: f64, max_dt: f64) -> Result<Self, ConfigError> {
        Self::new(TimestepConfig {
            initial_dt,
            min_dt,
            max_dt,
            ..Default::default()
        })
    }

    /// Returns the current timestep.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Returns `dt` with its bounds.
    pub fn state(&self) -> TimestepState {
        TimestepState {
            dt: self.dt,
            min_dt: self.config.min_dt,
            max_dt: self.config.max_dt,
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &TimestepConfig {
        &self.config
    }

    /// Returns what the last update did.
    pub fn last_adjustment(&self) -> Adjustment {
        self.last_adjustment
    }

    /// Whether `dt` is pinned at its lower bound.
    pub fn at_minimum(&self) -> bool {
        self.dt <= self.config.min_dt
    }

    /// Computes the next `dt` from the last tick's timing.
    ///
    /// A non-positive or non-finite budget, or a negative or non-finite
    /// computation time, leaves `dt` unchanged. An `error_estimate` above
    /// tolerance, or one that is not finite, forces a backoff whatever the
    /// timing says.
    pub fn adapt_timestep(
        &mut self,
        computation_time: f64,
        target_frame_time: f64,
        error_estimate: Option<f64>,
    ) -> f64 {
        let timing_valid = computation_time.is_finite()
            && computation_time >= 0.0
            && target_frame_time.is_finite()
            && target_frame_time > 0.0;
        if !timing_valid {
            log::debug!(
                "Timestep: ignoring invalid timing ({computation_time}, {target_frame_time})"
            );
            self.last_adjustment = Adjustment::Hold;
            return self.dt;
        }

        let ratio = computation_time / target_frame_time;
        let mut next = self.dt;
        self.last_adjustment = Adjustment::Hold;

        if ratio > self.config.slow_ratio {
            next *= ratio.min(self.config.max_growth);
            self.last_adjustment = Adjustment::Grow;
        } else if ratio < self.config.fast_ratio {
            next *= ratio.max(self.config.min_shrink);
            self.last_adjustment = Adjustment::Shrink;
        }

        if let Some(error) = error_estimate {
            if !(error <= self.config.error_tolerance) {
                next = self.config.min_dt.max(self.dt * self.config.backoff_factor);
                self.last_adjustment = Adjustment::Backoff;
            }
        }

        let previous = self.dt;
        self.dt = self.clamp(next);
        if self.dt != previous {
            log::debug!(
                "Timestep: {:?} dt {:.6} -> {:.6} (ratio {:.3})",
                self.last_adjustment,
                previous,
                self.dt,
                ratio
            );
        }
        self.dt
    }

    /// Applies the backoff factor in response to an instability.
    ///
    /// Returns `true` if `dt` actually decreased, `false` if it was already
    /// at `min_dt`.
    pub fn reduce_for_instability(&mut self) -> bool {
        let previous = self.dt;
        self.dt = self.clamp(self.dt * self.config.backoff_factor);
        self.last_adjustment = Adjustment::Backoff;
        log::debug!("Timestep: instability backoff {:.6} -> {:.6}", previous, self.dt);
        self.dt < previous
    }

    /// Replaces the bounds and re-clamps `dt` into them.
    pub fn set_bounds(&mut self, min_dt: f64, max_dt: f64) -> Result<(), ConfigError> {
        ConfigError::require_bounds("dt", min_dt, max_dt)?;
        self.config.min_dt = min_dt;
        self.config.max_dt = max_dt;
        self.config.initial_dt = self.config.initial_dt.clamp(min_dt, max_dt);
        self.dt = self.clamp(self.dt);
        Ok(())
    }

    /// Restores `dt` to its initial value.
    pub fn reset(&mut self) {
        self.dt = self.config.initial_dt;
        self.last_adjustment = Adjustment::Hold;
    }

    fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.dt;
        }
        value.clamp(self.config.min_dt, self.config.max_dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_slow_tick_grows_dt() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        let dt = stepper.adapt_timestep(0.15, 0.1, None);
        assert!((0.1..=0.5).contains(&dt));
        assert!(dt >= 0.1);
        assert_relative_eq!(dt, 0.15, epsilon = 1e-12);
        assert_eq!(stepper.last_adjustment(), Adjustment::Grow);
    }

    #[test]
    fn test_growth_is_capped_and_clamped() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        assert_relative_eq!(stepper.adapt_timestep(1.0, 0.1, None), 0.15, epsilon = 1e-12);
        for _ in 0..10 {
            stepper.adapt_timestep(1.0, 0.1, None);
        }
        assert_eq!(stepper.dt(), 0.5);
    }

    #[test]
    fn test_headroom_shrinks_dt() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        assert_relative_eq!(stepper.adapt_timestep(0.05, 0.1, None), 0.067, epsilon = 1e-12);
        assert_eq!(stepper.last_adjustment(), Adjustment::Shrink);
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        assert_relative_eq!(stepper.adapt_timestep(0.065, 0.1, None), 0.065, epsilon = 1e-12);
    }

    #[test]
    fn test_within_band_holds() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        assert_eq!(stepper.adapt_timestep(0.1, 0.1, None), 0.1);
        assert_eq!(stepper.last_adjustment(), Adjustment::Hold);
    }

    #[test]
    fn test_error_overrides_throughput() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        let dt = stepper.adapt_timestep(0.3, 0.1, Some(1e-3));
        assert_relative_eq!(dt, 0.05, epsilon = 1e-12);
        assert_eq!(stepper.last_adjustment(), Adjustment::Backoff);

        let dt = stepper.adapt_timestep(0.1, 0.1, Some(f64::NAN));
        assert_relative_eq!(dt, 0.025, epsilon = 1e-12);

        let dt = stepper.adapt_timestep(0.1, 0.1, Some(1e-6));
        assert_relative_eq!(dt, 0.025, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_timing_leaves_dt() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
        assert_eq!(stepper.adapt_timestep(0.2, 0.0, None), 0.1);
        assert_eq!(stepper.adapt_timestep(-1.0, 0.1, None), 0.1);
        assert_eq!(stepper.adapt_timestep(f64::INFINITY, 0.1, None), 0.1);
        assert_eq!(stepper.adapt_timestep(0.2, f64::NAN, None), 0.1);
    }

    #[test]
    fn test_dt_stays_in_bounds_for_any_sequence() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.02, 0.001, 0.05).unwrap();
        let inputs = [
            0.0, 1e-9, 0.5, 3.0, 0.016, 0.001, 100.0, 0.017, 0.0, 0.02, 7.5, 1e-4,
        ];
        for (i, computation_time) in inputs.iter().cycle().take(500).enumerate() {
            let error = if i % 7 == 0 { Some(1.0) } else { None };
            let dt = stepper.adapt_timestep(*computation_time, 1.0 / 60.0, error);
            assert!((0.001..=0.05).contains(&dt), "dt {dt} escaped at step {i}");
        }
    }

    #[test]
    fn test_instability_backoff_reports_headroom() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.004, 0.001, 0.05).unwrap();
        assert!(stepper.reduce_for_instability());
        assert!(stepper.reduce_for_instability());
        assert!(stepper.at_minimum());
        assert!(!stepper.reduce_for_instability());
        assert_eq!(stepper.dt(), 0.001);
    }

    #[test]
    fn test_set_bounds_reclamps() {
        let mut stepper = AdaptiveTimestepper::with_bounds(0.04, 0.001, 0.05).unwrap();
        stepper.set_bounds(0.001, 0.02).unwrap();
        assert_eq!(stepper.dt(), 0.02);
        assert!(stepper.set_bounds(0.1, 0.01).is_err());
        assert_eq!(stepper.state().max_dt, 0.02);
        stepper.reset();
        assert_eq!(stepper.dt(), 0.02);
    }

    #[test]
    fn test_invalid_construction_rejected() {
        assert!(matches!(
            AdaptiveTimestepper::with_bounds(0.1, 0.5, 0.01),
            Err(ConfigError::InvertedBounds { .. })
        ));
        assert!(matches!(
            AdaptiveTimestepper::with_bounds(0.6, 0.01, 0.5),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(AdaptiveTimestepper::with_bounds(0.0, 0.0, 0.5).is_err());
        assert!(AdaptiveTimestepper::new(TimestepConfig {
            target_frame_time: -1.0,
            ..Default::default()
        })
        .is_err());
    }
}
