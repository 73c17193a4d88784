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

//! Numerical stability monitor.
//!
//! Fixed threshold rules on chain and body velocity, chain acceleration and
//! aggregate force. A check never fails: it reports the violated rules and
//! feeds a trailing window from which the stability score is derived.

use kpp_core::{ConfigError, Severity, SimulationState};
use kpp_telemetry::RingBuffer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Limits of the [`NumericalStabilityMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Largest admissible velocity magnitude (m/s).
    pub max_velocity: f64,
    /// Largest admissible chain acceleration magnitude (m/s²).
    pub max_acceleration: f64,
    /// Largest admissible sum of force magnitudes (N).
    pub max_force: f64,
    /// Number of trailing checks the score is computed over.
    pub window: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            max_velocity: 10.0,
            max_acceleration: 50.0,
            max_force: 1e5,
            window: 20,
        }
    }
}

impl StabilityConfig {
    /// Checks every limit is positive and the window non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_positive("max_velocity", self.max_velocity)?;
        ConfigError::require_positive("max_acceleration", self.max_acceleration)?;
        ConfigError::require_positive("max_force", self.max_force)?;
        ConfigError::require_capacity("stability_window", self.window)
    }
}

/// The rule a violation was raised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityRule {
    /// Chain or body velocity magnitude.
    Velocity,
    /// Chain acceleration magnitude.
    Acceleration,
    /// Sum of force magnitudes.
    Force,
    /// A NaN or infinite input.
    NonFinite,
}

impl StabilityRule {
    /// Returns the rule name.
    pub fn name(self) -> &'static str {
        match self {
            StabilityRule::Velocity => "velocity",
            StabilityRule::Acceleration => "acceleration",
            StabilityRule::Force => "force",
            StabilityRule::NonFinite => "non_finite",
        }
    }
}

/// One breached rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityViolation {
    /// The rule that was breached.
    pub rule: StabilityRule,
    /// Observed magnitude.
    pub observed: f64,
    /// Configured limit.
    pub limit: f64,
    /// `Warning` within twice the limit, `Critical` beyond or when non-finite.
    pub severity: Severity,
}

impl fmt::Display for StabilityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} = {} (limit {})",
            self.severity,
            self.rule.name(),
            self.observed,
            self.limit
        )
    }
}

/// Result of one stability check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityCheck {
    /// `true` when no rule was breached.
    pub is_stable: bool,
    /// Every breached rule, at most one per rule.
    pub violations: Vec<StabilityViolation>,
}

/// Validates simulation states against fixed physical limits.
#[derive(Debug, Clone)]
pub struct NumericalStabilityMonitor {
    config: StabilityConfig,
    history: RingBuffer<bool>,
    total_checks: u64,
    unstable_checks: u64,
    last_violations: Vec<StabilityViolation>,
}

impl NumericalStabilityMonitor {
    /// Creates a monitor with an empty history.
    pub fn new(config: StabilityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            history: RingBuffer::new(config.window),
            config,
            total_checks: 0,
            unstable_checks: 0,
            last_violations: Vec::new(),
        })
    }

    /// Returns the configured limits.
    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Checks `state` against every rule and records the outcome.
    ///
    /// Absent fields are skipped. A non-finite input yields a single
    /// critical `NonFinite` violation and is excluded from the magnitude
    /// rules.
    pub fn check_stability(&mut self, state: &SimulationState) -> StabilityCheck {
        let mut violations = Vec::new();
        let mut non_finite: Option<f64> = None;
        let mut note = |value: f64| -> Option<f64> {
            if value.is_finite() {
                Some(value.abs())
            } else {
                non_finite.get_or_insert(value);
                None
            }
        };

        note(state.time);

        let velocity = state
            .v_chain
            .into_iter()
            .chain(state.bodies.iter().map(|b| b.velocity))
            .filter_map(&mut note)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        let acceleration = state.a_chain.and_then(&mut note);
        let force = if state.forces.is_empty() {
            None
        } else {
            Some(state.forces.values().copied().filter_map(&mut note).sum::<f64>())
        };

        if let Some(value) = non_finite {
            violations.push(StabilityViolation {
                rule: StabilityRule::NonFinite,
                observed: value,
                limit: f64::MAX,
                severity: Severity::Critical,
            });
        }
        for (rule, observed, limit) in [
            (StabilityRule::Velocity, velocity, self.config.max_velocity),
            (StabilityRule::Acceleration, acceleration, self.config.max_acceleration),
            (StabilityRule::Force, force, self.config.max_force),
        ] {
            if let Some(observed) = observed.filter(|o| *o > limit) {
                let severity = if observed <= 2.0 * limit {
                    Severity::Warning
                } else {
                    Severity::Critical
                };
                violations.push(StabilityViolation {
                    rule,
                    observed,
                    limit,
                    severity,
                });
            }
        }

        let is_stable = violations.is_empty();
        self.history.push(is_stable);
        self.total_checks += 1;
        if !is_stable {
            self.unstable_checks += 1;
            for violation in &violations {
                log::warn!("StabilityMonitor: t={} {}", state.time, violation);
            }
        }
        self.last_violations = violations.clone();

        StabilityCheck {
            is_stable,
            violations,
        }
    }

    /// Fraction of stable checks in the trailing window, `1.0` without
    /// history. Always within `[0, 1]`.
    pub fn get_stability_score(&self) -> f64 {
        let count = self.history.count();
        if count == 0 {
            return 1.0;
        }
        let stable = self.history.iter().filter(|s| **s).count();
        stable as f64 / count as f64
    }

    /// Violations raised by the most recent check.
    pub fn last_violations(&self) -> &[StabilityViolation] {
        &self.last_violations
    }

    /// Number of checks performed since creation or reset.
    pub fn total_checks(&self) -> u64 {
        self.total_checks
    }

    /// Number of checks that found at least one violation.
    pub fn unstable_checks(&self) -> u64 {
        self.unstable_checks
    }

    /// Clears the history.
    pub fn reset(&mut self) {
        self.history.clear();
        self.total_checks = 0;
        self.unstable_checks = 0;
        self.last_violations.clear();
    }
}

impl Default for NumericalStabilityMonitor {
    fn default() -> Self {
        let config = StabilityConfig::default();
        Self {
            history: RingBuffer::new(config.window),
            config,
            total_checks: 0,
            unstable_checks: 0,
            last_violations: Vec::new(),
        }
    }
}
