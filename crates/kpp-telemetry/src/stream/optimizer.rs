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

//! Priority-tiered payload reduction.
//!
//! Fields are bucketed into three fixed tiers. Tier 1 is always emitted;
//! tiers 2 and 3 are emitted only while the measured update rate stays at or
//! above their threshold. Every result carries a `_metadata` entry so a
//! consumer can tell a degraded frame from a complete one.

use kpp_core::{ConfigError, PerformanceData};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Key under which the optimizer records what it emitted.
pub const METADATA_KEY: &str = "_metadata";

/// Priority bucket of a telemetry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    /// Core scalar metrics, always emitted.
    Core = 1,
    /// Secondary structured data.
    Secondary = 2,
    /// Diagnostic and validation detail.
    Diagnostic = 3,
}

impl PriorityTier {
    fn level_name(self) -> &'static str {
        match self {
            PriorityTier::Core => "minimal",
            PriorityTier::Secondary => "standard",
            PriorityTier::Diagnostic => "full",
        }
    }
}

/// Tier membership and thresholds of the [`DataStreamOptimizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Tier 1 field names.
    pub core_fields: Vec<String>,
    /// Tier 2 field names.
    pub secondary_fields: Vec<String>,
    /// Tier 3 field names. Fields in no list are also treated as tier 3.
    pub diagnostic_fields: Vec<String>,
    /// Minimum FPS at which tier 2 is emitted.
    pub medium_fps_threshold: f64,
    /// Minimum FPS at which tier 3 is emitted.
    pub high_fps_threshold: f64,
    /// Decimal places kept for emitted top-level floats, if set.
    pub float_precision: Option<u32>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            core_fields: names(&[
                "time",
                "tick",
                "dt",
                "power",
                "power_output",
                "velocity",
                "v_chain",
                "efficiency",
            ]),
            secondary_fields: names(&["bodies", "forces", "a_chain", "metrics"]),
            diagnostic_fields: names(&["diagnostics", "validation", "stability", "violations"]),
            medium_fps_threshold: 8.0,
            high_fps_threshold: 15.0,
            float_precision: None,
        }
    }
}

impl OptimizerConfig {
    /// Checks the thresholds are non-negative and ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("medium_fps_threshold", self.medium_fps_threshold),
            ("high_fps_threshold", self.high_fps_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    name: name.to_string(),
                    value,
                    min: 0.0,
                    max: f64::MAX,
                });
            }
        }
        if self.medium_fps_threshold > self.high_fps_threshold {
            return Err(ConfigError::InvertedBounds {
                name: "fps_threshold".to_string(),
                min: self.medium_fps_threshold,
                max: self.high_fps_threshold,
            });
        }
        Ok(())
    }
}

/// Shrinks telemetry payloads according to measured throughput.
///
/// [`optimize_data_output`](Self::optimize_data_output) is a pure function of
/// its inputs: no state is carried from one call to the next.
#[derive(Debug, Clone)]
pub struct DataStreamOptimizer {
    config: OptimizerConfig,
}

impl DataStreamOptimizer {
    /// Creates an optimizer, validating its thresholds.
    pub fn new(config: OptimizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Replaces the FPS thresholds (used by performance-mode presets).
    pub fn set_thresholds(&mut self, medium: f64, high: f64) -> Result<(), ConfigError> {
        let mut candidate = self.config.clone();
        candidate.medium_fps_threshold = medium;
        candidate.high_fps_threshold = high;
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    /// Returns the tier a field belongs to.
    pub fn tier_of(&self, field: &str) -> PriorityTier {
        let listed = |list: &[String]| list.iter().any(|f| f == field);
        if listed(&self.config.core_fields) {
            PriorityTier::Core
        } else if listed(&self.config.secondary_fields) {
            PriorityTier::Secondary
        } else {
            PriorityTier::Diagnostic
        }
    }

    /// Returns the highest tier emitted at `fps`. Non-finite rates count as 0.
    pub fn max_tier_for(&self, fps: f64) -> PriorityTier {
        let fps = if fps.is_finite() { fps } else { 0.0 };
        if fps >= self.config.high_fps_threshold {
            PriorityTier::Diagnostic
        } else if fps >= self.config.medium_fps_threshold {
            PriorityTier::Secondary
        } else {
            PriorityTier::Core
        }
    }

    /// Returns the update rate that drives tier selection: the measured fps,
    /// else the rate implied by the tick duration, else 0.
    pub fn fps_of(performance_metrics: &PerformanceData) -> f64 {
        let positive = |v: &f64| v.is_finite() && *v > 0.0;
        performance_metrics
            .fps
            .filter(positive)
            .or_else(|| {
                Some(performance_metrics.computation_time)
                    .filter(positive)
                    .map(|t| 1.0 / t)
            })
            .unwrap_or(0.0)
    }

    /// Returns the reduced view of `full_data` for the given measurements.
    pub fn optimize_data_output(
        &self,
        full_data: &Map<String, Value>,
        performance_metrics: &PerformanceData,
    ) -> Map<String, Value> {
        let fps = Self::fps_of(performance_metrics);
        let max_tier = self.max_tier_for(fps);
        let mut reduced = Map::new();
        let mut dropped = 0usize;

        for (key, value) in full_data {
            if key == METADATA_KEY {
                continue;
            }
            if self.tier_of(key) <= max_tier {
                reduced.insert(key.clone(), self.round(value));
            } else {
                dropped += 1;
            }
        }

        let tiers: Vec<u8> = [
            PriorityTier::Core,
            PriorityTier::Secondary,
            PriorityTier::Diagnostic,
        ]
        .into_iter()
        .filter(|tier| *tier <= max_tier)
        .map(|tier| tier as u8)
        .collect();

        reduced.insert(
            METADATA_KEY.to_string(),
            json!({
                "tiers": tiers,
                "level": max_tier.level_name(),
                "fps": fps,
                "dropped_fields": dropped,
            }),
        );
        reduced
    }

    fn round(&self, value: &Value) -> Value {
        match (self.config.float_precision, value) {
            (Some(places), Value::Number(n)) if n.is_f64() => {
                let factor = 10f64.powi(places as i32);
                n.as_f64()
                    .map(|v| Value::from((v * factor).round() / factor))
                    .unwrap_or_else(|| value.clone())
            }
            _ => value.clone(),
        }
    }
}

impl Default for DataStreamOptimizer {
    fn default() -> Self {
        Self {
            config: OptimizerConfig::default(),
        }
    }
}
