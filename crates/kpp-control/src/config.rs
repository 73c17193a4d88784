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

//! Controller configuration, loadable from JSON.

use crate::mode::{ModeSettings, PerformanceMode};
use crate::recovery::RecoveryConfig;
use crate::stability::StabilityConfig;
use crate::timestep::TimestepConfig;
use kpp_core::ConfigError;
use kpp_telemetry::{AlertMonitorConfig, OptimizerConfig, StreamManagerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full configuration of a [`RealTimeController`](crate::RealTimeController).
///
/// Every field has a default, so a JSON document only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    /// Mode applied at construction.
    pub mode: PerformanceMode,
    /// Samples retained per profiler phase.
    pub profiler_window: usize,
    /// Timestep bounds and adaptation factors.
    pub timestep: TimestepConfig,
    /// Stability limits.
    pub stability: StabilityConfig,
    /// Alert log sizing.
    pub alerts: AlertMonitorConfig,
    /// Telemetry tiers and thresholds.
    pub optimizer: OptimizerConfig,
    /// Subscriber buffer sizing.
    pub stream: StreamManagerConfig,
    /// Error history sizing.
    pub recovery: RecoveryConfig,
    /// Consecutive unrecovered errors of one kind that abort the loop.
    pub escalation_threshold: u32,
    /// Minimum interval between host resource samples (ms).
    pub host_sample_interval_ms: u64,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        Self {
            mode: PerformanceMode::Balanced,
            profiler_window: 60,
            timestep: TimestepConfig::default(),
            stability: StabilityConfig::default(),
            alerts: AlertMonitorConfig::default(),
            optimizer: OptimizerConfig::default(),
            stream: StreamManagerConfig::default(),
            recovery: RecoveryConfig::default(),
            escalation_threshold: 3,
            host_sample_interval_ms: 1000,
        }
    }
}

impl RealTimeConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Checks every component configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_capacity("profiler_window", self.profiler_window)?;
        self.timestep.validate()?;
        self.stability.validate()?;
        ConfigError::require_capacity("max_recent_alerts", self.alerts.max_recent_alerts)?;
        ConfigError::require_capacity("alert_event_capacity", self.alerts.event_capacity)?;
        self.optimizer.validate()?;
        self.stream.validate()?;
        self.recovery.validate()?;
        ConfigError::require_capacity("escalation_threshold", self.escalation_threshold as usize)
    }

    /// The balanced baseline the mode presets are derived from.
    pub fn baseline(&self) -> ModeSettings {
        ModeSettings {
            min_dt: self.timestep.min_dt,
            max_dt: self.timestep.max_dt,
            medium_fps_threshold: self.optimizer.medium_fps_threshold,
            high_fps_threshold: self.optimizer.high_fps_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RealTimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.escalation_threshold, 3);
        assert_eq!(config.stability.window, 20);
    }

    #[test]
    fn test_partial_json_overrides_named_fields() {
        let config = RealTimeConfig::from_json(
            r#"{
                "mode": "fidelity",
                "timestep": { "initial_dt": 0.02, "max_dt": 0.1 },
                "stability": { "max_velocity": 4.0 },
                "escalation_threshold": 5
            }"#,
        )
        .unwrap();
        assert_eq!(config.mode, PerformanceMode::Fidelity);
        assert_eq!(config.timestep.initial_dt, 0.02);
        assert_eq!(config.timestep.max_dt, 0.1);
        assert_eq!(config.timestep.min_dt, 0.001);
        assert_eq!(config.stability.max_velocity, 4.0);
        assert_eq!(config.stability.max_acceleration, 50.0);
        assert_eq!(config.escalation_threshold, 5);
    }

    #[test]
    fn test_inconsistent_bounds_rejected() {
        let result =
            RealTimeConfig::from_json(r#"{ "timestep": { "min_dt": 0.5, "max_dt": 0.1 } }"#);
        assert!(matches!(result, Err(ConfigError::InvertedBounds { .. })));
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        assert!(matches!(
            RealTimeConfig::from_json("{ not json"),
            Err(ConfigError::Load(_))
        ));
        assert!(matches!(
            RealTimeConfig::from_file("/nonexistent/kpp.json"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_from_file_round_trip() {
        let path = std::env::temp_dir().join(format!("kpp-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "profiler_window": 12 }"#).unwrap();
        let config = RealTimeConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.profiler_window, 12);
    }
}
