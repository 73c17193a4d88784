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

//! Named performance presets.

use kpp_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trade-off between wall-clock throughput and simulated fidelity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    /// Larger timesteps and coarser streaming.
    Performance,
    /// The configured defaults.
    #[default]
    Balanced,
    /// Smaller timesteps and richer streaming.
    Fidelity,
}

/// Component parameters a mode resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Timestep lower bound (s).
    pub min_dt: f64,
    /// Timestep upper bound (s).
    pub max_dt: f64,
    /// FPS at which tier 2 telemetry is streamed.
    pub medium_fps_threshold: f64,
    /// FPS at which tier 3 telemetry is streamed.
    pub high_fps_threshold: f64,
}

impl PerformanceMode {
    /// Every mode, in increasing fidelity.
    pub const ALL: [PerformanceMode; 3] = [
        PerformanceMode::Performance,
        PerformanceMode::Balanced,
        PerformanceMode::Fidelity,
    ];

    /// Returns the mode name.
    pub fn name(self) -> &'static str {
        match self {
            PerformanceMode::Performance => "performance",
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::Fidelity => "fidelity",
        }
    }

    /// Derives the mode's settings from the configured baseline.
    pub fn settings(self, base: &ModeSettings) -> ModeSettings {
        match self {
            PerformanceMode::Balanced => *base,
            PerformanceMode::Performance => ModeSettings {
                min_dt: base.min_dt,
                max_dt: base.max_dt * 2.0,
                medium_fps_threshold: base.medium_fps_threshold * 1.5,
                high_fps_threshold: base.high_fps_threshold * 1.5,
            },
            PerformanceMode::Fidelity => ModeSettings {
                min_dt: base.min_dt,
                max_dt: (base.max_dt * 0.5).max(base.min_dt),
                medium_fps_threshold: base.medium_fps_threshold * 0.5,
                high_fps_threshold: base.high_fps_threshold * 0.5,
            },
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PerformanceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "performance" => Ok(PerformanceMode::Performance),
            "balanced" => Ok(PerformanceMode::Balanced),
            "fidelity" => Ok(PerformanceMode::Fidelity),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}
