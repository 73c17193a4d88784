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

//! Read-only simulation state view and the telemetry types built from it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single body in the chain, as reported by the host simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    /// Host-assigned body index.
    pub id: u32,
    /// Position along the chain loop (m).
    pub position: f64,
    /// Signed velocity (m/s).
    pub velocity: f64,
    /// Optional host-defined phase label (e.g. "ascending", "filled").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl BodyRecord {
    /// Creates a body record without a phase label.
    pub fn new(id: u32, position: f64, velocity: f64) -> Self {
        Self {
            id,
            position,
            velocity,
            state: None,
        }
    }
}

/// Snapshot of the host simulation after one tick.
///
/// Only `time` is required. Every other field may be absent; components that
/// need a missing field skip the corresponding check instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationState {
    /// Simulated time (s).
    pub time: f64,
    /// Chain velocity (m/s).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v_chain: Option<f64>,
    /// Chain acceleration (m/s²).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a_chain: Option<f64>,
    /// Net output power (W).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    /// Conversion efficiency in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
    /// Named force components (N).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub forces: BTreeMap<String, f64>,
    /// Per-body records.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bodies: Vec<BodyRecord>,
    /// Additional named scalars.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    /// Free-form diagnostic detail.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub diagnostics: Map<String, Value>,
}

impl SimulationState {
    /// Creates an otherwise empty state at simulated time `time`.
    pub fn new(time: f64) -> Self {
        Self {
            time,
            ..Default::default()
        }
    }

    /// Sets the chain velocity.
    pub fn with_chain_velocity(mut self, v: f64) -> Self {
        self.v_chain = Some(v);
        self
    }

    /// Sets the chain acceleration.
    pub fn with_chain_acceleration(mut self, a: f64) -> Self {
        self.a_chain = Some(a);
        self
    }

    /// Sets the output power.
    pub fn with_power(mut self, power: f64) -> Self {
        self.power = Some(power);
        self
    }

    /// Sets the efficiency.
    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = Some(efficiency);
        self
    }

    /// Adds a named force component.
    pub fn with_force(mut self, name: impl Into<String>, value: f64) -> Self {
        self.forces.insert(name.into(), value);
        self
    }

    /// Appends a body record.
    pub fn with_body(mut self, body: BodyRecord) -> Self {
        self.bodies.push(body);
        self
    }

    /// Adds a named scalar metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Adds a diagnostic entry.
    pub fn with_diagnostic(mut self, name: impl Into<String>, value: Value) -> Self {
        self.diagnostics.insert(name.into(), value);
        self
    }

    /// Serializes the state into a flat telemetry payload keyed by field name.
    ///
    /// Non-finite floats become `null`, which downstream lookups treat as
    /// missing.
    pub fn to_payload(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => {
                let mut map = Map::new();
                map.insert("state".to_string(), other);
                Ok(map)
            }
        }
    }
}

/// Per-tick performance measurements supplied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceData {
    /// Wall-clock duration of the tick that just completed (s).
    pub computation_time: f64,
    /// Frame budget for this tick (s). Falls back to the controller's target.
    pub target_frame_time: Option<f64>,
    /// Numerical-integration error indicator, if the host can supply one.
    pub error_estimate: Option<f64>,
    /// Measured update rate. Derived from the profiler when absent.
    pub fps: Option<f64>,
}

impl PerformanceData {
    /// Creates performance data carrying only the tick duration.
    pub fn new(computation_time: f64) -> Self {
        Self {
            computation_time,
            ..Default::default()
        }
    }

    /// Sets the frame budget.
    pub fn with_target_frame_time(mut self, target: f64) -> Self {
        self.target_frame_time = Some(target);
        self
    }

    /// Sets the integration error estimate.
    pub fn with_error_estimate(mut self, error: f64) -> Self {
        self.error_estimate = Some(error);
        self
    }

    /// Sets the measured update rate.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

/// One unit of outbound telemetry, shared between all subscribers of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Monotonic tick number that produced this frame.
    pub tick: u64,
    /// Stream-clock timestamp (s) at which the frame was produced.
    pub timestamp: f64,
    /// The (possibly reduced) payload.
    pub payload: Map<String, Value>,
}

impl TelemetryFrame {
    /// Creates a new frame.
    pub fn new(tick: u64, timestamp: f64, payload: Map<String, Value>) -> Self {
        Self {
            tick,
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::lookup_number;

    #[test]
    fn test_payload_omits_missing_fields() {
        let state = SimulationState::new(2.0).with_chain_velocity(1.5);
        let payload = state.to_payload().unwrap();
        assert_eq!(lookup_number(&payload, "time"), Some(2.0));
        assert_eq!(lookup_number(&payload, "v_chain"), Some(1.5));
        assert!(!payload.contains_key("a_chain"));
        assert!(!payload.contains_key("forces"));
        assert!(!payload.contains_key("bodies"));
    }

    #[test]
    fn test_payload_nested_fields_are_addressable() {
        let state = SimulationState::new(0.0)
            .with_force("buoyancy", 200_000.0)
            .with_body(BodyRecord::new(0, 1.0, 2.5))
            .with_metric("pressure", 3.2);
        let payload = state.to_payload().unwrap();
        assert_eq!(lookup_number(&payload, "forces.buoyancy"), Some(200_000.0));
        assert_eq!(lookup_number(&payload, "bodies.0.velocity"), Some(2.5));
        assert_eq!(lookup_number(&payload, "metrics.pressure"), Some(3.2));
    }

    #[test]
    fn test_non_finite_values_become_missing() {
        let state = SimulationState::new(0.0).with_chain_velocity(f64::NAN);
        let payload = state.to_payload().unwrap();
        assert_eq!(lookup_number(&payload, "v_chain"), None);
    }

    #[test]
    fn test_state_deserializes_from_partial_json() {
        let state: SimulationState =
            serde_json::from_str(r#"{"time": 4.0, "forces": {"drag": 12.0}}"#).unwrap();
        assert_eq!(state.time, 4.0);
        assert_eq!(state.forces.get("drag"), Some(&12.0));
        assert!(state.v_chain.is_none());
    }
}
