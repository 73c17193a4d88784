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

//! # KPP Control
//!
//! The decision-making half of the real-time subsystem: numerical stability
//! checks, adaptive timestep control, error recovery with escalation, and the
//! [`RealTimeController`] facade that sequences them with the telemetry
//! components once per simulation tick.

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod mode;
pub mod recovery;
pub mod service;
pub mod stability;
pub mod timestep;

pub use config::RealTimeConfig;
pub use controller::{
    ProcessResult, RealTimeController, Recommendation, StatusHandle, StatusReport, TickError,
};
pub use mode::{ModeSettings, PerformanceMode};
pub use recovery::{
    ErrorRecoverySystem, ErrorSummary, KindCounts, RecoveryConfig, RecoveryOutcome,
    RecoveryRecord, RecoveryStrategy, StrategyResult,
};
pub use service::{LoopConfig, LoopOutcome, RealTimeLoop, Simulation};
pub use stability::{
    NumericalStabilityMonitor, StabilityCheck, StabilityConfig, StabilityRule, StabilityViolation,
};
pub use timestep::{Adjustment, AdaptiveTimestepper, TimestepConfig, TimestepState};
