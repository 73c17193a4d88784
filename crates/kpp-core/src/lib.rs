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

//! # KPP Core
//!
//! Foundational crate containing the shared vocabulary of the real-time
//! control subsystem: the read-only simulation state view, telemetry frames,
//! error kinds and the small communication primitives every other crate
//! builds on.

#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod path;
pub mod state;
pub mod timer;
pub mod types;

pub use error::{ConfigError, ErrorKind};
pub use event::EventBus;
pub use state::{BodyRecord, PerformanceData, SimulationState, TelemetryFrame};
pub use timer::Stopwatch;
pub use types::{Comparator, Severity, EQUALITY_TOLERANCE};
