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

//! Telemetry for the real-time control subsystem: step profiling, threshold
//! alerting, host resource sampling and rate-limited subscriber streaming.

#![warn(missing_docs)]

pub mod monitoring;
pub mod profiler;
pub mod stream;
pub mod utils;

pub use monitoring::alerts::{Alert, AlertMonitor, AlertMonitorConfig, AlertRule};
pub use monitoring::host::{HostReport, HostSampler};
pub use profiler::ring_buffer::RingBuffer;
pub use profiler::store::{PerformanceProfiler, PerformanceSummary, PhaseStats, TimingSample};
pub use stream::manager::{DataStreamManager, StreamManagerConfig, StreamingStatus};
pub use stream::optimizer::{DataStreamOptimizer, OptimizerConfig, PriorityTier};
pub use stream::subscriber::{SubscriberId, SubscriberStats, Subscription};
pub use utils::timer::ScopedTimer;
