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

//! sysinfo-based sampling of host CPU and memory usage.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Latest host resource snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    /// Global CPU usage (0.0 to 1.0).
    pub cpu_load: f32,
    /// Used system memory in bytes.
    pub used_memory_bytes: u64,
    /// Total system memory in bytes.
    pub total_memory_bytes: u64,
}

impl HostReport {
    /// Fraction of system memory in use, `0.0` if the total is unknown.
    pub fn memory_load(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            0.0
        } else {
            self.used_memory_bytes as f64 / self.total_memory_bytes as f64
        }
    }
}

/// Samples host resources no more often than a configured interval.
///
/// Refreshing sysinfo is comparatively expensive, so the tick loop calls
/// [`sample`](Self::sample) every tick and only every `interval` triggers a
/// real refresh.
pub struct HostSampler {
    system: System,
    interval: Duration,
    last_refresh: Option<Instant>,
    latest: HostReport,
}

impl HostSampler {
    /// Creates a sampler refreshing at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            system: System::new(),
            interval,
            last_refresh: None,
            latest: HostReport::default(),
        }
    }

    /// Refreshes if the interval has elapsed and returns the latest report.
    pub fn sample(&mut self) -> HostReport {
        let due = self
            .last_refresh
            .map_or(true, |last| last.elapsed() >= self.interval);
        if due {
            self.system.refresh_cpu_usage();
            self.system.refresh_memory();
            self.latest = HostReport {
                cpu_load: self.system.global_cpu_usage() / 100.0,
                used_memory_bytes: self.system.used_memory(),
                total_memory_bytes: self.system.total_memory(),
            };
            self.last_refresh = Some(Instant::now());
            log::trace!(
                "HostSampler: cpu={:.2} mem={:.2}",
                self.latest.cpu_load,
                self.latest.memory_load()
            );
        }
        self.latest
    }

    /// Returns the last sampled report without refreshing.
    pub fn latest(&self) -> HostReport {
        self.latest
    }
}

impl std::fmt::Debug for HostSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSampler")
            .field("interval", &self.interval)
            .field("latest", &self.latest)
            .finish()
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_refreshes() {
        let mut sampler = HostSampler::new(Duration::from_secs(60));
        let report = sampler.sample();
        assert!(report.total_memory_bytes > 0);
        assert!(report.memory_load() <= 1.0);
        assert_eq!(sampler.latest(), report);
    }

    #[test]
    fn test_memory_load_without_total() {
        assert_eq!(HostReport::default().memory_load(), 0.0);
    }
}
