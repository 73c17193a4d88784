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

//! RAII-based timer that records a phase duration into the profiler.

use crate::profiler::store::PerformanceProfiler;
use kpp_core::Stopwatch;

/// Times the enclosing scope and records the result into a
/// [`PerformanceProfiler`] when dropped.
///
/// The measurement is recorded even on early return.
pub struct ScopedTimer<'a> {
    stopwatch: Stopwatch,
    phase: &'a str,
    profiler: &'a mut PerformanceProfiler,
}

impl<'a> ScopedTimer<'a> {
    /// Starts timing `phase` immediately.
    pub fn new(profiler: &'a mut PerformanceProfiler, phase: &'a str) -> Self {
        Self {
            stopwatch: Stopwatch::new(),
            phase,
            profiler,
        }
    }

    /// Gives access to the profiler while the timer is running, e.g. to bump
    /// counters from inside the timed scope.
    pub fn profiler(&mut self) -> &mut PerformanceProfiler {
        self.profiler
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.stopwatch.elapsed();
        self.profiler.record_timing(self.phase, elapsed);
    }
}
