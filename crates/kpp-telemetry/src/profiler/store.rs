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

//! Performance profiler: per-phase timing windows plus monotonic counters.

use super::ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// One recorded duration. The phase name is the key of the window that
/// holds the sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    /// Measured duration (s).
    pub duration: f64,
    /// Seconds since the profiler was created.
    pub timestamp: f64,
}

/// Aggregate statistics over the current window of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    /// Number of samples in the window.
    pub count: usize,
    /// Mean duration (s).
    pub avg: f64,
    /// Shortest duration (s).
    pub min: f64,
    /// Longest duration (s).
    pub max: f64,
    /// Most recent duration (s).
    pub last: f64,
}

/// A point-in-time copy of every counter and phase statistic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// All counters by name.
    pub counters: BTreeMap<String, u64>,
    /// Statistics for every phase that has at least one sample.
    pub phases: BTreeMap<String, PhaseStats>,
}

/// Rolling-window store of step timings and event counters.
///
/// Every phase gets its own fixed-size window, created on first use; the
/// oldest sample is evicted once the window is full. Counters only ever go
/// up until [`reset`](Self::reset) is called.
#[derive(Debug, Clone)]
pub struct PerformanceProfiler {
    window: usize,
    epoch: Instant,
    timings: HashMap<String, RingBuffer<TimingSample>>,
    counters: HashMap<String, u64>,
}

impl PerformanceProfiler {
    /// Default number of samples retained per phase.
    pub const DEFAULT_WINDOW: usize = 60;

    /// Creates a profiler retaining `window` samples per phase.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            epoch: Instant::now(),
            timings: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    /// Returns the per-phase window size.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Appends a duration to the window of `phase`.
    pub fn record_timing(&mut self, phase: &str, duration: Duration) {
        self.push_sample(phase, duration.as_secs_f64());
    }

    /// Appends a duration given in seconds. Negative or non-finite values are
    /// ignored.
    pub fn record_timing_secs(&mut self, phase: &str, seconds: f64) {
        if !seconds.is_finite() || seconds < 0.0 {
            log::trace!("Profiler: ignoring invalid sample {seconds} for '{phase}'");
            return;
        }
        self.push_sample(phase, seconds);
    }

    fn push_sample(&mut self, phase: &str, seconds: f64) {
        let sample = TimingSample {
            duration: seconds,
            timestamp: self.epoch.elapsed().as_secs_f64(),
        };
        if let Some(buffer) = self.timings.get_mut(phase) {
            buffer.push(sample);
            return;
        }
        let mut buffer = RingBuffer::new(self.window);
        buffer.push(sample);
        self.timings.insert(phase.to_string(), buffer);
    }

    /// Increments the counter `name` by one and returns the new value.
    pub fn increment_counter(&mut self, name: &str) -> u64 {
        self.increment_counter_by(name, 1)
    }

    /// Increments the counter `name` by `amount` and returns the new value.
    pub fn increment_counter_by(&mut self, name: &str, amount: u64) -> u64 {
        if let Some(value) = self.counters.get_mut(name) {
            *value = value.saturating_add(amount);
            return *value;
        }
        self.counters.insert(name.to_string(), amount);
        amount
    }

    /// Returns the current value of a counter, `0` if it was never touched.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Returns statistics over the current window of `phase`, or `None` if
    /// no samples exist.
    pub fn get_stats(&self, phase: &str) -> Option<PhaseStats> {
        self.timings.get(phase).and_then(Self::stats_of)
    }

    /// Returns the mean duration of `phase` in seconds.
    pub fn average(&self, phase: &str) -> Option<f64> {
        self.get_stats(phase).map(|stats| stats.avg)
    }

    /// Returns the raw samples of `phase`, oldest first.
    pub fn samples(&self, phase: &str) -> Vec<TimingSample> {
        self.timings
            .get(phase)
            .map(|buffer| buffer.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns all counters and all phase statistics as one snapshot.
    pub fn get_performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            counters: self
                .counters
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
            phases: self
                .timings
                .iter()
                .filter_map(|(name, buffer)| Self::stats_of(buffer).map(|s| (name.clone(), s)))
                .collect(),
        }
    }

    /// Clears every window and counter.
    pub fn reset(&mut self) {
        log::debug!(
            "Profiler: reset ({} phases, {} counters)",
            self.timings.len(),
            self.counters.len()
        );
        self.timings.clear();
        self.counters.clear();
    }

    /// Clears the window of a single phase.
    pub fn reset_phase(&mut self, phase: &str) {
        self.timings.remove(phase);
    }

    fn stats_of(buffer: &RingBuffer<TimingSample>) -> Option<PhaseStats> {
        let last = buffer.last()?;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in buffer.iter() {
            min = min.min(sample.duration);
            max = max.max(sample.duration);
            sum += sample.duration;
        }
        Some(PhaseStats {
            count: buffer.count(),
            avg: sum / buffer.count() as f64,
            min,
            max,
            last: last.duration,
        })
    }
}

impl Default for PerformanceProfiler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stats_over_window() {
        let mut profiler = PerformanceProfiler::new(10);
        profiler.record_timing("physics", Duration::from_millis(10));
        profiler.record_timing("physics", Duration::from_millis(30));
        profiler.record_timing("physics", Duration::from_millis(20));

        let stats = profiler.get_stats("physics").unwrap();
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.avg, 0.020, epsilon = 1e-9);
        assert_relative_eq!(stats.min, 0.010, epsilon = 1e-9);
        assert_relative_eq!(stats.max, 0.030, epsilon = 1e-9);
        assert_relative_eq!(stats.last, 0.020, epsilon = 1e-9);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut profiler = PerformanceProfiler::new(3);
        for ms in [100.0, 1.0, 2.0, 3.0] {
            profiler.record_timing_secs("tick", ms / 1000.0);
        }
        let stats = profiler.get_stats("tick").unwrap();
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.max, 0.003, epsilon = 1e-12);
    }

    #[test]
    fn test_unknown_phase_is_empty_not_error() {
        let profiler = PerformanceProfiler::default();
        assert!(profiler.get_stats("missing").is_none());
        assert!(profiler.samples("missing").is_empty());
        assert_eq!(profiler.counter("missing"), 0);
    }

    #[test]
    fn test_invalid_seconds_ignored() {
        let mut profiler = PerformanceProfiler::default();
        profiler.record_timing_secs("tick", -1.0);
        profiler.record_timing_secs("tick", f64::NAN);
        assert!(profiler.get_stats("tick").is_none());
    }

    #[test]
    fn test_counters_are_monotonic_until_reset() {
        let mut profiler = PerformanceProfiler::default();
        assert_eq!(profiler.increment_counter("ticks"), 1);
        assert_eq!(profiler.increment_counter("ticks"), 2);
        assert_eq!(profiler.increment_counter_by("ticks", 5), 7);
        assert_eq!(profiler.counter("ticks"), 7);

        profiler.reset();
        assert_eq!(profiler.counter("ticks"), 0);
        assert!(profiler.get_performance_summary().counters.is_empty());
    }

    #[test]
    fn test_summary_is_idempotent() {
        let mut profiler = PerformanceProfiler::default();
        profiler.record_timing_secs("tick", 0.01);
        profiler.record_timing_secs("stream", 0.002);
        profiler.increment_counter("frames");

        let first = profiler.get_performance_summary();
        let second = profiler.get_performance_summary();
        assert_eq!(first, second);
        assert_eq!(first.phases.len(), 2);
        assert_eq!(first.counters.get("frames"), Some(&1));
    }

    #[test]
    fn test_reset_phase_only_touches_that_phase() {
        let mut profiler = PerformanceProfiler::default();
        profiler.record_timing_secs("a", 0.1);
        profiler.record_timing_secs("b", 0.2);
        profiler.reset_phase("a");
        assert!(profiler.get_stats("a").is_none());
        assert!(profiler.get_stats("b").is_some());
    }
}
