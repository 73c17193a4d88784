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

//! The real-time controller facade.
//!
//! Composes every component into one per-tick call. Each tick runs strictly
//! in this order: profile, stability check, timestep adaptation, alerts,
//! payload optimization, streaming, status publication. Failures raised along
//! the way are routed through the recovery registry; only a run of
//! unrecovered failures of one kind aborts the loop.

use crate::config::RealTimeConfig;
use crate::mode::PerformanceMode;
use crate::recovery::{
    timestep_backoff_strategy, ErrorRecoverySystem, ErrorSummary, RecoveryOutcome, StrategyResult,
};
use crate::stability::{NumericalStabilityMonitor, StabilityViolation};
use crate::timestep::{AdaptiveTimestepper, TimestepState};
use kpp_core::{
    Comparator, ConfigError, ErrorKind, EventBus, PerformanceData, Severity, SimulationState,
    Stopwatch, TelemetryFrame,
};
use kpp_telemetry::{
    Alert, AlertMonitor, DataStreamManager, DataStreamOptimizer, HostReport, HostSampler,
    PerformanceProfiler, PerformanceSummary, ScopedTimer, StreamingStatus, SubscriberId,
    Subscription,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// What the host loop should do after a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Keep ticking.
    #[default]
    Continue,
    /// Recovery failed repeatedly; stop the loop.
    Abort,
}

/// A failure detected while processing a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickError {
    /// The stability monitor reported violations.
    Instability {
        /// The violated rules.
        violations: Vec<StabilityViolation>,
    },
    /// The host reported a negative or non-finite computation time.
    InvalidTiming {
        /// The reported value.
        computation_time: f64,
    },
    /// The simulation state could not be turned into a payload.
    Serialization(String),
}

impl TickError {
    /// The recovery-registry key of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TickError::Instability { .. } => ErrorKind::Instability,
            TickError::InvalidTiming { .. } => ErrorKind::InvalidTiming,
            TickError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// The payload handed to the recovery strategy.
    pub fn data(&self) -> Value {
        match self {
            TickError::Instability { violations } => json!({
                "violations": serde_json::to_value(violations).unwrap_or_default(),
            }),
            TickError::InvalidTiming { computation_time } => json!({
                "computation_time": computation_time.to_string(),
            }),
            TickError::Serialization(message) => json!({ "message": message }),
        }
    }
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Instability { violations } => {
                write!(f, "Simulation unstable: {} rule(s) violated", violations.len())
            }
            TickError::InvalidTiming { computation_time } => {
                write!(f, "Invalid computation time: {computation_time}")
            }
            TickError::Serialization(message) => write!(f, "Serialization failed: {message}"),
        }
    }
}

impl std::error::Error for TickError {}

/// Result of one [`RealTimeController::process_realtime_data`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// `false` only when an unrecovered failure escalated this tick.
    pub processed: bool,
    /// Stream-clock time of the tick (s).
    pub timestamp: f64,
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Timestep to use for the next tick (s).
    pub dt: f64,
    /// Stability score after this tick's check.
    pub stability_score: f64,
    /// Whether the host should continue.
    pub recommendation: Recommendation,
    /// Alerts fired by this tick.
    pub alerts_fired: usize,
    /// Subscribers the tick's frame was enqueued for.
    pub delivered: usize,
    /// Streaming state after fan-out.
    pub streaming_status: StreamingStatus,
}

/// One snapshot of everything the controller observes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Number of ticks processed.
    pub tick: u64,
    /// Whether the controller still accepts ticks.
    pub running: bool,
    /// Active performance mode.
    pub mode: PerformanceMode,
    /// Timestep with its bounds.
    pub timestep: TimestepState,
    /// Trailing stability score.
    pub stability_score: f64,
    /// Violations found by the last check.
    pub last_violations: Vec<StabilityViolation>,
    /// Profiler counters and phase statistics.
    pub performance: PerformanceSummary,
    /// Streaming state.
    pub streaming: StreamingStatus,
    /// Recent alerts, oldest first.
    pub recent_alerts: Vec<Alert>,
    /// Error recovery summary.
    pub errors: ErrorSummary,
    /// Latest host resource sample.
    pub host: HostReport,
    /// Result of the last tick, if any.
    pub last_result: Option<ProcessResult>,
}

/// Read access to the last published [`StatusReport`] from any thread.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusReport>>,
}

impl StatusHandle {
    /// Returns a copy of the last published report.
    pub fn read(&self) -> StatusReport {
        match self.inner.read() {
            Ok(report) => report.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Composes profiler, stability monitor, timestep controller, alerting,
/// recovery and streaming behind a single per-tick entry point.
pub struct RealTimeController {
    config: RealTimeConfig,
    mode: PerformanceMode,
    profiler: PerformanceProfiler,
    stability: NumericalStabilityMonitor,
    timestepper: AdaptiveTimestepper,
    alerts: AlertMonitor,
    optimizer: DataStreamOptimizer,
    streams: DataStreamManager,
    recovery: ErrorRecoverySystem,
    host: HostSampler,
    tick: u64,
    unrecovered: HashMap<ErrorKind, u32>,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<StatusReport>>,
    last_result: Option<ProcessResult>,
}

impl RealTimeController {
    /// Builds every component from `config` and applies its mode.
    pub fn new(config: RealTimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut recovery = ErrorRecoverySystem::new(config.recovery.clone())?;
        recovery.register_recovery_strategy(ErrorKind::Instability, timestep_backoff_strategy);

        let mut controller = Self {
            mode: config.mode,
            profiler: PerformanceProfiler::new(config.profiler_window),
            stability: NumericalStabilityMonitor::new(config.stability.clone())?,
            timestepper: AdaptiveTimestepper::new(config.timestep.clone())?,
            alerts: AlertMonitor::new(config.alerts.clone()),
            optimizer: DataStreamOptimizer::new(config.optimizer.clone())?,
            streams: DataStreamManager::new(config.stream.clone())?,
            recovery,
            host: HostSampler::new(Duration::from_millis(config.host_sample_interval_ms)),
            tick: 0,
            unrecovered: HashMap::new(),
            running: Arc::new(AtomicBool::new(true)),
            status: Arc::new(RwLock::new(StatusReport::default())),
            last_result: None,
            config,
        };
        controller.configure_performance_mode(controller.mode)?;
        Ok(controller)
    }

    /// Applies a named preset to the timestep bounds and streaming
    /// thresholds.
    ///
    /// Nothing changes if the resulting settings are inconsistent.
    pub fn configure_performance_mode(&mut self, mode: PerformanceMode) -> Result<(), ConfigError> {
        let settings = mode.settings(&self.config.baseline());

        let mut optimizer = self.optimizer.clone();
        optimizer.set_thresholds(settings.medium_fps_threshold, settings.high_fps_threshold)?;
        let mut timestepper = self.timestepper.clone();
        timestepper.set_bounds(settings.min_dt, settings.max_dt)?;

        self.optimizer = optimizer;
        self.timestepper = timestepper;
        self.mode = mode;
        log::info!(
            "RealTimeController: Mode '{}' (dt in [{}, {}], fps tiers {}/{})",
            mode,
            settings.min_dt,
            settings.max_dt,
            settings.medium_fps_threshold,
            settings.high_fps_threshold
        );
        self.publish_status();
        Ok(())
    }

    /// Parses a mode name and applies it.
    pub fn configure_performance_mode_by_name(&mut self, name: &str) -> Result<(), ConfigError> {
        self.configure_performance_mode(name.parse()?)
    }

    /// Processes one tick stamped with the stream clock.
    pub fn process_realtime_data(
        &mut self,
        state: &SimulationState,
        performance: &PerformanceData,
    ) -> ProcessResult {
        let timestamp = self.streams.now();
        self.process_realtime_data_at(state, performance, timestamp)
    }

    /// Processes one tick stamped with an explicit timestamp (s).
    pub fn process_realtime_data_at(
        &mut self,
        state: &SimulationState,
        performance: &PerformanceData,
        timestamp: f64,
    ) -> ProcessResult {
        let control_timer = Stopwatch::new();
        self.tick += 1;
        let tick = self.tick;
        let mut escalated = false;
        let mut failed = Vec::new();

        let computation_time = performance.computation_time;
        if computation_time.is_finite() && computation_time >= 0.0 {
            self.profiler.record_timing_secs("tick", computation_time);
        } else {
            escalated |= self.route(TickError::InvalidTiming { computation_time }, &mut failed);
        }
        self.profiler.increment_counter("ticks");

        let check = self.stability.check_stability(state);
        let stability_score = self.stability.get_stability_score();

        if check.is_stable {
            let target = performance
                .target_frame_time
                .unwrap_or(self.config.timestep.target_frame_time);
            self.timestepper
                .adapt_timestep(computation_time, target, performance.error_estimate);
        } else {
            self.profiler.increment_counter("unstable_ticks");
            escalated |= self.route(
                TickError::Instability {
                    violations: check.violations.clone(),
                },
                &mut failed,
            );
        }
        let dt = self.timestepper.dt();

        let mut payload = match state.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                escalated |= self.route(TickError::Serialization(e.to_string()), &mut failed);
                Map::new()
            }
        };
        payload.insert("tick".to_string(), json!(tick));
        payload.insert("dt".to_string(), json!(dt));
        payload.insert(
            "stability".to_string(),
            json!({ "score": stability_score, "is_stable": check.is_stable }),
        );
        if !check.violations.is_empty() {
            payload.insert(
                "violations".to_string(),
                serde_json::to_value(&check.violations).unwrap_or_default(),
            );
        }

        let alerts_fired = self.alerts.check_monitors(&payload, timestamp).len();

        let fps = self.effective_fps(performance);
        let metrics = performance.with_fps(fps);
        let reduced = {
            let _timer = ScopedTimer::new(&mut self.profiler, "optimize");
            self.optimizer.optimize_data_output(&payload, &metrics)
        };

        let delivered = {
            let _timer = ScopedTimer::new(&mut self.profiler, "stream");
            self.streams
                .stream_frame(TelemetryFrame::new(tick, timestamp, reduced))
        };

        // A clean tick breaks every run of failures it did not extend.
        self.unrecovered.retain(|kind, _| failed.contains(kind));

        let recommendation = if escalated {
            self.running.store(false, Ordering::SeqCst);
            Recommendation::Abort
        } else {
            Recommendation::Continue
        };

        self.profiler.record_timing("control", control_timer.elapsed());
        log::trace!(
            "RealTimeController: tick {} dt={:.6} score={:.2} fps={:.1} delivered={}",
            tick,
            dt,
            stability_score,
            fps,
            delivered
        );

        let result = ProcessResult {
            processed: !escalated,
            timestamp,
            tick,
            dt,
            stability_score,
            recommendation,
            alerts_fired,
            delivered,
            streaming_status: self.streams.status(),
        };
        self.last_result = Some(result.clone());
        self.publish_report(result.streaming_status.clone());
        result
    }

    /// Routes a failure raised outside the tick (for example by the host
    /// simulation) through the recovery registry and the escalation policy.
    pub fn report_error(&mut self, kind: impl Into<ErrorKind>, data: &Value) -> Recommendation {
        let context = json!({ "tick": self.tick, "dt": self.timestepper.dt() });
        let outcome = self.recovery.handle_error(kind, data, &context);
        let escalated = self.note_outcome(&outcome);
        if escalated {
            self.running.store(false, Ordering::SeqCst);
        }
        self.publish_status();
        if escalated {
            Recommendation::Abort
        } else {
            Recommendation::Continue
        }
    }

    fn route(&mut self, error: TickError, failed: &mut Vec<ErrorKind>) -> bool {
        let context = match &error {
            TickError::Instability { .. } => {
                let dt_before = self.timestepper.dt();
                self.timestepper.reduce_for_instability();
                json!({
                    "tick": self.tick,
                    "dt_before": dt_before,
                    "dt": self.timestepper.dt(),
                    "min_dt": self.timestepper.state().min_dt,
                })
            }
            _ => json!({ "tick": self.tick, "dt": self.timestepper.dt() }),
        };
        log::debug!("RealTimeController: tick {} {}", self.tick, error);
        let outcome = self.recovery.handle_error(error.kind(), &error.data(), &context);
        if !outcome.recovered {
            failed.push(outcome.kind.clone());
        }
        self.note_outcome(&outcome)
    }

    /// Updates the consecutive-failure count of the outcome's kind. Returns
    /// whether the escalation threshold was reached.
    fn note_outcome(&mut self, outcome: &RecoveryOutcome) -> bool {
        if outcome.recovered {
            self.unrecovered.remove(&outcome.kind);
            return false;
        }
        let count = self.unrecovered.entry(outcome.kind.clone()).or_insert(0);
        *count += 1;
        if outcome.kind.is_fatal() || *count >= self.config.escalation_threshold {
            log::error!(
                "RealTimeController: '{}' unrecovered {} time(s) in a row, aborting",
                outcome.kind,
                count
            );
            true
        } else {
            false
        }
    }

    fn effective_fps(&self, performance: &PerformanceData) -> f64 {
        let positive = |v: &f64| v.is_finite() && *v > 0.0;
        performance
            .fps
            .filter(positive)
            .or_else(|| {
                self.profiler
                    .average("tick")
                    .filter(positive)
                    .map(|avg| 1.0 / avg)
            })
            .unwrap_or_else(|| {
                let target = performance
                    .target_frame_time
                    .filter(positive)
                    .unwrap_or(self.config.timestep.target_frame_time);
                1.0 / target
            })
    }

    fn publish_status(&mut self) {
        let streaming = self.streams.status();
        self.publish_report(streaming);
    }

    fn publish_report(&mut self, streaming: StreamingStatus) {
        let report = StatusReport {
            tick: self.tick,
            running: self.is_running(),
            mode: self.mode,
            timestep: self.timestepper.state(),
            stability_score: self.stability.get_stability_score(),
            last_violations: self.stability.last_violations().to_vec(),
            performance: self.profiler.get_performance_summary(),
            streaming,
            recent_alerts: self.alerts.get_recent_alerts(),
            errors: self.recovery.get_error_summary(),
            host: self.host.sample(),
            last_result: self.last_result.clone(),
        };
        match self.status.write() {
            Ok(mut slot) => *slot = report,
            Err(poisoned) => *poisoned.into_inner() = report,
        }
    }

    /// Returns the last published status report.
    pub fn get_status_report(&self) -> StatusReport {
        self.status_handle().read()
    }

    /// Returns a reader of the published status usable from other threads.
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            inner: Arc::clone(&self.status),
        }
    }

    /// Returns the profiler summary.
    pub fn get_performance_report(&self) -> PerformanceSummary {
        self.profiler.get_performance_summary()
    }

    /// Returns the recent alert log.
    pub fn get_recent_alerts(&self) -> Vec<Alert> {
        self.alerts.get_recent_alerts()
    }

    /// Returns the recovery summary.
    pub fn get_error_summary(&self) -> ErrorSummary {
        self.recovery.get_error_summary()
    }

    /// Returns the bus every recovery outcome is published on.
    pub fn recovery_events(&self) -> &EventBus<RecoveryOutcome> {
        self.recovery.events()
    }

    /// Registers a channel subscriber.
    pub fn add_subscriber(
        &self,
        id: Option<SubscriberId>,
        rate_hz: f64,
    ) -> Result<Subscription, ConfigError> {
        self.streams.add_subscriber(id, rate_hz)
    }

    /// Registers a callback subscriber with its own delivery thread.
    pub fn add_callback_subscriber<F>(
        &self,
        id: Option<SubscriberId>,
        rate_hz: f64,
        callback: F,
    ) -> Result<SubscriberId, ConfigError>
    where
        F: Fn(&TelemetryFrame) -> anyhow::Result<()> + Send + 'static,
    {
        self.streams.add_callback_subscriber(id, rate_hz, callback)
    }

    /// Deregisters a subscriber. Returns `false` for an unknown id.
    pub fn remove_subscriber(&self, id: &SubscriberId) -> bool {
        self.streams.remove_subscriber(id)
    }

    /// Returns a handle on the stream manager, shareable across threads.
    pub fn streams(&self) -> DataStreamManager {
        self.streams.clone()
    }

    /// Registers an alert rule.
    pub fn add_monitor(
        &mut self,
        name: &str,
        field: &str,
        threshold: f64,
        comparator: Comparator,
        severity: Severity,
    ) {
        self.alerts
            .add_monitor(name, field, threshold, comparator, severity);
    }

    /// Removes an alert rule.
    pub fn remove_monitor(&mut self, name: &str) -> bool {
        self.alerts.remove_monitor(name)
    }

    /// Registers a recovery strategy, replacing any existing one for the
    /// kind.
    pub fn register_recovery_strategy<F>(&mut self, kind: impl Into<ErrorKind>, strategy: F)
    where
        F: Fn(&ErrorKind, &Value, &Value) -> anyhow::Result<StrategyResult> + Send + Sync + 'static,
    {
        self.recovery.register_recovery_strategy(kind, strategy);
    }

    /// Returns the alert monitor.
    pub fn alerts(&self) -> &AlertMonitor {
        &self.alerts
    }

    /// Returns the timestep to use for the next tick.
    pub fn dt(&self) -> f64 {
        self.timestepper.dt()
    }

    /// Returns the timestep with its bounds.
    pub fn timestep_state(&self) -> TimestepState {
        self.timestepper.state()
    }

    /// Returns the frame budget ticks are measured against.
    pub fn target_frame_time(&self) -> f64 {
        self.config.timestep.target_frame_time
    }

    /// Returns the active mode.
    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// Returns the number of ticks processed.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Whether the controller has not been stopped or escalated.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the shared running flag, cleared on stop or escalation.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Clears the running flag.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        log::info!("RealTimeController: Stopped at tick {}", self.tick);
        self.publish_status();
    }

    /// Sets the running flag again and forgets past escalation counts.
    pub fn resume(&mut self) {
        self.unrecovered.clear();
        self.running.store(true, Ordering::SeqCst);
        log::info!("RealTimeController: Resumed at tick {}", self.tick);
        self.publish_status();
    }
}

impl fmt::Debug for RealTimeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealTimeController")
            .field("mode", &self.mode)
            .field("tick", &self.tick)
            .field("dt", &self.timestepper.dt())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestep::TimestepConfig;
    use kpp_core::BodyRecord;

    fn calm_state(t: f64) -> SimulationState {
        SimulationState::new(t)
            .with_chain_velocity(1.2)
            .with_chain_acceleration(0.3)
            .with_power(850.0)
            .with_efficiency(0.38)
            .with_force("buoyancy", 1800.0)
            .with_body(BodyRecord::new(0, 0.5, 1.2))
    }

    fn runaway_state(t: f64) -> SimulationState {
        SimulationState::new(t).with_chain_velocity(40.0)
    }

    fn pinned_config() -> RealTimeConfig {
        RealTimeConfig {
            timestep: TimestepConfig {
                initial_dt: 0.001,
                min_dt: 0.001,
                max_dt: 0.05,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_stable_tick_is_processed_and_streamed() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let sub = controller.add_subscriber(Some("ui".into()), 30.0).unwrap();

        let perf = PerformanceData::new(0.01).with_fps(30.0);
        let result = controller.process_realtime_data_at(&calm_state(0.0), &perf, 0.0);

        assert!(result.processed);
        assert_eq!(result.recommendation, Recommendation::Continue);
        assert_eq!(result.tick, 1);
        assert_eq!(result.delivered, 1);
        assert_eq!(result.stability_score, 1.0);

        let frame = sub.try_recv().unwrap();
        assert_eq!(frame.tick, 1);
        assert_eq!(frame.payload["tick"], 1);
        assert_eq!(frame.payload["_metadata"]["level"], "full");
        assert!(frame.payload.contains_key("stability"));
    }

    #[test]
    fn test_fps_falls_back_to_profiler_average() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let sub = controller.add_subscriber(None, 100.0).unwrap();

        controller.process_realtime_data_at(&calm_state(0.0), &PerformanceData::new(0.2), 0.0);
        let frame = sub.try_recv().unwrap();
        assert_eq!(frame.payload["_metadata"]["level"], "minimal");
        assert_eq!(frame.payload["_metadata"]["fps"], 5.0);
        assert!(!frame.payload.contains_key("bodies"));
    }

    #[test]
    fn test_instability_recovers_while_dt_has_headroom() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let dt_before = controller.dt();
        let perf = PerformanceData::new(0.01);

        let result = controller.process_realtime_data_at(&runaway_state(0.0), &perf, 0.0);
        assert!(result.processed);
        assert!(result.dt < dt_before);
        assert!(result.stability_score < 1.0);

        let summary = controller.get_error_summary();
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.recovery_successful, 1);
    }

    #[test]
    fn test_three_unrecovered_instabilities_abort() {
        let mut controller = RealTimeController::new(pinned_config()).unwrap();
        let perf = PerformanceData::new(0.01);

        for k in 0..2 {
            let t = k as f64;
            let result = controller.process_realtime_data_at(&runaway_state(t), &perf, t);
            assert!(result.processed);
            assert_eq!(result.recommendation, Recommendation::Continue);
        }
        let result = controller.process_realtime_data_at(&runaway_state(2.0), &perf, 2.0);
        assert!(!result.processed);
        assert_eq!(result.recommendation, Recommendation::Abort);
        assert!(!controller.is_running());
        assert!(!controller.get_status_report().running);
    }

    #[test]
    fn test_recovered_error_resets_escalation_count() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let data = json!({});
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Continue);
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Continue);

        controller.register_recovery_strategy("flaky", |_, _, _| {
            Ok(StrategyResult::recovered("retry", "worked"))
        });
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Continue);

        controller.register_recovery_strategy("flaky", |_, _, _| {
            Ok(StrategyResult::failed("retry", "still broken"))
        });
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Continue);
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Continue);
        assert_eq!(controller.report_error("flaky", &data), Recommendation::Abort);
        assert!(!controller.is_running());

        controller.resume();
        assert!(controller.is_running());
    }

    #[test]
    fn test_failures_separated_by_clean_ticks_never_escalate() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let clean = PerformanceData::new(0.01);
        let broken = PerformanceData::new(f64::NAN);

        for k in 0..40u64 {
            let perf = if k % 10 == 0 { &broken } else { &clean };
            let t = k as f64 * 0.01;
            let result = controller.process_realtime_data_at(&calm_state(t), perf, t);
            assert!(result.processed, "tick {} aborted", result.tick);
        }
        assert!(controller.is_running());
        assert_eq!(controller.get_error_summary().by_kind["invalid_timing"].total, 4);
    }

    #[test]
    fn test_back_to_back_failures_still_escalate() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let broken = PerformanceData::new(f64::NAN);
        let results: Vec<bool> = (0..3)
            .map(|k| {
                controller
                    .process_realtime_data_at(&calm_state(k as f64), &broken, k as f64)
                    .processed
            })
            .collect();
        assert_eq!(results, vec![true, true, false]);
    }

    #[test]
    fn test_recovery_outcomes_reach_observers() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let outcomes = controller.recovery_events().subscribe();

        controller.process_realtime_data_at(&runaway_state(0.0), &PerformanceData::new(0.01), 0.0);
        controller.report_error("flaky", &Value::Null);

        let seen: Vec<(String, bool)> = outcomes
            .try_iter()
            .map(|o| (o.kind.to_string(), o.recovered))
            .collect();
        assert_eq!(
            seen,
            vec![("instability".to_string(), true), ("flaky".to_string(), false)]
        );
    }

    #[test]
    fn test_configuration_error_escalates_immediately() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        assert_eq!(
            controller.report_error(ErrorKind::Configuration, &Value::Null),
            Recommendation::Abort
        );
    }

    #[test]
    fn test_invalid_timing_is_routed() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let dt = controller.dt();
        let perf = PerformanceData::new(f64::NAN);
        let result = controller.process_realtime_data_at(&calm_state(0.0), &perf, 0.0);
        assert!(result.processed);
        assert_eq!(result.dt, dt);
        assert_eq!(controller.get_error_summary().by_kind["invalid_timing"].total, 1);
    }

    #[test]
    fn test_alerts_fire_and_reach_status() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        controller.add_monitor("low_power", "power", 1000.0, Comparator::Less, Severity::Warning);
        controller.add_monitor(
            "buoyancy",
            "forces.buoyancy",
            1000.0,
            Comparator::Greater,
            Severity::Info,
        );

        let result =
            controller.process_realtime_data_at(&calm_state(0.0), &PerformanceData::new(0.01), 0.0);
        assert_eq!(result.alerts_fired, 2);
        assert_eq!(controller.get_status_report().recent_alerts.len(), 2);
        assert!(controller.remove_monitor("low_power"));
    }

    #[test]
    fn test_performance_modes_adjust_bounds() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let balanced = controller.timestep_state();

        controller
            .configure_performance_mode(PerformanceMode::Performance)
            .unwrap();
        assert!(controller.timestep_state().max_dt > balanced.max_dt);

        controller.configure_performance_mode_by_name("fidelity").unwrap();
        assert!(controller.timestep_state().max_dt < balanced.max_dt);
        assert_eq!(controller.mode(), PerformanceMode::Fidelity);
        assert!(controller.dt() <= controller.timestep_state().max_dt);

        assert!(matches!(
            controller.configure_performance_mode_by_name("warp"),
            Err(ConfigError::UnknownMode(_))
        ));
        assert_eq!(controller.mode(), PerformanceMode::Fidelity);
    }

    #[test]
    fn test_status_handle_reads_from_other_thread() {
        let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let handle = controller.status_handle();
        for k in 0..5 {
            controller.process_realtime_data_at(
                &calm_state(k as f64 * 0.01),
                &PerformanceData::new(0.01),
                k as f64 * 0.01,
            );
        }
        let report = std::thread::spawn(move || handle.read()).join().unwrap();
        assert_eq!(report.tick, 5);
        assert_eq!(report.performance.counters["ticks"], 5);
        assert_eq!(
            report.last_result.as_ref().map(|r| &r.streaming_status),
            Some(&report.streaming)
        );
        assert_eq!(report.last_result.map(|r| r.tick), Some(5));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RealTimeConfig {
            escalation_threshold: 0,
            ..Default::default()
        };
        assert!(RealTimeController::new(config).is_err());
    }
}
