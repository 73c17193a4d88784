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


use approx::assert_relative_eq;
use kpp_control::{
    AdaptiveTimestepper, ErrorRecoverySystem, NumericalStabilityMonitor, PerformanceMode,
    RealTimeConfig, RealTimeController, Recommendation, StrategyResult,
};
use kpp_core::{BodyRecord, PerformanceData, SimulationState};
use serde_json::json;
use std::time::Duration;

fn chain(t: f64) -> SimulationState {
    let v = 1.5 + (t * 2.0).sin() * 0.3;
    SimulationState::new(t)
        .with_chain_velocity(v)
        .with_chain_acceleration(0.6 * (t * 2.0).cos())
        .with_power(v * 900.0)
        .with_efficiency(0.42)
        .with_force("buoyancy", 2400.0)
        .with_force("drag", -310.0)
        .with_body(BodyRecord::new(0, 0.0, v))
        .with_body(BodyRecord::new(1, 1.0, v))
}

#[test]
fn test_slow_tick_never_shrinks_dt() {
    let mut stepper = AdaptiveTimestepper::with_bounds(0.1, 0.01, 0.5).unwrap();
    let before = stepper.dt();
    let dt = stepper.adapt_timestep(0.15, 0.1, None);
    assert!((0.1..=0.5).contains(&dt));
    assert!(dt >= before || dt == 0.5);
}

#[test]
fn test_breaching_state_reports_three_violations() {
    let mut monitor = NumericalStabilityMonitor::default();
    let state = SimulationState::new(0.0)
        .with_chain_velocity(15.0)
        .with_chain_acceleration(60.0)
        .with_force("buoyancy", 200000.0);
    let check = monitor.check_stability(&state);
    assert!(!check.is_stable);
    assert_eq!(check.violations.len(), 3);
}

#[test]
fn test_recovery_summary_counts_success() {
    let mut registry = ErrorRecoverySystem::default();
    registry.register_recovery_strategy("test_error", |_, _, _| {
        Ok(StrategyResult::recovered("noop", "handled"))
    });
    let outcome = registry.handle_error("test_error", &json!({"code": 7}), &json!({"tick": 1}));
    assert!(outcome.recovered);
    let summary = registry.get_error_summary();
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.recovery_successful, 1);
}

#[test]
fn test_subscriber_rates_through_controller() {
    let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
    let fast = controller.add_subscriber(Some("fast".into()), 20.0).unwrap();
    let slow = controller.add_subscriber(Some("slow".into()), 5.0).unwrap();

    // One simulated second at 100 Hz.
    for k in 0..100u64 {
        let t = k as f64 * 0.01;
        let perf = PerformanceData::new(0.002).with_fps(60.0);
        let result = controller.process_realtime_data_at(&chain(t), &perf, t);
        assert!(result.processed);
    }

    let fast_count = fast.drain().len() as f64;
    let slow_count = slow.drain().len() as f64;
    assert_relative_eq!(fast_count / slow_count, 4.0, epsilon = 0.5);
}

#[test]
fn test_callback_subscriber_through_controller() {
    let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    controller
        .add_callback_subscriber(None, 50.0, move |frame| {
            tx.send(frame.payload.contains_key("_metadata"))?;
            Ok(())
        })
        .unwrap();

    controller.process_realtime_data_at(&chain(0.0), &PerformanceData::new(0.01), 0.0);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).ok(), Some(true));
    controller.streams().clear();
}

#[test]
fn test_runaway_simulation_escalates_after_dt_is_exhausted() {
    let mut controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
    let runaway = SimulationState::new(0.0).with_chain_velocity(80.0);
    let perf = PerformanceData::new(0.01);

    let mut ticks = 0;
    let mut last = None;
    while ticks < 50 {
        ticks += 1;
        let result = controller.process_realtime_data_at(&runaway, &perf, ticks as f64);
        if result.recommendation == Recommendation::Abort {
            last = Some(result);
            break;
        }
    }

    let last = last.unwrap();
    assert!(!last.processed);
    assert_eq!(last.dt, controller.timestep_state().min_dt);
    assert_eq!(last.stability_score, 0.0);
    // 0.01 halves four times to reach 0.001, then three failures escalate.
    assert_eq!(ticks, 7);
    let summary = controller.get_error_summary();
    assert_eq!(summary.recovery_successful, 4);
    assert_eq!(summary.total_errors, 7);
}

#[test]
fn test_config_document_drives_controller() {
    let config = RealTimeConfig::from_json(
        r#"{
            "mode": "performance",
            "timestep": { "initial_dt": 0.02 },
            "optimizer": { "medium_fps_threshold": 4.0, "high_fps_threshold": 10.0 }
        }"#,
    )
    .unwrap();
    let controller = RealTimeController::new(config).unwrap();
    assert_eq!(controller.mode(), PerformanceMode::Performance);
    assert_eq!(controller.dt(), 0.02);
    assert_relative_eq!(controller.timestep_state().max_dt, 0.1);

    let status = controller.get_status_report();
    assert_eq!(status.mode, PerformanceMode::Performance);
    assert_eq!(status.tick, 0);
    assert!(status.running);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["mode"], "performance");
}
