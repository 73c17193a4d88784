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

//! Cooperative real-time tick loop.

use crate::controller::{RealTimeController, Recommendation, StatusHandle};
use kpp_core::{ErrorKind, PerformanceData, SimulationState, Stopwatch};
use kpp_telemetry::DataStreamManager;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The host simulation driven by a [`RealTimeLoop`].
pub trait Simulation: Send {
    /// Advances the simulation by `dt` seconds and returns its new state.
    fn step(&mut self, dt: f64) -> anyhow::Result<SimulationState>;

    /// Integration error of the last step, if the simulation estimates one.
    fn error_estimate(&self) -> Option<f64> {
        None
    }
}

/// Configuration for the [`RealTimeLoop`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
    /// Sleep out the remainder of each frame budget.
    pub pace: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_ticks: None,
            pace: true,
        }
    }
}

/// Everything the loop thread hands back once it ends.
pub struct LoopOutcome {
    /// The controller, with its full history.
    pub controller: RealTimeController,
    /// The simulation in its final state.
    pub simulation: Box<dyn Simulation>,
    /// Ticks executed by the loop.
    pub ticks: u64,
}

/// Runs a [`Simulation`] through a [`RealTimeController`] on a dedicated
/// thread.
///
/// The stop flag is only checked between ticks. The loop also ends when the
/// controller recommends aborting or `max_ticks` is reached. Dropping the
/// loop stops it.
pub struct RealTimeLoop {
    config: LoopConfig,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    status: StatusHandle,
    streams: DataStreamManager,
    pending: Option<(RealTimeController, Box<dyn Simulation>)>,
    handle: Option<thread::JoinHandle<LoopOutcome>>,
}

impl RealTimeLoop {
    /// Prepares a loop without starting it.
    pub fn new(
        controller: RealTimeController,
        simulation: Box<dyn Simulation>,
        config: LoopConfig,
    ) -> Self {
        Self {
            config,
            running: controller.running_flag(),
            ticks: Arc::new(AtomicU64::new(0)),
            status: controller.status_handle(),
            streams: controller.streams(),
            pending: Some((controller, simulation)),
            handle: None,
        }
    }

    /// Starts the loop thread. Calling it again has no effect.
    pub fn start(&mut self) {
        let Some((mut controller, mut simulation)) = self.pending.take() else {
            return;
        };

        controller.resume();
        let running = Arc::clone(&self.running);
        let ticks = Arc::clone(&self.ticks);
        let config = self.config.clone();
        let budget = Duration::from_secs_f64(controller.target_frame_time());

        let handle = thread::spawn(move || {
            log::info!("RealTimeLoop: Thread started.");

            while running.load(Ordering::Relaxed) {
                let done = ticks.load(Ordering::Relaxed);
                if config.max_ticks.is_some_and(|max| done >= max) {
                    break;
                }

                let stopwatch = Stopwatch::new();
                let dt = controller.dt();
                let recommendation = match simulation.step(dt) {
                    Ok(state) => {
                        let mut performance = PerformanceData::new(stopwatch.elapsed_secs_f64())
                            .with_target_frame_time(controller.target_frame_time());
                        if let Some(error) = simulation.error_estimate() {
                            performance = performance.with_error_estimate(error);
                        }
                        controller
                            .process_realtime_data(&state, &performance)
                            .recommendation
                    }
                    Err(e) => {
                        log::warn!("RealTimeLoop: Simulation step failed: {e:#}");
                        controller.report_error(
                            ErrorKind::Custom("simulation_step".to_string()),
                            &json!({ "error": format!("{e:#}"), "dt": dt }),
                        )
                    }
                };
                ticks.fetch_add(1, Ordering::Relaxed);

                if recommendation == Recommendation::Abort {
                    log::error!("RealTimeLoop: Controller recommended abort.");
                    break;
                }

                if config.pace {
                    let elapsed = stopwatch.elapsed();
                    if elapsed < budget {
                        thread::sleep(budget - elapsed);
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            log::info!("RealTimeLoop: Thread stopped.");
            LoopOutcome {
                controller,
                simulation,
                ticks: ticks.load(Ordering::Relaxed),
            }
        });

        self.handle = Some(handle);
    }

    /// Whether the loop thread is still ticking.
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// Number of ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Last status published by the controller.
    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Stream manager of the controller, for adding or removing subscribers
    /// while the loop runs.
    pub fn streams(&self) -> DataStreamManager {
        self.streams.clone()
    }

    /// Requests a stop and waits for the thread to finish its current tick.
    pub fn stop(&mut self) -> Option<LoopOutcome> {
        self.running.store(false, Ordering::SeqCst);
        self.join()
    }

    /// Waits for the loop to end on its own.
    pub fn join(&mut self) -> Option<LoopOutcome> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                log::error!("RealTimeLoop: Thread panicked.");
                None
            }
        }
    }
}

impl Drop for RealTimeLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealTimeConfig;

    struct Drift {
        time: f64,
        velocity: f64,
        fail_every: Option<u64>,
        steps: u64,
    }

    impl Drift {
        fn new(velocity: f64) -> Self {
            Self {
                time: 0.0,
                velocity,
                fail_every: None,
                steps: 0,
            }
        }
    }

    impl Simulation for Drift {
        fn step(&mut self, dt: f64) -> anyhow::Result<SimulationState> {
            self.steps += 1;
            if self.fail_every.is_some_and(|n| self.steps % n == 0) {
                anyhow::bail!("solver diverged at step {}", self.steps);
            }
            self.time += dt;
            Ok(SimulationState::new(self.time).with_chain_velocity(self.velocity))
        }
    }

    fn unpaced(max_ticks: u64) -> LoopConfig {
        LoopConfig {
            max_ticks: Some(max_ticks),
            pace: false,
        }
    }

    #[test]
    fn test_loop_runs_to_max_ticks() {
        let controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let mut rt = RealTimeLoop::new(controller, Box::new(Drift::new(1.0)), unpaced(25));
        rt.start();
        let outcome = rt.join().unwrap();
        assert_eq!(outcome.ticks, 25);
        assert_eq!(outcome.controller.tick(), 25);
        assert_eq!(rt.status().read().tick, 25);
        assert!(!rt.is_running());
    }

    #[test]
    fn test_abort_recommendation_ends_loop() {
        let controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let mut sim = Drift::new(1.0);
        sim.fail_every = Some(1);
        let mut rt = RealTimeLoop::new(controller, Box::new(sim), unpaced(100));
        rt.start();
        let outcome = rt.join().unwrap();
        assert_eq!(outcome.ticks, 3);
        let summary = outcome.controller.get_error_summary();
        assert_eq!(summary.by_kind["simulation_step"].total, 3);
        assert!(!outcome.controller.is_running());
    }

    #[test]
    fn test_stop_is_cooperative() {
        let controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let simulation = Box::new(Drift::new(1.0));
        let mut rt = RealTimeLoop::new(controller, simulation, LoopConfig::default());
        rt.start();
        assert!(rt.is_running());
        thread::sleep(Duration::from_millis(50));
        let outcome = rt.stop().unwrap();
        assert!(outcome.ticks >= 1);
        assert_eq!(outcome.controller.tick(), outcome.ticks);
    }

    #[test]
    fn test_subscribers_attach_while_running() {
        let controller = RealTimeController::new(RealTimeConfig::default()).unwrap();
        let simulation = Box::new(Drift::new(1.0));
        let mut rt = RealTimeLoop::new(controller, simulation, LoopConfig::default());
        let sub = rt.streams().add_subscriber(Some("late".into()), 1000.0).unwrap();
        rt.start();
        let frame = sub.recv_timeout(Duration::from_secs(2));
        rt.stop();
        assert!(frame.is_some());
    }
}
