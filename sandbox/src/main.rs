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


//! Drives a toy oscillating chain through the real-time loop and prints the
//! final status report.

use anyhow::{Context, Result};
use clap::Parser;
use kpp_control::{LoopConfig, RealTimeConfig, RealTimeController, RealTimeLoop, Simulation};
use kpp_core::{BodyRecord, Comparator, Severity, SimulationState};
use serde_json::Value;
use std::f64::consts::TAU;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sandbox",
    version,
    about = "Run a toy chain simulation under the real-time controller"
)]
struct Args {
    /// Number of ticks to run
    #[arg(long, default_value_t = 300)]
    ticks: u64,
    /// Performance mode: performance, balanced or fidelity
    #[arg(long, default_value = "balanced")]
    mode: String,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Rate of the console subscriber (Hz)
    #[arg(long, default_value_t = 10.0)]
    rate: f64,
    /// Run as fast as possible instead of pacing to the frame budget
    #[arg(long)]
    unpaced: bool,
}

/// A closed chain of floaters whose speed oscillates around a cruise value.
struct OscillatingChain {
    time: f64,
    bodies: u32,
    loop_length: f64,
    position: f64,
    velocity: f64,
    acceleration: f64,
}

impl OscillatingChain {
    const CRUISE_SPEED: f64 = 1.8;
    const SWING: f64 = 0.6;
    const PERIOD: f64 = 8.0;
    const BUOYANCY: f64 = 5200.0;
    const DRAG_COEFFICIENT: f64 = 140.0;

    fn new(bodies: u32) -> Self {
        Self {
            time: 0.0,
            bodies: bodies.max(1),
            loop_length: 24.0,
            position: 0.0,
            velocity: Self::CRUISE_SPEED,
            acceleration: 0.0,
        }
    }
}

impl Simulation for OscillatingChain {
    fn step(&mut self, dt: f64) -> Result<SimulationState> {
        self.time += dt;
        let velocity = Self::CRUISE_SPEED + Self::SWING * (TAU * self.time / Self::PERIOD).sin();
        self.acceleration = (velocity - self.velocity) / dt;
        self.velocity = velocity;
        self.position = (self.position + velocity * dt).rem_euclid(self.loop_length);

        let drag = -Self::DRAG_COEFFICIENT * velocity * velocity;
        let power = (Self::BUOYANCY + drag) * velocity;
        let efficiency = (power / (Self::BUOYANCY * velocity)).clamp(0.0, 1.0);

        let spacing = self.loop_length / self.bodies as f64;
        let mut state = SimulationState::new(self.time)
            .with_chain_velocity(velocity)
            .with_chain_acceleration(self.acceleration)
            .with_power(power)
            .with_efficiency(efficiency)
            .with_force("buoyancy", Self::BUOYANCY)
            .with_force("drag", drag)
            .with_metric("position", self.position);
        for id in 0..self.bodies {
            let position = (self.position + id as f64 * spacing).rem_euclid(self.loop_length);
            state = state.with_body(BodyRecord::new(id, position, velocity));
        }
        Ok(state)
    }

    fn error_estimate(&self) -> Option<f64> {
        Some((self.acceleration * 1e-3).abs())
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RealTimeConfig::from_file(path)?,
        None => RealTimeConfig::default(),
    };
    config.mode = args.mode.parse()?;

    let mut controller = RealTimeController::new(config)?;
    controller.add_monitor(
        "overspeed",
        "v_chain",
        2.3,
        Comparator::Greater,
        Severity::Warning,
    );
    controller.add_monitor(
        "low_efficiency",
        "efficiency",
        0.5,
        Comparator::Less,
        Severity::Info,
    );

    let recoveries = controller.recovery_events().subscribe();
    let console = controller.add_subscriber(Some("console".into()), args.rate)?;
    controller.add_callback_subscriber(Some("power_log".into()), 1.0, |frame| {
        if let Some(power) = frame.payload.get("power").and_then(Value::as_f64) {
            log::info!(
                "Sandbox: tick {} t={:.2}s power={:.1} W",
                frame.tick,
                frame.timestamp,
                power
            );
        }
        Ok(())
    })?;

    let mut rt = RealTimeLoop::new(
        controller,
        Box::new(OscillatingChain::new(8)),
        LoopConfig {
            max_ticks: Some(args.ticks),
            pace: !args.unpaced,
        },
    );
    rt.start();
    let outcome = rt.join().context("real-time loop thread panicked")?;

    let frames = console.drain();
    log::info!(
        "Sandbox: {} ticks, console subscriber holds {} frame(s)",
        outcome.ticks,
        frames.len()
    );
    for recovery in recoveries.try_iter() {
        log::info!(
            "Sandbox: recovery of '{}' -> {} ({})",
            recovery.kind,
            recovery.action,
            if recovery.recovered { "recovered" } else { "failed" }
        );
    }

    let status = outcome.controller.get_status_report();
    println!("{}", serde_json::to_string_pretty(&status)?);
    outcome.controller.streams().clear();
    Ok(())
}
