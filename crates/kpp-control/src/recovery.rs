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

//! Error recovery registry.
//!
//! Maps an [`ErrorKind`] to at most one [`RecoveryStrategy`]. Handling an
//! error never fails: a missing strategy, a strategy returning an error and a
//! strategy that panics all come back as an unrecovered [`RecoveryOutcome`].

use kpp_core::{ConfigError, ErrorKind, EventBus, Stopwatch, EQUALITY_TOLERANCE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What a strategy reports back after attempting a recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    /// Whether the strategy considers the error recovered.
    pub success: bool,
    /// Short name of the action taken.
    pub action: String,
    /// Human-readable detail.
    pub message: String,
}

impl StrategyResult {
    /// A successful recovery.
    pub fn recovered(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: action.into(),
            message: message.into(),
        }
    }

    /// A recovery attempt that did not succeed.
    pub fn failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            action: action.into(),
            message: message.into(),
        }
    }
}

/// A recovery procedure for one kind of error.
///
/// Implemented for every `Fn(&ErrorKind, &Value, &Value) -> anyhow::Result<StrategyResult>`
/// closure, so most strategies are plain closures or functions.
pub trait RecoveryStrategy: Send + Sync {
    /// Attempts to recover from an error described by `data`, given the
    /// caller's `context`.
    fn recover(&self, kind: &ErrorKind, data: &Value, context: &Value)
        -> anyhow::Result<StrategyResult>;
}

impl<F> RecoveryStrategy for F
where
    F: Fn(&ErrorKind, &Value, &Value) -> anyhow::Result<StrategyResult> + Send + Sync,
{
    fn recover(
        &self,
        kind: &ErrorKind,
        data: &Value,
        context: &Value,
    ) -> anyhow::Result<StrategyResult> {
        self(kind, data, context)
    }
}

/// The recorded result of handling one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    /// Kind of the handled error.
    pub kind: ErrorKind,
    /// Whether the error was recovered.
    pub recovered: bool,
    /// Action reported by the strategy, `"none"` if there was no strategy.
    pub action: String,
    /// Detail reported by the strategy or by the registry.
    pub message: String,
}

/// One entry of the error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Position in the sequence of handled errors, starting at 1.
    pub sequence: u64,
    /// Seconds since the registry was created.
    pub timestamp: f64,
    /// The error payload as supplied by the caller.
    pub data: Value,
    /// The outcome.
    pub outcome: RecoveryOutcome,
}

/// Per-kind error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Errors of this kind handled.
    pub total: u64,
    /// Errors of this kind recovered.
    pub recovered: u64,
}

/// Aggregate view of everything the registry has handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Errors handled since creation.
    pub total_errors: u64,
    /// Errors a strategy reported as recovered.
    pub recovery_successful: u64,
    /// `recovery_successful / total_errors`, `1.0` with no errors.
    pub recovery_rate: f64,
    /// Counters keyed by error kind name.
    pub by_kind: BTreeMap<String, KindCounts>,
    /// The most recent outcome, if any.
    pub last_outcome: Option<RecoveryOutcome>,
}

/// Configuration of the [`ErrorRecoverySystem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Number of records kept in the history (oldest dropped).
    pub history_capacity: usize,
    /// Capacity of the outcome event bus.
    pub event_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            event_capacity: EventBus::<RecoveryOutcome>::DEFAULT_CAPACITY,
        }
    }
}

impl RecoveryConfig {
    /// Checks both capacities are at least one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_capacity("history_capacity", self.history_capacity)?;
        ConfigError::require_capacity("event_capacity", self.event_capacity)
    }
}

/// Registry of recovery strategies with an append-only, bounded history.
pub struct ErrorRecoverySystem {
    strategies: HashMap<ErrorKind, Arc<dyn RecoveryStrategy>>,
    history: VecDeque<RecoveryRecord>,
    history_capacity: usize,
    total_errors: u64,
    recovery_successful: u64,
    by_kind: BTreeMap<String, KindCounts>,
    last_outcome: Option<RecoveryOutcome>,
    events: EventBus<RecoveryOutcome>,
    clock: Stopwatch,
}

impl ErrorRecoverySystem {
    /// Creates an empty registry.
    pub fn new(config: RecoveryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            strategies: HashMap::new(),
            history: VecDeque::with_capacity(config.history_capacity.min(64)),
            history_capacity: config.history_capacity,
            total_errors: 0,
            recovery_successful: 0,
            by_kind: BTreeMap::new(),
            last_outcome: None,
            events: EventBus::bounded(config.event_capacity),
            clock: Stopwatch::new(),
        })
    }

    /// Registers a closure as the strategy for `kind`. An existing strategy
    /// for the same kind is replaced.
    pub fn register_recovery_strategy<F>(&mut self, kind: impl Into<ErrorKind>, strategy: F)
    where
        F: Fn(&ErrorKind, &Value, &Value) -> anyhow::Result<StrategyResult> + Send + Sync + 'static,
    {
        self.register_strategy(kind, strategy);
    }

    /// Registers any [`RecoveryStrategy`] implementation for `kind`, with the
    /// same replace-on-conflict policy.
    pub fn register_strategy<S>(&mut self, kind: impl Into<ErrorKind>, strategy: S)
    where
        S: RecoveryStrategy + 'static,
    {
        let kind = kind.into();
        if self.strategies.insert(kind.clone(), Arc::new(strategy)).is_some() {
            log::warn!("ErrorRecovery: Strategy for '{}' replaced", kind);
        } else {
            log::debug!("ErrorRecovery: Strategy registered for '{}'", kind);
        }
    }

    /// Removes the strategy for `kind`, returning whether one existed.
    pub fn unregister_recovery_strategy(&mut self, kind: &ErrorKind) -> bool {
        self.strategies.remove(kind).is_some()
    }

    /// Whether a strategy is registered for `kind`.
    pub fn has_strategy(&self, kind: &ErrorKind) -> bool {
        self.strategies.contains_key(kind)
    }

    /// Runs the strategy registered for `kind` and records the outcome.
    pub fn handle_error(
        &mut self,
        kind: impl Into<ErrorKind>,
        data: &Value,
        context: &Value,
    ) -> RecoveryOutcome {
        let kind = kind.into();
        let outcome = match self.strategies.get(&kind).cloned() {
            None => RecoveryOutcome {
                kind: kind.clone(),
                recovered: false,
                action: "none".to_string(),
                message: "no strategy registered".to_string(),
            },
            Some(strategy) => {
                let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                    strategy.recover(&kind, data, context)
                }));
                match attempt {
                    Ok(Ok(result)) => RecoveryOutcome {
                        kind: kind.clone(),
                        recovered: result.success,
                        action: result.action,
                        message: result.message,
                    },
                    Ok(Err(e)) => RecoveryOutcome {
                        kind: kind.clone(),
                        recovered: false,
                        action: "strategy_error".to_string(),
                        message: format!("{e:#}"),
                    },
                    Err(payload) => RecoveryOutcome {
                        kind: kind.clone(),
                        recovered: false,
                        action: "strategy_panic".to_string(),
                        message: panic_message(payload.as_ref()),
                    },
                }
            }
        };

        self.record(data, &outcome);
        outcome
    }

    fn record(&mut self, data: &Value, outcome: &RecoveryOutcome) {
        self.total_errors += 1;
        let counts = self.by_kind.entry(outcome.kind.to_string()).or_default();
        counts.total += 1;
        if outcome.recovered {
            self.recovery_successful += 1;
            counts.recovered += 1;
            log::info!(
                "ErrorRecovery: '{}' recovered via {}: {}",
                outcome.kind,
                outcome.action,
                outcome.message
            );
        } else {
            log::warn!(
                "ErrorRecovery: '{}' not recovered ({}): {}",
                outcome.kind,
                outcome.action,
                outcome.message
            );
        }

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(RecoveryRecord {
            sequence: self.total_errors,
            timestamp: self.clock.elapsed_secs_f64(),
            data: data.clone(),
            outcome: outcome.clone(),
        });
        self.last_outcome = Some(outcome.clone());
        self.events.publish(outcome.clone());
    }

    /// Returns the aggregate counters and the last outcome.
    pub fn get_error_summary(&self) -> ErrorSummary {
        let recovery_rate = if self.total_errors == 0 {
            1.0
        } else {
            self.recovery_successful as f64 / self.total_errors as f64
        };
        ErrorSummary {
            total_errors: self.total_errors,
            recovery_successful: self.recovery_successful,
            recovery_rate,
            by_kind: self.by_kind.clone(),
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Returns the retained history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RecoveryRecord> {
        self.history.iter()
    }

    /// Bus on which every outcome is published.
    pub fn events(&self) -> &EventBus<RecoveryOutcome> {
        &self.events
    }
}

impl Default for ErrorRecoverySystem {
    fn default() -> Self {
        let config = RecoveryConfig::default();
        Self {
            strategies: HashMap::new(),
            history: VecDeque::new(),
            history_capacity: config.history_capacity,
            total_errors: 0,
            recovery_successful: 0,
            by_kind: BTreeMap::new(),
            last_outcome: None,
            events: EventBus::bounded(config.event_capacity),
            clock: Stopwatch::new(),
        }
    }
}

impl std::fmt::Debug for ErrorRecoverySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.strategies.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("ErrorRecoverySystem")
            .field("strategies", &kinds)
            .field("total_errors", &self.total_errors)
            .field("recovery_successful", &self.recovery_successful)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("strategy panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("strategy panicked: {s}")
    } else {
        "strategy panicked".to_string()
    }
}

/// Recovery for [`ErrorKind::Instability`] tied to timestep headroom.
///
/// Expects `context` to carry `dt_before` and `min_dt`: the error counts as
/// recovered when the timestep could still be reduced, and as failed once it
/// was already pinned at its lower bound.
pub fn timestep_backoff_strategy(
    _kind: &ErrorKind,
    _data: &Value,
    context: &Value,
) -> anyhow::Result<StrategyResult> {
    let dt_before = context
        .get("dt_before")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("context lacks 'dt_before'"))?;
    let min_dt = context
        .get("min_dt")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("context lacks 'min_dt'"))?;

    if dt_before > min_dt + EQUALITY_TOLERANCE {
        Ok(StrategyResult::recovered(
            "reduce_timestep",
            format!("dt reduced from {dt_before}"),
        ))
    } else {
        Ok(StrategyResult::failed(
            "reduce_timestep",
            format!("dt already at minimum {min_dt}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registered_strategy_recovers() {
        let mut registry = ErrorRecoverySystem::default();
        registry.register_recovery_strategy("test_error", |_, _, _| {
            Ok(StrategyResult::recovered("retry", "ok"))
        });

        let outcome = registry.handle_error("test_error", &json!({"detail": 1}), &json!({}));
        assert!(outcome.recovered);
        assert_eq!(outcome.kind, ErrorKind::Custom("test_error".to_string()));

        let summary = registry.get_error_summary();
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.recovery_successful, 1);
        assert_eq!(summary.recovery_rate, 1.0);
        assert_eq!(summary.by_kind["test_error"].recovered, 1);
    }

    #[test]
    fn test_missing_strategy_is_unrecovered() {
        let mut registry = ErrorRecoverySystem::default();
        let outcome = registry.handle_error(ErrorKind::Serialization, &Value::Null, &Value::Null);
        assert!(!outcome.recovered);
        assert_eq!(outcome.action, "none");
        assert_eq!(outcome.message, "no strategy registered");
        assert_eq!(registry.get_error_summary().total_errors, 1);
    }

    #[test]
    fn test_failing_and_panicking_strategies_are_contained() {
        let mut registry = ErrorRecoverySystem::default();
        registry.register_recovery_strategy("broken", |_, _, _| {
            anyhow::bail!("database offline")
        });
        registry.register_recovery_strategy(
            "explosive",
            |_, _, _| {
                panic!("boom")
            },
        );

        let broken = registry.handle_error("broken", &Value::Null, &Value::Null);
        assert!(!broken.recovered);
        assert_eq!(broken.action, "strategy_error");
        assert!(broken.message.contains("database offline"));

        let explosive = registry.handle_error("explosive", &Value::Null, &Value::Null);
        assert!(!explosive.recovered);
        assert_eq!(explosive.action, "strategy_panic");
        assert!(explosive.message.contains("boom"));

        let summary = registry.get_error_summary();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.recovery_successful, 0);
        assert_eq!(summary.last_outcome, Some(explosive));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ErrorRecoverySystem::default();
        registry.register_recovery_strategy(ErrorKind::Instability, |_, _, _| {
            Ok(StrategyResult::failed("first", ""))
        });
        registry.register_recovery_strategy("instability", |_, _, _| {
            Ok(StrategyResult::recovered("second", ""))
        });
        let outcome = registry.handle_error(ErrorKind::Instability, &Value::Null, &Value::Null);
        assert_eq!(outcome.action, "second");
        assert!(registry.has_strategy(&ErrorKind::Instability));
        assert!(registry.unregister_recovery_strategy(&ErrorKind::Instability));
        assert!(!registry.has_strategy(&ErrorKind::Instability));
    }

    #[test]
    fn test_history_is_bounded_but_counters_are_not() {
        let mut registry = ErrorRecoverySystem::new(RecoveryConfig {
            history_capacity: 3,
            ..Default::default()
        })
        .unwrap();
        for i in 0..5 {
            registry.handle_error("noise", &json!(i), &Value::Null);
        }
        let sequences: Vec<u64> = registry.history().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(registry.get_error_summary().total_errors, 5);
        assert_eq!(registry.events().drain().len(), 5);
    }

    #[test]
    fn test_timestep_backoff_strategy() {
        let kind = ErrorKind::Instability;
        let headroom = json!({ "dt_before": 0.01, "min_dt": 0.001 });
        let ok = timestep_backoff_strategy(&kind, &Value::Null, &headroom).unwrap();
        assert!(ok.success);
        let at_floor = json!({ "dt_before": 0.001, "min_dt": 0.001 });
        let pinned = timestep_backoff_strategy(&kind, &Value::Null, &at_floor).unwrap();
        assert!(!pinned.success);
        assert!(timestep_backoff_strategy(&kind, &Value::Null, &json!({})).is_err());
    }

    struct Retry {
        limit: u64,
    }

    impl RecoveryStrategy for Retry {
        fn recover(
            &self,
            _kind: &ErrorKind,
            data: &Value,
            _context: &Value,
        ) -> anyhow::Result<StrategyResult> {
            let attempt = data.get("attempt").and_then(Value::as_u64).unwrap_or(0);
            if attempt < self.limit {
                Ok(StrategyResult::recovered("retry", format!("attempt {attempt}")))
            } else {
                Ok(StrategyResult::failed("retry", "retry budget exhausted"))
            }
        }
    }

    #[test]
    fn test_trait_object_strategy() {
        let mut registry = ErrorRecoverySystem::default();
        registry.register_strategy(ErrorKind::SubscriberDelivery, Retry { limit: 2 });
        let outcomes: Vec<bool> = (0..3)
            .map(|attempt| {
                registry
                    .handle_error(
                        ErrorKind::SubscriberDelivery,
                        &json!({ "attempt": attempt }),
                        &Value::Null,
                    )
                    .recovered
            })
            .collect();
        assert_eq!(outcomes, vec![true, true, false]);
        assert_eq!(
            registry.get_error_summary().by_kind["subscriber_delivery"],
            KindCounts {
                total: 3,
                recovered: 2
            }
        );
    }

    #[test]
    fn test_zero_history_rejected() {
        assert!(ErrorRecoverySystem::new(RecoveryConfig {
            history_capacity: 0,
            ..Default::default()
        })
        .is_err());
    }
}
