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

//! Threshold-rule alerting over telemetry fields.

use kpp_core::path::lookup_number;
use kpp_core::{Comparator, EventBus, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// A registered threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name. Re-registering a name replaces the rule.
    pub id: String,
    /// Dotted path of the watched field (e.g. `"forces.buoyancy"`).
    pub field: String,
    /// Value the observation is compared against.
    pub threshold: f64,
    /// Comparison applied as `observed <comparator> threshold`.
    pub comparator: Comparator,
    /// Severity attached to every alert the rule fires.
    pub severity: Severity,
}

/// A fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Id of the rule that fired.
    pub rule_id: String,
    /// Field path the rule watches.
    pub field: String,
    /// Severity of the rule.
    pub severity: Severity,
    /// The observed value.
    pub observed: f64,
    /// The rule threshold.
    pub threshold: f64,
    /// Timestamp supplied to `check_monitors`.
    pub timestamp: f64,
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {} = {:.4} (threshold {:.4})",
            self.severity, self.rule_id, self.field, self.observed, self.threshold
        )
    }
}

/// Configuration for the [`AlertMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertMonitorConfig {
    /// Number of recent alerts retained (oldest dropped).
    pub max_recent_alerts: usize,
    /// Capacity of the alert event bus.
    pub event_capacity: usize,
}

impl Default for AlertMonitorConfig {
    fn default() -> Self {
        Self {
            max_recent_alerts: 100,
            event_capacity: 256,
        }
    }
}

/// Evaluates threshold rules against each incoming telemetry payload.
///
/// Rules are evaluated in registration order. A rule whose field is missing
/// or non-numeric is skipped silently.
#[derive(Debug)]
pub struct AlertMonitor {
    rules: Vec<AlertRule>,
    recent: VecDeque<Alert>,
    max_recent: usize,
    total_fired: u64,
    events: EventBus<Alert>,
}

impl AlertMonitor {
    /// Creates an empty monitor.
    pub fn new(config: AlertMonitorConfig) -> Self {
        let max_recent = config.max_recent_alerts.max(1);
        Self {
            rules: Vec::new(),
            recent: VecDeque::with_capacity(max_recent),
            max_recent,
            total_fired: 0,
            events: EventBus::bounded(config.event_capacity),
        }
    }

    /// Registers a rule. A rule with the same name is replaced in place and
    /// keeps its evaluation position.
    pub fn add_monitor(
        &mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        threshold: f64,
        comparator: Comparator,
        severity: Severity,
    ) {
        self.add_rule(AlertRule {
            id: name.into(),
            field: field.into(),
            threshold,
            comparator,
            severity,
        });
    }

    /// Registers a prebuilt rule with the same replace-by-name semantics as
    /// [`add_monitor`](Self::add_monitor).
    pub fn add_rule(&mut self, rule: AlertRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
            log::debug!("AlertMonitor: replacing rule '{}'", rule.id);
            *existing = rule;
        } else {
            log::debug!(
                "AlertMonitor: registered rule '{}' on '{}' ({:?} {})",
                rule.id,
                rule.field,
                rule.comparator,
                rule.threshold
            );
            self.rules.push(rule);
        }
    }

    /// Removes a rule. Returns `false` if no rule had that name.
    pub fn remove_monitor(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != name);
        self.rules.len() != before
    }

    /// Returns the registered rules in evaluation order.
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluates every rule against `data` and returns the alerts fired by
    /// this call. Fired alerts are appended to the recent-alerts log and
    /// published on the event bus.
    pub fn check_monitors(&mut self, data: &Map<String, Value>, timestamp: f64) -> Vec<Alert> {
        let mut fired = Vec::new();
        for rule in &self.rules {
            let Some(observed) = lookup_number(data, &rule.field) else {
                continue;
            };
            if rule.comparator.fires(observed, rule.threshold) {
                fired.push(Alert {
                    rule_id: rule.id.clone(),
                    field: rule.field.clone(),
                    severity: rule.severity,
                    observed,
                    threshold: rule.threshold,
                    timestamp,
                });
            }
        }

        for alert in &fired {
            match alert.severity {
                Severity::Critical => log::warn!("AlertMonitor: {}", alert),
                Severity::Warning => log::info!("AlertMonitor: {}", alert),
                Severity::Info => log::debug!("AlertMonitor: {}", alert),
            }
            if self.recent.len() == self.max_recent {
                self.recent.pop_front();
            }
            self.recent.push_back(alert.clone());
            self.events.publish(alert.clone());
        }
        self.total_fired += fired.len() as u64;
        fired
    }

    /// Returns the bounded log of recent alerts, oldest first.
    pub fn get_recent_alerts(&self) -> Vec<Alert> {
        self.recent.iter().cloned().collect()
    }

    /// Returns the total number of alerts fired since creation.
    pub fn total_fired(&self) -> u64 {
        self.total_fired
    }

    /// Empties the recent-alerts log.
    pub fn clear_alerts(&mut self) {
        self.recent.clear();
    }

    /// Returns the bus on which fired alerts are published.
    pub fn events(&self) -> &EventBus<Alert> {
        &self.events
    }
}

impl Default for AlertMonitor {
    fn default() -> Self {
        Self::new(AlertMonitorConfig::default())
    }
}
