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

//! Small enums shared by the stability monitor and the alerting monitor.

use serde::{Deserialize, Serialize};

/// Absolute tolerance used by [`Comparator::Equal`].
pub const EQUALITY_TOLERANCE: f64 = 1e-9;

/// How serious a violation or alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, no action required.
    Info,
    /// Degraded but tolerable.
    Warning,
    /// Requires intervention.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Comparison applied between an observed value and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Fires when `observed > threshold`.
    Greater,
    /// Fires when `observed < threshold`.
    Less,
    /// Fires when `|observed - threshold| <= EQUALITY_TOLERANCE`.
    Equal,
}

impl Comparator {
    /// Evaluates `observed <op> threshold`.
    pub fn fires(self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparator::Greater => observed > threshold,
            Comparator::Less => observed < threshold,
            Comparator::Equal => (observed - threshold).abs() <= EQUALITY_TOLERANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_semantics() {
        assert!(Comparator::Greater.fires(2.0, 1.0));
        assert!(!Comparator::Greater.fires(1.0, 1.0));
        assert!(Comparator::Less.fires(0.5, 1.0));
        assert!(Comparator::Equal.fires(1.0, 1.0 + 1e-12));
        assert!(!Comparator::Equal.fires(1.0, 1.1));
        assert!(!Comparator::Greater.fires(f64::NAN, 0.0));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
