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

//! Error types shared across the control subsystem.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Raised when a component is constructed or reconfigured with inconsistent
/// parameters.
///
/// Configuration errors are fatal at setup and are never routed through the
/// recovery registry at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A `[min, max]` pair where `min > max`.
    InvertedBounds {
        /// Name of the bounded parameter.
        name: String,
        /// The lower bound that was supplied.
        min: f64,
        /// The upper bound that was supplied.
        max: f64,
    },
    /// A value that must lie inside a range but does not.
    OutOfRange {
        /// Name of the parameter.
        name: String,
        /// The value that was supplied.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// A value that must be finite and strictly positive.
    NotPositive {
        /// Name of the parameter.
        name: String,
        /// The value that was supplied.
        value: f64,
    },
    /// A size or capacity that must be at least one.
    ZeroCapacity(String),
    /// A performance mode name that matches no preset.
    UnknownMode(String),
    /// A configuration document that could not be read or parsed.
    Load(String),
}

impl ConfigError {
    /// Checks that `value` is finite and `> 0`.
    pub fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::NotPositive {
                name: name.to_string(),
                value,
            })
        }
    }

    /// Checks that `min <= max`, both finite and positive.
    pub fn require_bounds(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
        Self::require_positive(&format!("{name}.min"), min)?;
        Self::require_positive(&format!("{name}.max"), max)?;
        if min > max {
            return Err(ConfigError::InvertedBounds {
                name: name.to_string(),
                min,
                max,
            });
        }
        Ok(())
    }

    /// Checks that `capacity >= 1`.
    pub fn require_capacity(name: &str, capacity: usize) -> Result<(), ConfigError> {
        if capacity == 0 {
            Err(ConfigError::ZeroCapacity(name.to_string()))
        } else {
            Ok(())
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvertedBounds { name, min, max } => {
                write!(f, "Invalid bounds for {name}: min {min} > max {max}")
            }
            ConfigError::OutOfRange {
                name,
                value,
                min,
                max,
            } => write!(f, "{name} = {value} is outside [{min}, {max}]"),
            ConfigError::NotPositive { name, value } => {
                write!(f, "{name} must be finite and positive, got {value}")
            }
            ConfigError::ZeroCapacity(name) => write!(f, "{name} must be at least 1"),
            ConfigError::UnknownMode(name) => write!(f, "Unknown performance mode: {name}"),
            ConfigError::Load(msg) => write!(f, "Configuration load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Classification of a runtime failure, used as the key of the recovery
/// registry.
///
/// The set is extensible through [`ErrorKind::Custom`]; string names map onto
/// the built-in variants through [`ErrorKind::from_name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorKind {
    /// Bad bounds or parameters. Fatal at setup, never recovered.
    Configuration,
    /// The stability monitor reported at least one violated rule.
    Instability,
    /// A subscriber could not accept or process a frame.
    SubscriberDelivery,
    /// The per-tick timing input was unusable (negative, NaN, zero budget).
    InvalidTiming,
    /// The simulation state could not be turned into a telemetry payload.
    Serialization,
    /// Any host-defined failure kind.
    Custom(String),
}

impl ErrorKind {
    /// Returns the canonical snake_case name of this kind.
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Instability => "instability",
            ErrorKind::SubscriberDelivery => "subscriber_delivery",
            ErrorKind::InvalidTiming => "invalid_timing",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Custom(name) => name,
        }
    }

    /// Maps a name onto a built-in kind, or wraps it as [`ErrorKind::Custom`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "configuration" => ErrorKind::Configuration,
            "instability" => ErrorKind::Instability,
            "subscriber_delivery" => ErrorKind::SubscriberDelivery,
            "invalid_timing" => ErrorKind::InvalidTiming,
            "serialization" => ErrorKind::Serialization,
            other => ErrorKind::Custom(other.to_string()),
        }
    }

    /// Returns `true` for kinds that must never be recovered at runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::Configuration)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for ErrorKind {
    fn from(name: &str) -> Self {
        ErrorKind::from_name(name)
    }
}

impl From<String> for ErrorKind {
    fn from(name: String) -> Self {
        ErrorKind::from_name(&name)
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.name().to_string()
    }
}
