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

//! Dotted field-path lookup over telemetry payloads.
//!
//! Alert rules and the stream optimizer address payload fields with paths
//! such as `"forces.buoyancy"` or `"bodies.3.velocity"`. A path that does not
//! resolve to a number yields `None`; callers treat that as "skip", never as
//! an error.

use serde_json::{Map, Value};

/// Resolves `path` against `root` and returns the value it points at.
pub fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves `path` to a finite number. Booleans map to `0.0`/`1.0`.
pub fn lookup_number(root: &Map<String, Value>, path: &str) -> Option<f64> {
    match lookup(root, path)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
