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

//! Subscriber identity, delivery counters and the receiving end of a channel
//! subscription.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use kpp_core::TelemetryFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Identifies a subscriber of the [`DataStreamManager`](super::manager::DataStreamManager).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Creates an id from an explicit name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a random id for callers that do not name their subscribers.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SubscriberId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Point-in-time delivery statistics of one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberStats {
    /// Requested delivery rate (Hz).
    pub rate_hz: f64,
    /// Capacity of the outbound buffer.
    pub capacity: usize,
    /// Frames offered by the producer.
    pub offered: u64,
    /// Frames placed in the outbound buffer.
    pub enqueued: u64,
    /// Frames skipped because the subscriber's interval had not elapsed.
    pub skipped_rate: u64,
    /// Buffered frames discarded to make room for newer ones.
    pub dropped_overflow: u64,
    /// Failed deliveries (closed receiver, callback error or panic).
    pub delivery_failures: u64,
    /// Frames currently waiting in the outbound buffer.
    pub buffered: usize,
}

/// Lock-free counters shared between the producer and a delivery thread.
#[derive(Debug, Default)]
pub(crate) struct SubscriberCounters {
    pub(crate) offered: AtomicU64,
    pub(crate) enqueued: AtomicU64,
    pub(crate) skipped_rate: AtomicU64,
    pub(crate) dropped_overflow: AtomicU64,
    pub(crate) delivery_failures: AtomicU64,
}

impl SubscriberCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        rate_hz: f64,
        capacity: usize,
        buffered: usize,
    ) -> SubscriberStats {
        SubscriberStats {
            rate_hz,
            capacity,
            offered: self.offered.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            skipped_rate: self.skipped_rate.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            buffered,
        }
    }
}

/// The receiving end of a channel subscriber.
///
/// Frames arrive in tick order. Dropping the subscription marks the
/// subscriber closed, after which every eligible frame counts as a delivery
/// failure until the subscriber is removed from the manager.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: Receiver<Arc<TelemetryFrame>>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        receiver: Receiver<Arc<TelemetryFrame>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            receiver,
            closed,
        }
    }

    /// Returns the subscriber id.
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Returns the underlying channel receiver.
    pub fn receiver(&self) -> &Receiver<Arc<TelemetryFrame>> {
        &self.receiver
    }

    /// Takes the oldest buffered frame without blocking.
    pub fn try_recv(&self) -> Option<Arc<TelemetryFrame>> {
        match self.receiver.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<TelemetryFrame>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes every buffered frame, oldest first.
    pub fn drain(&self) -> Vec<Arc<TelemetryFrame>> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
