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

//! Rate-limited, non-blocking fan-out of telemetry frames.
//!
//! Every subscriber owns a bounded crossbeam channel. The producer never
//! blocks: when a subscriber's buffer is full the oldest frame is shed to make
//! room for the new one. The subscriber table is the only state shared with
//! other threads and sits behind a mutex; frame contents are only ever
//! produced by the tick thread.

use super::subscriber::{SubscriberCounters, SubscriberId, SubscriberStats, Subscription};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use kpp_core::{ConfigError, Stopwatch, TelemetryFrame, EQUALITY_TOLERANCE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Configuration of the [`DataStreamManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamManagerConfig {
    /// Outbound buffer capacity given to subscribers that do not ask for one.
    pub buffer_capacity: usize,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 30,
        }
    }
}

impl StreamManagerConfig {
    /// Checks the buffer capacity is at least one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ConfigError::require_capacity("buffer_capacity", self.buffer_capacity)
    }
}

/// Aggregate streaming state, as reported in status snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingStatus {
    /// Number of registered subscribers.
    pub subscribers: usize,
    /// Frames handed to the manager since it was created.
    pub frames_streamed: u64,
    /// Frames enqueued across all subscribers.
    pub total_enqueued: u64,
    /// Frames shed on overflow across all subscribers.
    pub total_dropped: u64,
    /// Failed deliveries across all subscribers.
    pub total_failures: u64,
    /// Per-subscriber statistics keyed by id.
    pub per_subscriber: BTreeMap<String, SubscriberStats>,
}

struct SubscriberEntry {
    rate_hz: f64,
    interval: f64,
    capacity: usize,
    last_sent: Option<f64>,
    sender: Sender<Arc<TelemetryFrame>>,
    // Producer-side handle on the same queue, used to shed the oldest frame.
    shed: Receiver<Arc<TelemetryFrame>>,
    closed: Arc<AtomicBool>,
    counters: Arc<SubscriberCounters>,
    worker: Option<JoinHandle<()>>,
}

impl SubscriberEntry {
    fn stats(&self) -> SubscriberStats {
        self.counters
            .snapshot(self.rate_hz, self.capacity, self.sender.len())
    }

    /// Offers one frame. Returns whether it was enqueued.
    fn offer(&mut self, id: &SubscriberId, frame: &Arc<TelemetryFrame>) -> bool {
        SubscriberCounters::bump(&self.counters.offered);

        if let Some(last) = self.last_sent {
            if frame.timestamp - last + EQUALITY_TOLERANCE < self.interval {
                SubscriberCounters::bump(&self.counters.skipped_rate);
                return false;
            }
        }
        self.last_sent = Some(frame.timestamp);

        if self.closed.load(Ordering::Acquire) {
            SubscriberCounters::bump(&self.counters.delivery_failures);
            log::trace!("DataStreamManager: Subscriber '{}' is closed", id);
            return false;
        }

        let mut pending = Arc::clone(frame);
        loop {
            match self.sender.try_send(pending) {
                Ok(()) => {
                    SubscriberCounters::bump(&self.counters.enqueued);
                    return true;
                }
                Err(TrySendError::Full(rejected)) => {
                    if self.shed.try_recv().is_ok() {
                        SubscriberCounters::bump(&self.counters.dropped_overflow);
                    }
                    pending = rejected;
                }
                Err(TrySendError::Disconnected(_)) => {
                    SubscriberCounters::bump(&self.counters.delivery_failures);
                    log::warn!(
                        "DataStreamManager: Channel of subscriber '{}' is disconnected",
                        id
                    );
                    return false;
                }
            }
        }
    }

    /// Discards the buffer, closes the channel and waits for the delivery
    /// thread, if any. At most the frame already being delivered completes.
    fn shutdown(self, id: &SubscriberId) {
        let SubscriberEntry {
            sender,
            shed,
            closed,
            worker,
            ..
        } = self;
        closed.store(true, Ordering::Release);
        let discarded = shed.try_iter().count();
        if discarded > 0 {
            log::debug!(
                "DataStreamManager: Discarded {} buffered frame(s) of '{}'",
                discarded,
                id
            );
        }
        drop(sender);
        if let Some(handle) = worker {
            if handle.join().is_err() {
                log::error!("DataStreamManager: Delivery thread of '{}' panicked", id);
            }
        }
    }
}

struct ManagerShared {
    subscribers: Mutex<HashMap<SubscriberId, SubscriberEntry>>,
    frames_streamed: AtomicU64,
    clock: Stopwatch,
}

/// Fans telemetry frames out to subscribers at their own cadence.
///
/// The manager is a cheap handle: clones share the same subscriber table, so
/// subscribers may be added or removed from any thread while the tick thread
/// streams.
#[derive(Clone)]
pub struct DataStreamManager {
    config: StreamManagerConfig,
    shared: Arc<ManagerShared>,
}

impl DataStreamManager {
    /// Creates a manager with no subscribers.
    pub fn new(config: StreamManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(ManagerShared {
                subscribers: Mutex::new(HashMap::new()),
                frames_streamed: AtomicU64::new(0),
                clock: Stopwatch::new(),
            }),
        })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &StreamManagerConfig {
        &self.config
    }

    fn table(&self) -> MutexGuard<'_, HashMap<SubscriberId, SubscriberEntry>> {
        match self.shared.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a channel subscriber with the default buffer capacity.
    ///
    /// A `None` id is replaced by a generated one.
    pub fn add_subscriber(
        &self,
        id: Option<SubscriberId>,
        rate_hz: f64,
    ) -> Result<Subscription, ConfigError> {
        self.add_subscriber_with_capacity(id, rate_hz, self.config.buffer_capacity)
    }

    /// Registers a channel subscriber with an explicit buffer capacity.
    pub fn add_subscriber_with_capacity(
        &self,
        id: Option<SubscriberId>,
        rate_hz: f64,
        capacity: usize,
    ) -> Result<Subscription, ConfigError> {
        let id = id.unwrap_or_else(SubscriberId::generate);
        let (entry, receiver) = Self::build_entry(rate_hz, capacity)?;
        let closed = Arc::clone(&entry.closed);
        self.install(id.clone(), entry);
        Ok(Subscription::new(id, receiver, closed))
    }

    /// Registers a subscriber whose frames are delivered to `callback` on a
    /// dedicated thread.
    ///
    /// Errors returned by the callback, and panics inside it, are counted as
    /// delivery failures and never reach the producer.
    pub fn add_callback_subscriber<F>(
        &self,
        id: Option<SubscriberId>,
        rate_hz: f64,
        callback: F,
    ) -> Result<SubscriberId, ConfigError>
    where
        F: Fn(&TelemetryFrame) -> anyhow::Result<()> + Send + 'static,
    {
        let id = id.unwrap_or_else(SubscriberId::generate);
        let (mut entry, receiver) = Self::build_entry(rate_hz, self.config.buffer_capacity)?;

        let counters = Arc::clone(&entry.counters);
        let removed = Arc::clone(&entry.closed);
        let worker_id = id.clone();
        entry.worker = Some(thread::spawn(move || {
            for frame in receiver.iter() {
                if removed.load(Ordering::Acquire) {
                    break;
                }
                match panic::catch_unwind(AssertUnwindSafe(|| callback(&frame))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        SubscriberCounters::bump(&counters.delivery_failures);
                        log::warn!("DataStreamManager: Delivery to '{}' failed: {}", worker_id, e);
                    }
                    Err(_) => {
                        SubscriberCounters::bump(&counters.delivery_failures);
                        log::error!("DataStreamManager: Callback of '{}' panicked", worker_id);
                    }
                }
            }
            log::debug!("DataStreamManager: Delivery thread of '{}' stopped", worker_id);
        }));

        self.install(id.clone(), entry);
        Ok(id)
    }

    fn build_entry(
        rate_hz: f64,
        capacity: usize,
    ) -> Result<(SubscriberEntry, Receiver<Arc<TelemetryFrame>>), ConfigError> {
        ConfigError::require_positive("rate_hz", rate_hz)?;
        ConfigError::require_capacity("buffer_capacity", capacity)?;

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let entry = SubscriberEntry {
            rate_hz,
            interval: 1.0 / rate_hz,
            capacity,
            last_sent: None,
            sender,
            shed: receiver.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SubscriberCounters::default()),
            worker: None,
        };
        Ok((entry, receiver))
    }

    fn install(&self, id: SubscriberId, entry: SubscriberEntry) {
        log::info!(
            "DataStreamManager: Adding subscriber '{}' at {} Hz (buffer {})",
            id,
            entry.rate_hz,
            entry.capacity
        );
        let previous = self.table().insert(id.clone(), entry);
        if let Some(previous) = previous {
            log::warn!("DataStreamManager: Subscriber '{}' replaced", id);
            previous.shutdown(&id);
        }
    }

    /// Deregisters a subscriber and discards its buffer.
    ///
    /// Returns `false` if the id is unknown.
    pub fn remove_subscriber(&self, id: &SubscriberId) -> bool {
        let removed = self.table().remove(id);
        match removed {
            Some(entry) => {
                log::info!("DataStreamManager: Removed subscriber '{}'", id);
                entry.shutdown(id);
                true
            }
            None => false,
        }
    }

    /// Returns whether a subscriber with this id is registered.
    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.table().contains_key(id)
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.table().len()
    }

    /// Returns the statistics of one subscriber.
    pub fn subscriber_stats(&self, id: &SubscriberId) -> Option<SubscriberStats> {
        self.table().get(id).map(SubscriberEntry::stats)
    }

    /// Seconds elapsed on the manager's clock.
    pub fn now(&self) -> f64 {
        self.shared.clock.elapsed_secs_f64()
    }

    /// Streams a payload stamped with the manager's clock.
    pub fn stream_data(&self, payload: Map<String, Value>) -> usize {
        self.stream_data_at(payload, self.now())
    }

    /// Streams a payload stamped with an explicit timestamp (s).
    pub fn stream_data_at(&self, payload: Map<String, Value>, timestamp: f64) -> usize {
        let tick = self.shared.frames_streamed.load(Ordering::Relaxed);
        self.stream_frame(TelemetryFrame::new(tick, timestamp, payload))
    }

    /// Offers one frame to every subscriber whose interval has elapsed.
    ///
    /// Returns the number of subscribers the frame was enqueued for. Never
    /// blocks on a subscriber.
    pub fn stream_frame(&self, frame: TelemetryFrame) -> usize {
        self.shared.frames_streamed.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(frame);
        let mut table = self.table();
        table
            .iter_mut()
            .map(|(id, entry)| entry.offer(id, &frame))
            .filter(|enqueued| *enqueued)
            .count()
    }

    /// Returns the aggregate streaming state.
    pub fn status(&self) -> StreamingStatus {
        let table = self.table();
        let per_subscriber: BTreeMap<String, SubscriberStats> = table
            .iter()
            .map(|(id, entry)| (id.to_string(), entry.stats()))
            .collect();
        StreamingStatus {
            subscribers: table.len(),
            frames_streamed: self.shared.frames_streamed.load(Ordering::Relaxed),
            total_enqueued: per_subscriber.values().map(|s| s.enqueued).sum(),
            total_dropped: per_subscriber.values().map(|s| s.dropped_overflow).sum(),
            total_failures: per_subscriber.values().map(|s| s.delivery_failures).sum(),
            per_subscriber,
        }
    }

    /// Removes every subscriber, joining their delivery threads.
    pub fn clear(&self) {
        let drained: Vec<(SubscriberId, SubscriberEntry)> = self.table().drain().collect();
        for (id, entry) in drained {
            entry.shutdown(&id);
        }
    }
}

impl Default for DataStreamManager {
    fn default() -> Self {
        Self {
            config: StreamManagerConfig::default(),
            shared: Arc::new(ManagerShared {
                subscribers: Mutex::new(HashMap::new()),
                frames_streamed: AtomicU64::new(0),
                clock: Stopwatch::new(),
            }),
        }
    }
}

impl std::fmt::Debug for DataStreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStreamManager")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
