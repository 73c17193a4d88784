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

/// A bounded, lossy event channel.
///
/// Publishing never blocks: if no observer drains the bus and it fills up,
/// new events are dropped. This keeps alert and recovery events
/// from ever stalling the tick loop.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    sender: flume::Sender<T>,
    receiver: flume::Receiver<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Default number of events retained before publishing starts dropping.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a new EventBus holding at most `capacity` undelivered events.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Attempts to publish an event, dropping it if the bus is full.
    ///
    /// ## Returns
    /// `true` if the event was queued.
    pub fn publish(&self, event: T) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                log::trace!("EventBus: full, event dropped.");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Returns a receiver for observers. All receivers share the same queue.
    pub fn subscribe(&self) -> flume::Receiver<T> {
        self.receiver.clone()
    }

    /// Drains every pending event.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::bounded(Self::DEFAULT_CAPACITY)
    }
}
