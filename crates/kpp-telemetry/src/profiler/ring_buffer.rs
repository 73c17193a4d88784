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

//! Fixed-capacity circular buffer used for every rolling window.

/// A fixed-capacity circular buffer.
///
/// The capacity is chosen at runtime so each window (profiler phases,
/// stability history) can be tuned independently. Pushing into a full buffer
/// overwrites and returns the oldest value.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    index: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// Creates a new, empty ring buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    /// Pushes a new value, returning the evicted oldest value if the buffer
    /// was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.data.len() < self.capacity {
            self.data.push(value);
            return None;
        }
        let evicted = std::mem::replace(&mut self.data[self.index], value);
        self.index = (self.index + 1) % self.capacity;
        Some(evicted)
    }

    /// Returns the number of elements currently in the buffer.
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Returns the maximum number of elements the buffer retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` once the buffer has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Returns the most recently pushed value.
    pub fn last(&self) -> Option<T> {
        if self.data.is_empty() {
            None
        } else if self.is_full() {
            let newest = (self.index + self.capacity - 1) % self.capacity;
            Some(self.data[newest])
        } else {
            self.data.last().copied()
        }
    }

    /// Returns an iterator over the values in chronological order (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (left, right) = self.data.split_at(self.index);
        // Until the first wrap `index` stays at 0, so `left` is empty.
        right.iter().chain(left.iter())
    }

    /// Removes every element, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_push_and_iter() {
        let mut rb = RingBuffer::<f64>::new(3);
        assert_eq!(rb.push(1.0), None);
        rb.push(2.0);
        rb.push(3.0);
        assert_eq!(rb.push(4.0), Some(1.0)); // Overwrites 1.0

        let values: Vec<f64> = rb.iter().copied().collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert_eq!(rb.count(), 3);
        assert_eq!(rb.last(), Some(4.0));
    }

    #[test]
    fn test_ring_buffer_iter_before_wrap() {
        let mut rb = RingBuffer::<u8>::new(4);
        rb.push(7);
        rb.push(8);
        assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![7, 8]);
        assert_eq!(rb.last(), Some(8));
        assert!(!rb.is_full());
    }

    #[test]
    fn test_ring_buffer_wraps_many_times() {
        let mut rb = RingBuffer::<u32>::new(3);
        for i in 0..10 {
            rb.push(i);
        }
        assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(rb.last(), Some(9));
    }

    #[test]
    fn test_ring_buffer_empty() {
        let rb = RingBuffer::<f64>::new(4);
        assert_eq!(rb.last(), None);
        assert_eq!(rb.iter().count(), 0);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut rb = RingBuffer::<f64>::new(2);
        rb.push(1.0);
        rb.push(2.0);
        rb.push(3.0);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 2);
        rb.push(9.0);
        assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![9.0]);
    }
}
