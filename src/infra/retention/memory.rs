//! Bounded in-memory store of finished entries with an eviction callback.

use std::collections::VecDeque;
use std::fmt;

/// Capacity used when a non-positive capacity is configured.
pub const DEFAULT_RETENTION: usize = 1000;

type EvictFn<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Keeps the most recent finished entries, oldest first.
///
/// Pushing past capacity evicts the oldest entry. The callback sees every
/// entry that leaves the buffer, through eviction or an explicit flush,
/// before it is dropped.
pub struct FinishedRetentionBuffer<T> {
    capacity: usize,
    entries: VecDeque<T>,
    on_evict: EvictFn<T>,
}

impl<T: PartialEq> FinishedRetentionBuffer<T> {
    /// Buffer of `capacity` entries; values below 1 select [`DEFAULT_RETENTION`].
    pub fn new(capacity: i64, on_evict: impl Fn(&T) + Send + Sync + 'static) -> Self {
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|c| *c >= 1)
            .unwrap_or(DEFAULT_RETENTION);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            on_evict: Box::new(on_evict),
        }
    }

    /// Append an entry, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, entry: T) {
        self.make_room();
        self.entries.push_back(entry);
    }

    /// Evict oldest entries until one more fits. Returns the number evicted.
    ///
    /// Lets a caller settle evictions before the entry that causes them
    /// becomes observable.
    pub fn make_room(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.entries.front() else {
                break;
            };
            (self.on_evict)(oldest);
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Evict everything. Returns the number of entries flushed.
    pub fn flush(&mut self) -> usize {
        let flushed = self.entries.len();
        while let Some(oldest) = self.entries.front() {
            (self.on_evict)(oldest);
            self.entries.pop_front();
        }
        flushed
    }

    /// Evict a single entry. `false` if it is not retained.
    pub fn flush_one(&mut self, entry: &T) -> bool {
        let Some(at) = self.entries.iter().position(|e| e == entry) else {
            return false;
        };
        (self.on_evict)(&self.entries[at]);
        self.entries.remove(at);
        true
    }

    /// Whether `entry` is retained.
    #[must_use]
    pub fn contains(&self, entry: &T) -> bool {
        self.entries.contains(entry)
    }

    /// Retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Effective capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: fmt::Debug> fmt::Debug for FinishedRetentionBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinishedRetentionBuffer")
            .field("capacity", &self.capacity)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
