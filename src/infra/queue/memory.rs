//! In-memory FIFO with explicit positional reordering.

use std::collections::VecDeque;

use crate::core::SchedulerError;

/// FIFO of pending items that also supports moving an item to the head, to
/// the tail, or directly after another item.
///
/// The queue itself is not synchronized. The scheduler keeps it behind the
/// same lock as its worker bookkeeping, so a move and a `pop_front` of the
/// same item can never both succeed.
#[derive(Debug, Clone)]
pub struct OrderableWorkQueue<T> {
    max_depth: usize,
    items: VecDeque<T>,
}

impl<T: PartialEq> OrderableWorkQueue<T> {
    /// Queue holding at most `max_depth` items.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            items: VecDeque::with_capacity(max_depth.min(1024)),
        }
    }

    /// Append at the tail.
    ///
    /// # Errors
    ///
    /// `QueueFull` once `max_depth` items are waiting.
    pub fn push_back(&mut self, item: T) -> Result<(), SchedulerError> {
        if self.items.len() >= self.max_depth {
            return Err(SchedulerError::QueueFull("max queue depth reached".into()));
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Take the head.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Look at the head.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Whether `item` is waiting.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// Zero-based position of `item`, head first.
    #[must_use]
    pub fn position(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|i| i == item)
    }

    /// Remove `item` wherever it is. `false` if absent.
    pub fn remove(&mut self, item: &T) -> bool {
        self.take(item).is_some()
    }

    /// Move `item` to the head. `false` if absent.
    pub fn move_to_head(&mut self, item: &T) -> bool {
        match self.take(item) {
            Some(found) => {
                self.items.push_front(found);
                true
            }
            None => false,
        }
    }

    /// Move `item` to the tail. `false` if absent.
    pub fn move_to_tail(&mut self, item: &T) -> bool {
        match self.take(item) {
            Some(found) => {
                self.items.push_back(found);
                true
            }
            None => false,
        }
    }

    /// Move `item` so that it directly follows `anchor`. `false` if either is
    /// absent or both are the same item.
    pub fn move_after(&mut self, item: &T, anchor: &T) -> bool {
        if item == anchor || !self.contains(anchor) {
            return false;
        }
        let Some(found) = self.take(item) else {
            return false;
        };
        match self.position(anchor) {
            Some(at) => {
                self.items.insert(at + 1, found);
                true
            }
            // Unreachable while the anchor is checked above; keep the item anyway.
            None => {
                self.items.push_back(found);
                false
            }
        }
    }

    /// Remove and return everything, head first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Items head first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Configured depth limit.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Waiting items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No items waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn take(&mut self, item: &T) -> Option<T> {
        let at = self.position(item)?;
        self.items.remove(at)
    }
}
