//! Bounded set of already-forwarded reading keys.

use std::collections::{HashSet, VecDeque};

use aquamon_types::ReadingKey;

/// Default number of keys remembered before the oldest are evicted.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Remembers the most recent `capacity` reading keys, evicting in insertion
/// order.
#[derive(Debug)]
pub struct DedupSet {
    seen: HashSet<ReadingKey>,
    order: VecDeque<ReadingKey>,
    capacity: usize,
}

impl DedupSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `key`. Returns `true` the first time a key is seen and `false`
    /// for every repeat while it is still remembered.
    pub fn insert(&mut self, key: ReadingKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
