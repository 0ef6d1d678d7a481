//! Fixed-capacity histories with oldest-first eviction.
//!
//! `BoundedHistory` is a keyed ring (completed instructions, monitored activities);
//! `RingLog` is an unkeyed ring (recent violations, error history).

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Keyed ring buffer. Insert, evict and lookup are O(1); explicit removal is O(n).
#[derive(Debug, Clone)]
pub struct BoundedHistory<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K, V> BoundedHistory<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a value, returning the evicted oldest entry when at capacity.
    ///
    /// Re-inserting an existing key replaces the value in place without changing its age.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }

        let mut evicted = None;
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                evicted = self.entries.remove(&oldest).map(|v| (oldest, v));
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Keep only entries for which `keep` returns true; returns the removed keys.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<K>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut removed = Vec::new();
        let entries = &mut self.entries;
        self.order.retain(|key| {
            let keep_it = entries.get(key).map(|v| keep(key, v)).unwrap_or(false);
            if !keep_it {
                entries.remove(key);
                removed.push(key.clone());
            }
            keep_it
        });
        removed
    }

    /// Values in insertion order, oldest first.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// Unkeyed ring buffer of the most recent `capacity` items.
#[derive(Debug, Clone)]
pub struct RingLog<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingLog<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an item, returning the evicted oldest item when at capacity.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    /// Up to `limit` most recent items, newest first.
    pub fn recent(&self, limit: usize) -> Vec<&T> {
        self.items.iter().rev().take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
