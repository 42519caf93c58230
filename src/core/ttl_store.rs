/*!
 * TTL Keyed Store
 * Per-key bounded history that expires after a period of inactivity
 *
 * Injected into the control server for per-requester session context;
 * nothing in the orchestration core keeps tenant-keyed globals.
 */

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry<V> {
    items: Vec<V>,
    last_activity: Instant,
}

/// Keyed history with TTL eviction and a per-key entry cap
///
/// A zero TTL disables expiry; a zero cap disables trimming.
pub struct TtlStore<K, V> {
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> Clone for TtlStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
            max_entries: self.max_entries,
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(entry.last_activity) > self.ttl
    }

    /// Current history for `key`; expired histories are dropped and read as empty
    pub fn get(&self, key: &K) -> Vec<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => self.is_expired(entry, now),
            None => return Vec::new(),
        };
        if expired {
            entries.remove(key);
            return Vec::new();
        }
        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_activity = now;
                entry.items.clone()
            }
            None => Vec::new(),
        }
    }

    /// Append to `key`'s history, trimming the oldest items over the cap
    pub fn append(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| Entry {
            items: Vec::new(),
            last_activity: now,
        });
        if self.is_expired(entry, now) {
            entry.items.clear();
        }
        entry.items.push(value);
        entry.last_activity = now;
        if self.max_entries > 0 && entry.items.len() > self.max_entries {
            let excess = entry.items.len() - self.max_entries;
            entry.items.drain(..excess);
        }
    }

    pub fn clear(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    /// Drop every expired key; returns how many were evicted
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
