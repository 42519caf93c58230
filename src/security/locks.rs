/*!
 * Lock Manager
 * Per-name async locks held for the full duration of an operation
 *
 * Waiters are served in arrival order (tokio's mutex is fair), so operations
 * on one name are totally ordered by submission. Entries are dropped from
 * the table once nobody holds or waits on them.
 */

use crate::core::{ConcurrencyError, TimeoutPolicy};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

type LockTable = DashMap<String, Arc<Mutex<()>>, RandomState>;

#[derive(Clone)]
pub struct LockManager {
    locks: Arc<LockTable>,
    timeout: TimeoutPolicy,
}

/// Exclusive hold on one workload name; released on drop
pub struct NameLease {
    name: String,
    locks: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

impl NameLease {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        // Two references left: the table's and the one inside our guard
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

impl LockManager {
    pub fn new(timeout: TimeoutPolicy) -> Self {
        Self {
            locks: Arc::new(DashMap::with_hasher(RandomState::new())),
            timeout,
        }
    }

    /// Wait for the lock on `name`, bounded by the lock timeout
    pub async fn acquire(&self, name: &str) -> Result<NameLease, ConcurrencyError> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match self.timeout.run(lock.lock_owned()).await {
            Ok(guard) => {
                debug!(workload = name, "Lock acquired");
                Ok(NameLease {
                    name: name.to_string(),
                    locks: Arc::clone(&self.locks),
                    _guard: guard,
                })
            }
            Err(waited) => {
                self.locks
                    .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
                warn!(workload = name, waited_ms = waited.as_millis() as u64, "Lock wait timed out");
                Err(ConcurrencyError::LockTimeout {
                    workload: name.to_string(),
                    waited_ms: waited.as_millis() as u64,
                })
            }
        }
    }

    /// True while some operation holds `name`
    pub fn is_held(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Names currently held or waited on
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
