//! Per-entity locks with ordered, bounded acquisition
//!
//! Every unit of work locks all entities it will read-check-write before it
//! reads any of them. Keys are sorted before locking (capsules before
//! wallets, lexicographic within a kind), so two units that share entities
//! always contend in the same order and cannot deadlock. A unit that cannot
//! get all of its locks before the deadline releases what it holds and fails
//! with [`Error::Busy`].

use crate::types::{CapsuleId, UserId};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lockable entity. Variant order is the acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// Issuance registry entry, keyed by capsule
    Capsule(CapsuleId),
    /// Wallet, keyed by owner
    Wallet(UserId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Capsule(id) => write!(f, "capsule:{}", id),
            LockKey::Wallet(id) => write!(f, "wallet:{}", id),
        }
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

/// Lock table shared by all callers. Entries live only while some caller
/// holds or waits on them.
pub struct LockManager {
    entries: Arc<LockTable>,
    timeout: Duration,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("entries", &self.entries.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LockManager {
    /// Create lock table; `timeout` bounds the wait for a whole lock set
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Lock every key, in ascending order, or none of them
    pub fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> Result<LockSet> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut set = LockSet {
            guards: Vec::with_capacity(keys.len()),
            waited: Duration::ZERO,
            table: Arc::clone(&self.entries),
        };

        for key in keys {
            let mutex = self.mutex_for(&key);
            let remaining = deadline.saturating_duration_since(Instant::now());

            match mutex.try_lock_arc_for(remaining) {
                Some(guard) => {
                    tracing::debug!(key = %key, "lock acquired");
                    set.guards.push((key, guard));
                }
                None => {
                    tracing::warn!(
                        key = %key,
                        held = set.guards.len(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock acquisition timed out"
                    );
                    // Locks acquired so far are released with `set`
                    return Err(Error::Busy(format!("timed out waiting for {}", key)));
                }
            }
        }

        set.waited = started.elapsed();
        Ok(set)
    }

    /// Number of entities currently held or awaited
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entity is held or awaited
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        if let Some(existing) = self.entries.get(key) {
            return Arc::clone(existing.value());
        }
        // Shard guard is released at the end of this statement, before we block on the mutex
        Arc::clone(
            self.entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

/// Locks held by one unit of work. Dropping it releases them all.
pub struct LockSet {
    guards: Vec<(LockKey, ArcMutexGuard<RawMutex, ()>)>,
    waited: Duration,
    table: Arc<LockTable>,
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSet")
            .field("keys", &self.guards.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("waited", &self.waited)
            .finish()
    }
}

impl LockSet {
    /// Whether this set holds the key
    pub fn holds(&self, key: &LockKey) -> bool {
        // Sorted on acquisition
        self.guards
            .binary_search_by(|(held, _)| held.cmp(key))
            .is_ok()
    }

    /// Keys in acquisition order
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.guards.iter().map(|(key, _)| key)
    }

    /// Time spent acquiring
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..) {
            drop(guard);
            // Only the table's own reference left: nobody holds or waits on it
            self.table
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn wallet(id: &str) -> LockKey {
        LockKey::Wallet(UserId::parse(id).unwrap())
    }

    fn capsule(id: &str) -> LockKey {
        LockKey::Capsule(CapsuleId::parse(id).unwrap())
    }

    #[test]
    fn test_keys_sorted_and_deduplicated() {
        let locks = LockManager::new(Duration::from_millis(50));
        let set = locks
            .acquire(vec![wallet("bob"), capsule("cap-1"), wallet("alice"), wallet("bob")])
            .unwrap();

        let keys: Vec<String> = set.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["capsule:cap-1", "wallet:alice", "wallet:bob"]);
        assert!(set.holds(&wallet("alice")));
        assert!(!set.holds(&wallet("carol")));
    }

    #[test]
    fn test_contended_lock_times_out_as_busy() {
        let locks = LockManager::new(Duration::from_millis(20));
        let _held = locks.acquire(vec![wallet("alice")]).unwrap();

        let err = locks.acquire(vec![wallet("bob"), wallet("alice")]).unwrap_err();
        assert!(err.is_retryable());

        // bob was released when alice timed out
        assert!(locks.acquire(vec![wallet("bob")]).is_ok());
    }

    #[test]
    fn test_release_on_drop() {
        let locks = LockManager::new(Duration::from_millis(20));
        {
            let _set = locks.acquire(vec![wallet("alice")]).unwrap();
        }
        assert!(locks.acquire(vec![wallet("alice")]).is_ok());
    }

    #[test]
    fn test_opposite_order_does_not_deadlock() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [("alice", "bob"), ("bob", "alice")]
            .into_iter()
            .map(|(first, second)| {
                let locks = Arc::clone(&locks);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        let set = locks.acquire(vec![wallet(first), wallet(second)]).unwrap();
                        drop(set);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn test_released_entries_are_evicted() {
        let locks = LockManager::new(Duration::from_millis(20));
        let held = locks.acquire(vec![wallet("alice")]).unwrap();
        {
            let _set = locks.acquire(vec![wallet("ghost"), capsule("cap-1")]).unwrap();
            assert_eq!(locks.len(), 3);
        }
        assert_eq!(locks.len(), 1);

        // A timed-out acquisition leaves nothing behind either
        assert!(locks.acquire(vec![wallet("bob"), wallet("alice")]).is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }
}
