//! Entry state table: key -> atomic status
//!
//! The `Missing -> Processing` compare-and-set in [`EntryStateTable::try_begin_fetch`]
//! is the only serialization point between concurrent requests and the sweeper.
//! The map lock is held just long enough to find or insert a slot; the
//! transitions themselves are atomic operations on the slot.

use crate::cache::key::CacheKey;
use crate::cache::types::{EntryStatus, StatusCounts};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

type Slot = Arc<AtomicU8>;

/// Concurrency-safe map from cache key to entry status
#[derive(Debug, Default)]
pub struct EntryStateTable {
    entries: RwLock<HashMap<CacheKey, Slot>>,
}

impl EntryStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `Missing` for `key` unless it is already known
    pub fn ensure(&self, key: &CacheKey) {
        self.slot(key);
    }

    /// Current status; registers the key as `Missing` if it was unknown
    pub fn get(&self, key: &CacheKey) -> EntryStatus {
        EntryStatus::from(self.slot(key).load(Ordering::Acquire))
    }

    /// Status without registering the key
    pub fn peek(&self, key: &CacheKey) -> Option<EntryStatus> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|slot| EntryStatus::from(slot.load(Ordering::Acquire)))
    }

    /// Atomically claim the fetch for `key`
    ///
    /// Returns true iff the entry went `Missing -> Processing` in this call.
    /// The winner must eventually call [`complete`](Self::complete) or
    /// [`abandon`](Self::abandon).
    pub fn try_begin_fetch(&self, key: &CacheKey) -> bool {
        let won = self
            .slot(key)
            .compare_exchange(
                EntryStatus::Missing as u8,
                EntryStatus::Processing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            debug!("Claimed fetch: {}", key);
        }
        won
    }

    /// Record the outcome of a claimed fetch
    ///
    /// If the table was cleared while the fetch was running the entry is
    /// re-created with the outcome.
    pub fn complete(&self, key: &CacheKey, success: bool) {
        let status = if success {
            EntryStatus::Cached
        } else {
            EntryStatus::Error
        };
        self.slot(key).store(status as u8, Ordering::Release);
        debug!("Completed fetch: {} -> {}", key, status);
    }

    /// Give a claim back: `Processing -> Missing`
    ///
    /// Returns false if the entry was not `Processing`.
    pub fn abandon(&self, key: &CacheKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let released = entries.get(key).is_some_and(|slot| {
            slot.compare_exchange(
                EntryStatus::Processing as u8,
                EntryStatus::Missing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        });
        if released {
            debug!("Abandoned fetch: {}", key);
        }
        released
    }

    /// Register a key whose content is already in the store
    pub fn insert_cached(&self, key: CacheKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU8::new(EntryStatus::Cached as u8)));
    }

    /// Snapshot of all keys currently in `status`
    ///
    /// The snapshot may be stale as soon as it is returned.
    pub fn list_by_status(&self, status: EntryStatus) -> HashSet<CacheKey> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, slot)| slot.load(Ordering::Acquire) == status as u8)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every known key
    pub fn keys(&self) -> Vec<CacheKey> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = StatusCounts::default();
        for slot in entries.values() {
            match EntryStatus::from(slot.load(Ordering::Acquire)) {
                EntryStatus::Missing => counts.missing += 1,
                EntryStatus::Processing => counts.processing += 1,
                EntryStatus::Cached => counts.cached += 1,
                EntryStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    ///
    /// Owners still running re-create their entry on completion.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = entries.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AtomicU8::new(EntryStatus::Missing as u8))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_name(name)
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let table = EntryStateTable::new();
        table.ensure(&key("Judo"));
        assert!(table.try_begin_fetch(&key("Judo")));
        table.complete(&key("Judo"), true);

        table.ensure(&key("Judo"));
        assert_eq!(table.get(&key("Judo")), EntryStatus::Cached);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_get_registers_unknown_key() {
        let table = EntryStateTable::new();
        assert_eq!(table.peek(&key("Judo")), None);
        assert_eq!(table.get(&key("Judo")), EntryStatus::Missing);
        assert_eq!(table.peek(&key("Judo")), Some(EntryStatus::Missing));
    }

    #[test]
    fn test_try_begin_fetch_only_from_missing() {
        let table = EntryStateTable::new();
        let k = key("Wrestling");

        assert!(table.try_begin_fetch(&k));
        assert!(!table.try_begin_fetch(&k));
        assert_eq!(table.get(&k), EntryStatus::Processing);

        table.complete(&k, false);
        assert_eq!(table.get(&k), EntryStatus::Error);
        assert!(!table.try_begin_fetch(&k));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let table = Arc::new(EntryStateTable::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let k = key("Athletics");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = Arc::clone(&table);
                let winners = Arc::clone(&winners);
                let k = k.clone();
                thread::spawn(move || {
                    if table.try_begin_fetch(&k) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandon_returns_to_missing() {
        let table = EntryStateTable::new();
        let k = key("Judo");

        assert!(!table.abandon(&k));
        assert!(table.try_begin_fetch(&k));
        assert!(table.abandon(&k));
        assert_eq!(table.get(&k), EntryStatus::Missing);
        assert!(table.try_begin_fetch(&k));
    }

    #[test]
    fn test_list_by_status_and_counts() {
        let table = EntryStateTable::new();
        for name in ["Judo", "Basketball", "Athletics"] {
            table.ensure(&key(name));
        }
        table.insert_cached(key("Wrestling"));
        assert!(table.try_begin_fetch(&key("Judo")));

        let missing = table.list_by_status(EntryStatus::Missing);
        assert_eq!(missing.len(), 2);
        assert!(missing.contains(&key("Basketball")));

        let counts = table.counts();
        assert_eq!(counts.missing, 2);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.cached, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_insert_cached_keeps_existing() {
        let table = EntryStateTable::new();
        assert!(table.try_begin_fetch(&key("Judo")));
        table.insert_cached(key("Judo"));
        assert_eq!(table.get(&key("Judo")), EntryStatus::Processing);
    }

    #[test]
    fn test_complete_after_clear_recreates_entry() {
        let table = EntryStateTable::new();
        let k = key("Judo");
        assert!(table.try_begin_fetch(&k));

        table.clear();
        assert!(table.is_empty());

        table.complete(&k, true);
        assert_eq!(table.peek(&k), Some(EntryStatus::Cached));
    }
}
