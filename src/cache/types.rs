//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stored content: the ordered paragraphs of a discipline description
pub type Description = Vec<String>;

/// Lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryStatus {
    /// Known but not fetched yet
    Missing = 0,

    /// A fetch is in flight
    Processing = 1,

    /// Content is durably stored
    Cached = 2,

    /// The last fetch attempt failed
    Error = 3,
}

impl From<u8> for EntryStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => EntryStatus::Missing,
            1 => EntryStatus::Processing,
            2 => EntryStatus::Cached,
            _ => EntryStatus::Error,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Missing => write!(f, "missing"),
            EntryStatus::Processing => write!(f, "processing"),
            EntryStatus::Cached => write!(f, "cached"),
            EntryStatus::Error => write!(f, "error"),
        }
    }
}

/// Number of entries per status at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub missing: usize,
    pub processing: usize,
    pub cached: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.missing + self.processing + self.cached + self.error
    }
}

/// Statistics for cache activity monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Requests served from the store without fetching
    pub hits: u64,

    /// Fetches started (by requests or by the sweeper)
    pub fetches: u64,

    /// Fetches that ended with content durably stored
    pub fetches_succeeded: u64,

    /// Fetches that ended in the error state
    pub fetches_failed: u64,

    /// Requests that waited on someone else's fetch
    pub waits: u64,

    /// Waiters that gave up
    pub timeouts: u64,

    /// Cached entries whose stored content could not be read
    pub read_failures: u64,
}

impl CacheStats {
    /// Percentage of requests answered straight from the store
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.fetches + self.waits;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, fetches: {} ({} ok, {} failed), waits: {}, timeouts: {}, read_failures: {} }}",
            self.hits,
            self.fetches,
            self.fetches_succeeded,
            self.fetches_failed,
            self.waits,
            self.timeouts,
            self.read_failures
        )
    }
}

/// Lock-free counters backing [`CacheStats`]
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub fetches: AtomicU64,
    pub fetches_succeeded: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub waits: AtomicU64,
    pub timeouts: AtomicU64,
    pub read_failures: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }
}
