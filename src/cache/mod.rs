//! # Description Cache
//!
//! Fetches discipline descriptions from a remote source, keeps them on disk
//! and serves them to concurrent callers.
//!
//! ## Features
//!
//! - **Single-flight fetching**: at most one fetch per key is in flight,
//!   however many requests and sweepers ask for it
//! - **Durable store**: one document per key, written atomically; the entry
//!   only becomes `Cached` once the write is on disk
//! - **Async requests**: callback-based [`DescriptionCache::resolve`] and the
//!   awaitable [`DescriptionCache::describe`]
//! - **Background sweeper**: fetches all pending keys with randomized pacing
//! - **Cooperative cancellation**: per request, for the sweeper, and for the
//!   whole cache on close
//!
//! ## Entry lifecycle
//!
//! ```text
//! Missing --claim--> Processing --ok--> Cached
//!    ^                   |  \--fail--> Error
//!    +----cancelled------+
//! ```
//!
//! Only [`DescriptionCache::clear_all`] resets `Cached` and `Error` entries.

pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod key;
pub mod store;
pub(crate) mod sweeper;
pub mod table;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, DEFAULT_BASE_URL};
pub use coordinator::{DescriptionCache, ResolveHandle};
pub use fetcher::{ContentFetcher, HttpFetcher};
pub use key::CacheKey;
pub use store::{ContentStore, FsStore};
pub use table::EntryStateTable;
pub use types::{CacheStats, Description, EntryStatus, StatusCounts};
