//! # discipline-cache
//!
//! A disk-backed cache for discipline descriptions scraped from the web.
//!
//! ## Features
//!
//! - Each description is fetched at most once at a time, across any number
//!   of concurrent requests and the background sweeper
//! - Descriptions survive restarts; stored entries are picked up on open
//! - Requests never block the caller: results arrive through callbacks, or
//!   through an awaitable helper for async code
//! - Async-first design using tokio, with cooperative cancellation
//!
//! ## Usage
//!
//! ```no_run
//! use discipline_cache::{CacheConfig, CacheKey, DescriptionCache};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = DescriptionCache::open_default(CacheConfig::default()).await?;
//!
//!     // Seed the cache and let the sweeper download in the background
//!     cache.register_keys(["Judo", "Wrestling", "Cycling Road"].map(CacheKey::from_name));
//!     cache.start_sweep();
//!
//!     // Ask for one description without blocking
//!     cache.resolve(
//!         CacheKey::from_name("Judo"),
//!         |paragraphs| println!("{}", paragraphs.join("\n")),
//!         |error| eprintln!("no description: {}", error),
//!         Duration::from_secs(5),
//!     );
//!
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!     println!("Pending: {:?}", cache.list_pending());
//!
//!     cache.close().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, ContentFetcher, ContentStore,
    Description, DescriptionCache, EntryStateTable, EntryStatus, FsStore, HttpFetcher,
    ResolveHandle, StatusCounts,
};
pub use error::{CacheError, Result};
