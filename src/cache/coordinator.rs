//! Fetch coordination and the public cache component
//!
//! A request for a key takes one of three paths:
//! - **hit**: the entry is `Cached`, content is read from the store
//! - **owner**: the request wins the `Missing -> Processing` claim and fetches
//! - **waiter**: someone else is fetching; the request polls the entry status
//!   until it settles or the request's maximum wait elapses
//!
//! Waiters poll instead of subscribing to the owner. If an owner dies without
//! completing, its waiters simply time out.

use crate::cache::config::CacheConfig;
use crate::cache::fetcher::{ContentFetcher, HttpFetcher};
use crate::cache::key::CacheKey;
use crate::cache::store::{ContentStore, FsStore};
use crate::cache::sweeper::Sweeper;
use crate::cache::table::EntryStateTable;
use crate::cache::types::{CacheStats, Description, EntryStatus, StatsCounters, StatusCounts};
use crate::error::{CacheError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by request tasks and the sweeper
pub(crate) struct Inner {
    pub(crate) config: CacheConfig,
    pub(crate) table: EntryStateTable,
    fetcher: Arc<dyn ContentFetcher>,
    store: Arc<dyn ContentStore>,
    stats: StatsCounters,
    /// Parent of every request and sweeper token; fired by `close`
    pub(crate) shutdown: CancellationToken,
}

/// A won claim on a key
///
/// Dropping the claim without completing it hands the key back
/// (`Processing -> Missing`), which covers cancelled and panicking owners.
struct Claim<'a> {
    table: &'a EntryStateTable,
    key: &'a CacheKey,
    done: bool,
}

impl<'a> Claim<'a> {
    fn new(table: &'a EntryStateTable, key: &'a CacheKey) -> Self {
        Self {
            table,
            key,
            done: false,
        }
    }

    fn complete(mut self, success: bool) {
        self.table.complete(self.key, success);
        self.done = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.table.abandon(self.key);
        }
    }
}

impl Inner {
    /// Resolve `key` inline, following the hit / owner / waiter protocol
    pub(crate) async fn lookup(
        &self,
        key: &CacheKey,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Description> {
        let deadline = Instant::now() + max_wait;

        loop {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled(key.to_string()));
            }

            if self.table.get(key) == EntryStatus::Cached {
                StatsCounters::incr(&self.stats.hits);
                debug!("Cache hit: {}", key);
                return self.read_cached(key).await;
            }

            if self.table.try_begin_fetch(key) {
                return self.fetch_as_owner(key, cancel).await;
            }

            StatsCounters::incr(&self.stats.waits);
            debug!("Waiting for in-flight fetch: {}", key);

            match self.wait_while_processing(key, deadline, cancel).await? {
                EntryStatus::Cached => return self.read_cached(key).await,
                EntryStatus::Error => return Err(CacheError::FetchFailed(key.to_string())),
                EntryStatus::Processing => {
                    StatsCounters::incr(&self.stats.timeouts);
                    debug!("Gave up waiting for {} after {:?}", key, max_wait);
                    return Err(CacheError::Timeout {
                        key: key.to_string(),
                        waited: max_wait,
                    });
                }
                // the owner gave its claim back; try to claim it ourselves
                EntryStatus::Missing => continue,
            }
        }
    }

    /// Fetch and store `key`; the caller must have won `try_begin_fetch`
    ///
    /// Cancellation only interrupts the fetch. A fetched description is always
    /// written and completed, so a stored document never sits behind a
    /// `Missing` entry.
    pub(crate) async fn fetch_as_owner(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<Description> {
        let claim = Claim::new(&self.table, key);
        StatsCounters::incr(&self.stats.fetches);
        info!("Downloading description: {}", key);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                drop(claim);
                info!("Download cancelled: {}", key);
                return Err(CacheError::Cancelled(key.to_string()));
            }
            fetched = self.fetcher.fetch(key) => fetched,
        };

        // once content is fetched the write always runs to completion
        let outcome = match fetched {
            Ok(description) => self.store.write(key, &description).await.map(|()| description),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(description) => {
                claim.complete(true);
                StatsCounters::incr(&self.stats.fetches_succeeded);
                info!("Cached {} paragraphs for {}", description.len(), key);
                Ok(description)
            }
            Err(e) => {
                claim.complete(false);
                StatsCounters::incr(&self.stats.fetches_failed);
                warn!("Failed to download {}: {}", key, e);
                Err(e)
            }
        }
    }

    /// Poll until the entry leaves `Processing` or `deadline` passes
    ///
    /// Returns the last observed status; `Processing` means the wait timed out.
    async fn wait_while_processing(
        &self,
        key: &CacheKey,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EntryStatus> {
        loop {
            let status = self.table.get(key);
            if status != EntryStatus::Processing {
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(EntryStatus::Processing);
            }

            let nap = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(CacheError::Cancelled(key.to_string())),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn read_cached(&self, key: &CacheKey) -> Result<Description> {
        self.store.read(key).await.inspect_err(|e| {
            StatsCounters::incr(&self.stats.read_failures);
            warn!("Stored description for {} is unreadable: {}", key, e);
        })
    }
}

/// Handle to a request started with [`DescriptionCache::resolve`]
#[derive(Debug)]
pub struct ResolveHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ResolveHandle {
    /// Abort the request; no callback runs if it had not finished yet
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the request task (and its callback) has finished
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Resolve task ended abnormally: {}", e);
        }
    }
}

/// Disk-backed cache of discipline descriptions
///
/// Each distinct key is fetched at most once at a time, no matter how many
/// requests for it are running or whether the background sweeper is active.
///
/// # Example
///
/// ```no_run
/// use discipline_cache::{CacheConfig, CacheKey, DescriptionCache};
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let cache = DescriptionCache::open_default(CacheConfig::from_env()?).await?;
/// cache.register_keys(["Judo", "Basketball"].map(CacheKey::from_name));
/// cache.start_sweep();
///
/// let judo = cache
///     .describe(&CacheKey::from_name("Judo"), Duration::from_secs(5))
///     .await?;
/// println!("{}", judo.join("\n"));
///
/// cache.close().await;
/// # Ok(())
/// # }
/// ```
pub struct DescriptionCache {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl DescriptionCache {
    /// Open a cache over `store`, registering everything already stored as cached
    pub async fn open(
        config: CacheConfig,
        fetcher: Arc<dyn ContentFetcher>,
        store: Arc<dyn ContentStore>,
    ) -> Result<Self> {
        config.validate()?;

        let table = EntryStateTable::new();
        let stored = store.list_keys().await?;
        let restored = stored.len();
        for key in stored {
            table.insert_cached(key);
        }
        info!("Opened description cache with {} stored descriptions", restored);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                table,
                fetcher,
                store,
                stats: StatsCounters::default(),
                shutdown: CancellationToken::new(),
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Open a cache backed by [`FsStore`] and [`HttpFetcher`]
    pub async fn open_default(config: CacheConfig) -> Result<Self> {
        let store = Arc::new(FsStore::new(&config.cache_dir)?);
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::open(config, fetcher, store).await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register keys as `Missing`; keys already known keep their status
    pub fn register_keys<I>(&self, keys: I)
    where
        I: IntoIterator<Item = CacheKey>,
    {
        for key in keys {
            self.inner.table.ensure(&key);
        }
    }

    /// Request the description for `key` without blocking
    ///
    /// Exactly one of `on_success` / `on_failure` is called exactly once,
    /// from a runtime worker, unless the request is cancelled through the
    /// returned handle or the cache is closed first. `max_wait` only bounds
    /// the time spent waiting on someone else's fetch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn resolve<S, F>(
        &self,
        key: CacheKey,
        on_success: S,
        on_failure: F,
        max_wait: Duration,
    ) -> ResolveHandle
    where
        S: FnOnce(Description) + Send + 'static,
        F: FnOnce(CacheError) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.shutdown.child_token();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            match inner.lookup(&key, max_wait, &token).await {
                Ok(description) => on_success(description),
                Err(e) if e.is_cancelled() => debug!("Request for {} cancelled", key),
                Err(e) => on_failure(e),
            }
        });

        ResolveHandle { cancel, task }
    }

    /// Awaitable form of [`resolve`](Self::resolve)
    pub async fn describe(&self, key: &CacheKey, max_wait: Duration) -> Result<Description> {
        let cancel = self.inner.shutdown.child_token();
        self.inner.lookup(key, max_wait, &cancel).await
    }

    /// Status of `key`; unknown keys report `Missing` without being registered
    pub fn status(&self, key: &CacheKey) -> EntryStatus {
        self.inner.table.peek(key).unwrap_or(EntryStatus::Missing)
    }

    /// Keys not fetched yet
    pub fn list_pending(&self) -> HashSet<CacheKey> {
        self.inner.table.list_by_status(EntryStatus::Missing)
    }

    /// Every key managed by the cache
    pub fn list_keys(&self) -> Vec<CacheKey> {
        self.inner.table.keys()
    }

    pub fn counts(&self) -> StatusCounts {
        self.inner.table.counts()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Start the background sweeper; no-op if it is already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweep(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|s| !s.is_finished()) {
            debug!("Sweeper already running");
            return;
        }
        *sweeper = Some(Sweeper::spawn(Arc::clone(&self.inner)));
    }

    /// Stop the background sweeper and wait for it to exit; no-op if stopped
    pub async fn stop_sweep(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    /// Forget every entry and delete all stored content
    ///
    /// Not coordinated with fetches in flight: an owner that completes after
    /// the clear re-creates its entry and its stored document.
    pub async fn clear_all(&self) -> Result<()> {
        self.inner.table.clear();
        self.inner.store.delete_all().await?;
        info!("Cleared description cache");
        Ok(())
    }

    /// Stop the sweeper and cancel every request still running
    ///
    /// Cancelled owners hand their keys back as `Missing`.
    pub async fn close(&self) {
        self.stop_sweep().await;
        self.inner.shutdown.cancel();
        info!("Closed description cache: {}", self.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Fetcher returning fixed paragraphs after a delay
    struct SlowFetcher {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentFetcher for SlowFetcher {
        async fn fetch(&self, key: &CacheKey) -> Result<Description> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![format!("about {}", key)])
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        docs: Mutex<HashMap<CacheKey, Description>>,
    }

    #[async_trait]
    impl ContentStore for MemoryStore {
        async fn exists(&self, key: &CacheKey) -> Result<bool> {
            Ok(self.docs.lock().unwrap().contains_key(key))
        }

        async fn write(&self, key: &CacheKey, description: &[String]) -> Result<()> {
            self.docs.lock().unwrap().insert(key.clone(), description.to_vec());
            Ok(())
        }

        async fn read(&self, key: &CacheKey) -> Result<Description> {
            self.docs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::store(key.as_str(), "not found"))
        }

        async fn delete_all(&self) -> Result<()> {
            self.docs.lock().unwrap().clear();
            Ok(())
        }

        async fn list_keys(&self) -> Result<Vec<CacheKey>> {
            Ok(self.docs.lock().unwrap().keys().cloned().collect())
        }
    }

    async fn cache_with(delay: Duration) -> (DescriptionCache, Arc<SlowFetcher>, Arc<MemoryStore>) {
        let fetcher = Arc::new(SlowFetcher {
            delay,
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::default());
        let config = CacheConfig::builder()
            .poll_interval(Duration::from_millis(10))
            .build();
        let cache = DescriptionCache::open(config, fetcher.clone(), store.clone())
            .await
            .unwrap();
        (cache, fetcher, store)
    }

    #[tokio::test]
    async fn test_describe_fetches_then_hits() {
        let (cache, fetcher, _) = cache_with(Duration::from_millis(5)).await;
        let key = CacheKey::from_name("Judo");

        let first = cache.describe(&key, Duration::from_secs(1)).await.unwrap();
        let second = cache.describe(&key, Duration::from_secs(1)).await.unwrap();

        assert_eq!(first, vec!["about judo".to_string()]);
        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status(&key), EntryStatus::Cached);

        let stats = cache.stats();
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_delivers_through_callback() {
        let (cache, _, _) = cache_with(Duration::from_millis(5)).await;
        let (tx, rx) = oneshot::channel();

        cache.resolve(
            CacheKey::from_name("Basketball"),
            move |description| {
                let _ = tx.send(description);
            },
            |e| panic!("unexpected failure: {}", e),
            Duration::from_secs(1),
        );

        let description = rx.await.unwrap();
        assert_eq!(description, vec!["about basketball".to_string()]);
    }

    #[tokio::test]
    async fn test_waiter_observes_error_state() {
        let (cache, fetcher, _) = cache_with(Duration::ZERO).await;
        let key = CacheKey::from_name("Judo");

        assert!(cache.inner.table.try_begin_fetch(&key));
        cache.inner.table.complete(&key, false);

        let err = cache.describe(&key, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, CacheError::FetchFailed(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waiter_takes_over_abandoned_claim() {
        let (cache, fetcher, _) = cache_with(Duration::ZERO).await;
        let key = CacheKey::from_name("Judo");
        assert!(cache.inner.table.try_begin_fetch(&key));

        let table_key = key.clone();
        let cache = Arc::new(cache);
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.describe(&key, Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.inner.table.abandon(&table_key));

        let description = waiter.await.unwrap().unwrap();
        assert_eq!(description, vec!["about judo".to_string()]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_owner_hands_key_back() {
        let (cache, _, store) = cache_with(Duration::from_secs(10)).await;
        let key = CacheKey::from_name("Judo");

        let handle = cache.resolve(
            key.clone(),
            |_| panic!("cancelled request must not succeed"),
            |e| panic!("cancelled request must not fail: {}", e),
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.status(&key), EntryStatus::Processing);

        handle.cancel();
        handle.join().await;

        assert_eq!(cache.status(&key), EntryStatus::Missing);
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_requests() {
        let (cache, _, _) = cache_with(Duration::from_secs(10)).await;
        let key = CacheKey::from_name("Judo");

        let handle = cache.resolve(key.clone(), |_| {}, |_| {}, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(20)).await;

        cache.close().await;
        handle.join().await;
        assert_eq!(cache.status(&key), EntryStatus::Missing);
    }

    /// Fetcher that fires a cancellation token just before returning
    struct CancellingFetcher {
        token: CancellationToken,
    }

    #[async_trait]
    impl ContentFetcher for CancellingFetcher {
        async fn fetch(&self, key: &CacheKey) -> Result<Description> {
            self.token.cancel();
            Ok(vec![format!("about {}", key)])
        }
    }

    /// Store that yields once before each write
    #[derive(Default)]
    struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ContentStore for YieldingStore {
        async fn exists(&self, key: &CacheKey) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn write(&self, key: &CacheKey, description: &[String]) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.write(key, description).await
        }

        async fn read(&self, key: &CacheKey) -> Result<Description> {
            self.inner.read(key).await
        }

        async fn delete_all(&self) -> Result<()> {
            self.inner.delete_all().await
        }

        async fn list_keys(&self) -> Result<Vec<CacheKey>> {
            self.inner.list_keys().await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_write_still_caches() {
        let token = CancellationToken::new();
        let fetcher = Arc::new(CancellingFetcher {
            token: token.clone(),
        });
        let store = Arc::new(YieldingStore::default());
        let cache = DescriptionCache::open(CacheConfig::default(), fetcher, store.clone())
            .await
            .unwrap();
        let key = CacheKey::from_name("Judo");

        assert!(cache.inner.table.try_begin_fetch(&key));
        let description = cache.inner.fetch_as_owner(&key, &token).await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(description, vec!["about judo".to_string()]);
        assert_eq!(cache.status(&key), EntryStatus::Cached);
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_does_not_register() {
        let (cache, _, _) = cache_with(Duration::ZERO).await;
        assert_eq!(cache.status(&CacheKey::from_name("Judo")), EntryStatus::Missing);
        assert!(cache.list_keys().is_empty());
    }
}
