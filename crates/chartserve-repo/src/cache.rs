//! Single-flight chart cache
//!
//! Features:
//! - At most one upstream fetch per key; concurrent callers share its outcome
//! - Failures are handed to every waiter and then forgotten
//! - Successes live as long as the cache
//! - A fetch runs to completion in its own task, even when every caller
//!   has gone away, so whatever it owns is released promptly

use chartserve_core::{CacheKey, CachedChart};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RepoError, Result};

type FetchOutcome = std::result::Result<Arc<CachedChart>, Arc<RepoError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;
type Slots = Arc<Mutex<HashMap<CacheKey, Slot>>>;

enum Slot {
    Ready(Arc<CachedChart>),
    Pending { id: u64, fetch: SharedFetch },
}

/// What happened to one `get`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    /// Served from a stored chart
    Hit,
    /// Started an upstream fetch
    Miss,
    /// Joined a fetch already in flight
    Coalesced,
    /// The fetch this call waited on failed
    Failed,
}

impl CacheEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEvent::Hit => "hit",
            CacheEvent::Miss => "miss",
            CacheEvent::Coalesced => "coalesced",
            CacheEvent::Failed => "failed",
        }
    }
}

/// Receives cache events
pub trait CacheEventSink: Send + Sync {
    fn record(&self, event: CacheEvent, key: &CacheKey);
}

/// Discards events
#[derive(Debug, Default)]
pub struct NoopSink;

impl CacheEventSink for NoopSink {
    fn record(&self, _event: CacheEvent, _key: &CacheKey) {}
}

/// Logs events at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl CacheEventSink for TracingSink {
    fn record(&self, event: CacheEvent, key: &CacheKey) {
        tracing::debug!(
            event = event.as_str(),
            url = %key.repository,
            chart = %key.name,
            version = %key.version,
            "chart cache"
        );
    }
}

/// Counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub failures: u64,
}

/// Chart cache keyed by repository, name and resolved version
pub struct ChartCache {
    slots: Slots,
    sink: Arc<dyn CacheEventSink>,
    next_fetch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl Default for ChartCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartCache {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NoopSink))
    }

    pub fn with_sink(sink: Arc<dyn CacheEventSink>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            sink,
            next_fetch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        lock(&self.slots)
    }

    fn emit(&self, event: CacheEvent, key: &CacheKey) {
        let counter = match event {
            CacheEvent::Hit => &self.hits,
            CacheEvent::Miss => &self.misses,
            CacheEvent::Coalesced => &self.coalesced,
            CacheEvent::Failed => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.sink.record(event, key);
    }

    /// Cached chart for `key`, downloading the archive with `fetch` on a miss
    ///
    /// `fetch` is only called when no stored chart and no in-flight fetch
    /// exist for the key. The download is spawned onto the runtime and
    /// settles the slot itself, so cancelling callers never strands it.
    pub async fn get<F>(&self, key: CacheKey, fetch: F) -> Result<Arc<CachedChart>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Vec<u8>>>,
    {
        let future = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(Slot::Ready(chart)) => {
                    let chart = chart.clone();
                    drop(slots);
                    self.emit(CacheEvent::Hit, &key);
                    return Ok(chart);
                }
                Some(Slot::Pending { fetch: pending, .. }) => {
                    let future = pending.clone();
                    drop(slots);
                    self.emit(CacheEvent::Coalesced, &key);
                    future
                }
                None => {
                    let id = self.next_fetch.fetch_add(1, Ordering::Relaxed);
                    let task = tokio::spawn(run_fetch(self.slots.clone(), key.clone(), id, fetch()));
                    let future = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Arc::new(RepoError::Other(format!("chart download task failed: {}", e))))
                        })
                    }
                    .boxed()
                    .shared();
                    slots.insert(key.clone(), Slot::Pending { id, fetch: future.clone() });
                    drop(slots);
                    self.emit(CacheEvent::Miss, &key);
                    future
                }
            }
        };

        future.await.map_err(|e| {
            self.emit(CacheEvent::Failed, &key);
            RepoError::Shared(e)
        })
    }

    /// Stored chart without fetching
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<CachedChart>> {
        match self.slots().get(key) {
            Some(Slot::Ready(chart)) => Some(chart.clone()),
            _ => None,
        }
    }

    /// Number of stored charts
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Download and unpack one chart, then settle its slot
///
/// The slot is left alone when a newer fetch has replaced it.
async fn run_fetch(
    slots: Slots,
    key: CacheKey,
    id: u64,
    download: BoxFuture<'static, Result<Vec<u8>>>,
) -> FetchOutcome {
    let outcome = match download.await {
        Ok(archive) => CachedChart::from_archive(key.clone(), &archive)
            .map(Arc::new)
            .map_err(|e| Arc::new(RepoError::from(e))),
        Err(e) => Err(Arc::new(e)),
    };

    let mut guard = lock(&slots);
    let current = matches!(guard.get(&key), Some(Slot::Pending { id: pending, .. }) if *pending == id);
    if current {
        match &outcome {
            Ok(chart) => {
                guard.insert(key, Slot::Ready(chart.clone()));
            }
            Err(_) => {
                guard.remove(&key);
            }
        }
    }
    drop(guard);
    outcome
}
