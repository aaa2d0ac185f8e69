//! At-most-one-fetch-per-key async cache.
//!
//! Every key is in one of three states: absent, pending (a fetch is in
//! flight) or resolved (the value is stored). The transition from absent to
//! pending happens under a single lock acquisition, so two callers can never
//! both start a fetch for the same key. Callers that find a pending entry
//! subscribe to the in-flight fetch and receive the same result.
//!
//! Inside a Tokio runtime fetches run on their own task: a caller that gives
//! up waiting does not cancel the fetch, and the result is still stored for
//! later callers. Without a runtime the first caller drives the fetch inline.
//!
//! A failed fetch reverts the key to absent. Failures are never cached, so
//! the next call retries.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CacheError;

type FetchOutcome<V> = Result<Arc<V>, CacheError>;
type SharedFetch<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

/// Observable state of one key.
#[derive(Debug)]
pub enum EntryState<V> {
    Resolved(Arc<V>),
    /// A fetch is in flight; consumers should show their placeholder.
    Pending,
    Absent,
}

impl<V> EntryState<V> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, EntryState::Resolved(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EntryState::Pending)
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from a resolved entry
    pub hits: u64,
    /// Calls that joined a fetch already in flight
    pub joined: u64,
    /// Fetches started
    pub fetches: u64,
    /// Fetches that failed
    pub failures: u64,
    /// Resolved entries dropped by the LRU bound
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    joined: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

struct PendingFetch<V> {
    id: u64,
    future: SharedFetch<V>,
}

struct Inner<K: Hash + Eq, V> {
    resolved: LruCache<K, Arc<V>>,
    pending: HashMap<K, PendingFetch<V>>,
    next_fetch_id: u64,
}

pub struct KeyedAsyncCache<K: Hash + Eq, V> {
    name: &'static str,
    inner: Arc<Mutex<Inner<K, V>>>,
    counters: Arc<Counters>,
}

enum Lookup<V> {
    Hit(Arc<V>),
    Join(SharedFetch<V>),
    Start {
        id: u64,
        settle: oneshot::Sender<FetchOutcome<V>>,
        in_flight: SharedFetch<V>,
    },
}

impl<K, V> KeyedAsyncCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Cache that keeps every resolved entry for its lifetime.
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_capacity(name, None)
    }

    /// Cache bounded to `capacity` resolved entries, evicting the least
    /// recently used. `None` or `Some(0)` means unbounded.
    pub fn with_capacity(name: &'static str, capacity: Option<usize>) -> Self {
        let resolved = match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                resolved,
                pending: HashMap::new(),
                next_fetch_id: 0,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Return the value for `key`, fetching it with `fetch` if needed.
    ///
    /// `fetch` is only invoked when the key is neither resolved nor pending.
    /// It is called after the key is marked pending and outside the cache
    /// lock, so it may inspect the cache. Every caller waiting on the same
    /// fetch receives the same `Arc` or the same error.
    ///
    /// Inside a Tokio runtime the fetch runs on its own task. Without one
    /// (e.g. under `futures::executor::block_on`) the calling future drives
    /// the fetch itself; dropping that caller abandons the fetch and its
    /// waiters receive [`CacheError::FetchFailed`].
    pub async fn try_get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (id, settle, in_flight) = match self.reserve(&key) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Join(in_flight) => return in_flight.await,
            Lookup::Start {
                id,
                settle,
                in_flight,
            } => (id, settle, in_flight),
        };

        debug!(cache = self.name, key = %key, "Starting fetch");
        let drive = self.drive_fetch(key, id, fetch(), settle);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(drive);
                in_flight.await
            }
            Err(_) => drive.await,
        }
    }

    /// Answer from a resolved entry, join a pending one, or mark `key`
    /// pending for a new fetch. One lock acquisition.
    fn reserve(&self, key: &K) -> Lookup<V> {
        let mut inner = self.inner.lock();

        if let Some(value) = inner.resolved.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(Arc::clone(value));
        }

        if let Some(pending) = inner.pending.get(key) {
            self.counters.joined.fetch_add(1, Ordering::Relaxed);
            return Lookup::Join(pending.future.clone());
        }

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let id = inner.next_fetch_id;
        inner.next_fetch_id += 1;

        let (settle, settled) = oneshot::channel();
        let in_flight = self.await_settled(key.clone(), id, settled);
        inner.pending.insert(
            key.clone(),
            PendingFetch {
                id,
                future: in_flight.clone(),
            },
        );
        Lookup::Start {
            id,
            settle,
            in_flight,
        }
    }

    /// Like [`try_get_or_fetch`](Self::try_get_or_fetch), but a failed fetch
    /// yields `placeholder` for this call only.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F, placeholder: Arc<V>) -> Arc<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        match self.try_get_or_fetch(key, fetch).await {
            Ok(value) => value,
            Err(err) => {
                warn!(cache = self.name, error = %err, "Serving placeholder");
                placeholder
            }
        }
    }

    /// Run `fetch`, publish its outcome and hand it to the waiters.
    fn drive_fetch<Fut, E>(
        &self,
        key: K,
        id: u64,
        fetch: Fut,
        settle: oneshot::Sender<FetchOutcome<V>>,
    ) -> impl Future<Output = FetchOutcome<V>> + Send + 'static
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let counters = Arc::clone(&self.counters);
        let name = self.name;

        async move {
            let outcome = fetch
                .await
                .map(Arc::new)
                .map_err(|err| CacheError::FetchFailed {
                    key: key.to_string(),
                    message: err.to_string(),
                });

            publish(&inner, &counters, name, &key, id, &outcome);
            let _ = settle.send(outcome.clone());
            outcome
        }
    }

    /// Shared future handed to joiners. A fetch dropped before it settled
    /// (panicked task, abandoned inline caller) reverts the key to absent.
    fn await_settled(
        &self,
        key: K,
        id: u64,
        settled: oneshot::Receiver<FetchOutcome<V>>,
    ) -> SharedFetch<V> {
        let inner = Arc::clone(&self.inner);
        let counters = Arc::clone(&self.counters);
        let name = self.name;

        async move {
            match settled.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let outcome = Err(CacheError::FetchFailed {
                        key: key.to_string(),
                        message: "fetch did not complete".to_string(),
                    });
                    publish(&inner, &counters, name, &key, id, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Resolved value for `key`, without fetching.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.lock().resolved.get(key).cloned()
    }

    pub fn peek(&self, key: &K) -> EntryState<V> {
        let inner = self.inner.lock();
        if let Some(value) = inner.resolved.peek(key) {
            EntryState::Resolved(Arc::clone(value))
        } else if inner.pending.contains_key(key) {
            EntryState::Pending
        } else {
            EntryState::Absent
        }
    }

    /// Forget `key`. An in-flight fetch still completes for its waiters but
    /// its result is not stored.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let resolved = inner.resolved.pop(key).is_some();
        let pending = inner.pending.remove(key).is_some();
        resolved || pending
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.resolved.clear();
        inner.pending.clear();
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.inner.lock().resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Settle fetch `id` for `key`: store a success, drop the pending entry
/// either way. A fetch whose entry was invalidated or replaced publishes
/// nothing.
fn publish<K, V>(
    inner: &Mutex<Inner<K, V>>,
    counters: &Counters,
    name: &'static str,
    key: &K,
    id: u64,
    outcome: &FetchOutcome<V>,
) where
    K: Hash + Eq + Clone + fmt::Display,
{
    let mut inner = inner.lock();
    let current = inner.pending.get(key).map(|pending| pending.id) == Some(id);
    if !current {
        debug!(cache = name, key = %key, "Discarding result of invalidated fetch");
        return;
    }
    inner.pending.remove(key);

    match outcome {
        Ok(value) => {
            if let Some((evicted, _)) = inner.resolved.push(key.clone(), Arc::clone(value)) {
                if &evicted != key {
                    counters.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(cache = name, key = %evicted, "Evicted least recently used entry");
                }
            }
        }
        Err(err) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            debug!(cache = name, error = %err, "Fetch failed; key reverts to absent");
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for KeyedAsyncCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("KeyedAsyncCache")
            .field("name", &self.name)
            .field("resolved", &inner.resolved.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}
