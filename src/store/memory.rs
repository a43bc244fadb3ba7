use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::core::currency::{CurrencyCode, RateSnapshot};
use crate::core::error::RateError;
use crate::store::CacheEntry;

type PendingRefresh = Shared<BoxFuture<'static, Result<Arc<RateSnapshot>, RateError>>>;

struct StoreInner {
    ttl: TimeDelta,
    entries: Mutex<HashMap<CurrencyCode, CacheEntry>>,
    in_flight: Mutex<HashMap<CurrencyCode, PendingRefresh>>,
}

/// In-memory snapshot store, one entry per base currency.
///
/// Cloning is cheap and every clone shares the same entries. Entries are
/// invalidated lazily: nothing is evicted, an entry simply stops being
/// returned by [`get_valid`](Self::get_valid) once it expires.
#[derive(Clone)]
pub struct RateStore {
    inner: Arc<StoreInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight marker for a base once its refresh task ends,
/// including when the task panics.
struct InFlightGuard {
    store: RateStore,
    base: CurrencyCode,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.store.inner.in_flight).remove(&self.base);
    }
}

impl RateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The latest entry for `base`, whether or not it is still valid.
    pub fn get(&self, base: &CurrencyCode) -> Option<CacheEntry> {
        lock(&self.inner.entries).get(base).cloned()
    }

    /// The entry for `base` if it has not expired at `now`.
    pub fn get_valid(&self, base: &CurrencyCode, now: DateTime<Utc>) -> Option<CacheEntry> {
        match self.get(base) {
            Some(entry) if self.is_valid(&entry, now) => {
                debug!(%base, "Cache HIT");
                Some(entry)
            }
            Some(_) => {
                debug!(%base, "Cache entry expired");
                None
            }
            None => {
                debug!(%base, "Cache MISS");
                None
            }
        }
    }

    /// Replaces the entry for `base` wholesale.
    pub fn put(&self, base: CurrencyCode, snapshot: Arc<RateSnapshot>) -> CacheEntry {
        let expires_at = snapshot
            .fetched_at
            .checked_add_signed(self.inner.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = CacheEntry {
            snapshot,
            expires_at,
        };
        debug!(%base, %expires_at, "Cache PUT");
        lock(&self.inner.entries).insert(base, entry.clone());
        entry
    }

    pub fn is_valid(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_valid(now)
    }

    pub fn is_refreshing(&self, base: &CurrencyCode) -> bool {
        lock(&self.inner.in_flight).contains_key(base)
    }

    /// Runs `fetch` and stores its snapshot, unless a refresh for `base` is
    /// already running, in which case the caller waits on that one instead.
    ///
    /// The fetch runs on its own task: dropping every caller does not cancel
    /// it, and its result is still written to the store.
    pub async fn refresh_with<F, Fut>(
        &self,
        base: &CurrencyCode,
        fetch: F,
    ) -> Result<Arc<RateSnapshot>, RateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RateSnapshot> + Send + 'static,
    {
        let pending = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(base) {
                Some(pending) => {
                    debug!(%base, "Joining in-flight refresh");
                    pending.clone()
                }
                None => {
                    debug!(%base, "Starting refresh");
                    let guard = InFlightGuard {
                        store: self.clone(),
                        base: base.clone(),
                    };
                    let fetch = fetch();
                    let handle = tokio::spawn(async move {
                        let snapshot = Arc::new(fetch.await);
                        guard.store.put(guard.base.clone(), Arc::clone(&snapshot));
                        drop(guard);
                        snapshot
                    });
                    let pending = async move {
                        handle
                            .await
                            .map_err(|e| RateError::Internal(format!("Refresh task failed: {e}")))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(base.clone(), pending.clone());
                    pending
                }
            }
        };
        pending.await
    }
}
