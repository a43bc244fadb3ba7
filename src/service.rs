//! Cache-first access to rates, shared by the gateway, the scheduler and
//! in-process subscribers.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::config::AppConfig;
use crate::core::currency::{CurrencyCode, RateSnapshot};
use crate::core::error::RateError;
use crate::core::resolver::RateResolver;
use crate::providers::build_providers;
use crate::scheduler::RefreshTarget;
use crate::store::RateStore;

/// What a subscriber sees for one base currency.
#[derive(Debug, Clone, Default)]
pub struct RatesView {
    pub rates: Option<Arc<RateSnapshot>>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

struct ServiceInner {
    resolver: RateResolver,
    store: RateStore,
    default_base: CurrencyCode,
    views: Mutex<HashMap<CurrencyCode, watch::Sender<RatesView>>>,
}

#[derive(Clone)]
pub struct RateService {
    inner: Arc<ServiceInner>,
}

impl RateService {
    pub fn new(resolver: RateResolver, store: RateStore, default_base: CurrencyCode) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                resolver,
                store,
                default_base,
                views: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = build_providers(&config.providers)?;
        Ok(Self::new(
            RateResolver::new(providers),
            RateStore::new(config.cache_ttl()),
            config.base_currency.clone(),
        ))
    }

    pub fn resolver(&self) -> &RateResolver {
        &self.inner.resolver
    }

    pub fn store(&self) -> &RateStore {
        &self.inner.store
    }

    pub fn default_base(&self) -> &CurrencyCode {
        &self.inner.default_base
    }

    /// Reference currencies other than `base`.
    fn reference_targets(&self, base: &CurrencyCode) -> BTreeSet<CurrencyCode> {
        let mut targets = self.resolver().reference().supported();
        targets.remove(base);
        targets
    }

    /// Codes worth keeping in the entry for `base` beyond the ones a caller
    /// needs: the reference currencies and whatever the entry already holds.
    fn tracked_targets(&self, base: &CurrencyCode) -> BTreeSet<CurrencyCode> {
        let mut targets = self.reference_targets(base);
        if let Some(entry) = self.store().get(base) {
            targets.extend(entry.snapshot.rates.keys().cloned());
        }
        targets
    }

    /// Cached snapshot for `base` if still valid, otherwise a fresh one.
    pub async fn rates(&self, base: &CurrencyCode) -> Result<Arc<RateSnapshot>, RateError> {
        if let Some(entry) = self.store().get_valid(base, Utc::now()) {
            return Ok(entry.snapshot);
        }
        self.refresh(base).await
    }

    /// Rates for `targets` only, served from the cache when it covers them.
    pub async fn rates_for(
        &self,
        base: &CurrencyCode,
        targets: &BTreeSet<CurrencyCode>,
    ) -> Result<RateSnapshot, RateError> {
        // Identity pairs never touch the store or the views
        if targets.iter().all(|t| t == base) {
            return Ok(self.resolver().resolve_codes(base, targets).await);
        }

        let snapshot = match self.store().get_valid(base, Utc::now()) {
            Some(entry) if entry.snapshot.covers(targets) => entry.snapshot,
            _ => {
                self.resolve_and_store(base, targets.clone(), self.tracked_targets(base))
                    .await?
            }
        };

        let projected = snapshot.project(targets);
        if projected.covers(targets) {
            return Ok(projected);
        }

        // A refresh we joined was started for other codes
        let reference = self.resolver().reference();
        let fills = targets
            .iter()
            .filter(|t| projected.rate(t).is_none())
            .map(|t| (t.clone(), reference.rate_or_default(base, t)))
            .collect();
        Ok(projected.with_estimates(fills))
    }

    /// Re-resolves `base` regardless of cache validity.
    pub async fn refresh(&self, base: &CurrencyCode) -> Result<Arc<RateSnapshot>, RateError> {
        self.resolve_and_store(base, self.reference_targets(base), self.tracked_targets(base))
            .await
    }

    async fn resolve_and_store(
        &self,
        base: &CurrencyCode,
        required: BTreeSet<CurrencyCode>,
        optional: BTreeSet<CurrencyCode>,
    ) -> Result<Arc<RateSnapshot>, RateError> {
        self.publish(base, |view| {
            view.is_loading = true;
        });

        let service = self.clone();
        let key = base.clone();
        let result = self
            .store()
            .refresh_with(base, move || async move {
                service
                    .resolver()
                    .resolve_tracked(&key, &required, &optional)
                    .await
            })
            .await;

        match &result {
            Ok(snapshot) => self.publish_snapshot(base, snapshot),
            Err(e) => {
                warn!(%base, error = %e, "Rate refresh failed");
                self.publish(base, |view| {
                    view.is_loading = false;
                    view.error = Some(e.to_string());
                })
            }
        }
        result
    }

    fn publish_snapshot(&self, base: &CurrencyCode, snapshot: &Arc<RateSnapshot>) {
        self.publish(base, |view| {
            view.is_loading = false;
            view.error = None;
            // A late waiter of an older refresh must not roll the view back
            if view
                .last_updated
                .is_none_or(|seen| seen <= snapshot.fetched_at)
            {
                view.last_updated = Some(snapshot.fetched_at);
                view.rates = Some(Arc::clone(snapshot));
            }
        });
    }

    /// Applies `update` to the view for `base`, notifying subscribers only
    /// when something changed.
    fn publish(&self, base: &CurrencyCode, update: impl FnOnce(&mut RatesView)) {
        let views = self
            .inner
            .views
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = views.get(base) {
            sender.send_if_modified(|view| {
                let before = (
                    view.rates.as_ref().map(Arc::as_ptr),
                    view.is_loading,
                    view.error.clone(),
                );
                update(view);
                before
                    != (
                        view.rates.as_ref().map(Arc::as_ptr),
                        view.is_loading,
                        view.error.clone(),
                    )
            });
        }
    }

    /// Receiver of the view for `base`, seeded from whatever the store holds.
    pub fn watch(&self, base: &CurrencyCode) -> watch::Receiver<RatesView> {
        let mut views = self
            .inner
            .views
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        views
            .entry(base.clone())
            .or_insert_with(|| {
                let entry = self.store().get(base);
                debug!(%base, cached = entry.is_some(), "Creating rates view");
                let (sender, _) = watch::channel(RatesView {
                    last_updated: entry.as_ref().map(|e| e.snapshot.fetched_at),
                    rates: entry.map(|e| e.snapshot),
                    is_loading: self.store().is_refreshing(base),
                    error: None,
                });
                sender
            })
            .subscribe()
    }
}

#[async_trait]
impl RefreshTarget for RateService {
    async fn force_refresh(&self, base: &CurrencyCode) {
        // Failures are already logged and published to the view
        let _ = self.refresh(base).await;
    }
}
