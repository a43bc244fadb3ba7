//! In-process consumers of rates.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::core::config::AppConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::RateError;
use crate::scheduler::RefreshScheduler;
use crate::service::{RateService, RatesView};

/// Hands out subscriptions and keeps the refresh timer tied to them.
#[derive(Clone)]
pub struct RateFeed {
    service: Arc<RateService>,
    scheduler: RefreshScheduler<RateService>,
}

impl RateFeed {
    pub fn new(service: Arc<RateService>, scheduler: RefreshScheduler<RateService>) -> Self {
        Self { service, scheduler }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let service = Arc::new(RateService::from_config(config)?);
        let scheduler = RefreshScheduler::new(Arc::clone(&service), config.refresh_interval());
        Ok(Self::new(service, scheduler))
    }

    pub fn service(&self) -> &Arc<RateService> {
        &self.service
    }

    pub fn scheduler(&self) -> &RefreshScheduler<RateService> {
        &self.scheduler
    }

    /// Subscribes to `base`. Loads rates in the background when the store
    /// has no valid entry yet.
    pub fn subscribe(&self, base: &CurrencyCode) -> RateSubscription {
        let receiver = self.service.watch(base);
        self.scheduler.attach(base);

        if self.service.store().get_valid(base, Utc::now()).is_none() {
            debug!(%base, "Loading rates for new subscription");
            let service = Arc::clone(&self.service);
            let key = base.clone();
            tokio::spawn(async move {
                // Failures are published to the view
                let _ = service.rates(&key).await;
            });
        }

        RateSubscription {
            base: base.clone(),
            receiver,
            feed: self.clone(),
        }
    }
}

/// A live view of one base currency. Dropping it detaches from the
/// scheduler.
pub struct RateSubscription {
    base: CurrencyCode,
    receiver: watch::Receiver<RatesView>,
    feed: RateFeed,
}

impl RateSubscription {
    pub fn base(&self) -> &CurrencyCode {
        &self.base
    }

    /// The latest view, marking it as seen.
    pub fn current(&mut self) -> RatesView {
        self.receiver.borrow_and_update().clone()
    }

    /// Waits for the next change to the view. Returns `false` once the
    /// service is gone.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Forces a refresh, bypassing the cache.
    pub async fn refresh_rates(&self) -> Result<(), RateError> {
        self.feed.service.refresh(&self.base).await.map(|_| ())
    }
}

impl Drop for RateSubscription {
    fn drop(&mut self) {
        self.feed.scheduler.detach(&self.base);
    }
}
