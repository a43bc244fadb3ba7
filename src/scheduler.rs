//! Periodic forced refreshes for the base currencies that have consumers.
//!
//! The timer only runs while at least one consumer is attached. Each tick
//! re-resolves every attached base; a tick that overlaps a refresh still in
//! flight joins it through the store's in-flight guard.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::core::currency::CurrencyCode;

/// Shortest accepted tick period; a zero period would make the timer spin.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Something the scheduler can force to re-resolve a base currency.
#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
    async fn force_refresh(&self, base: &CurrencyCode);
}

struct Timer {
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct SchedulerState {
    /// Attached consumers per base currency.
    consumers: BTreeMap<CurrencyCode, usize>,
    timer: Option<Timer>,
}

struct SchedulerInner<T> {
    target: Arc<T>,
    period: Duration,
    state: Mutex<SchedulerState>,
}

impl<T> Drop for SchedulerInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            let _ = timer.shutdown.send(true);
        }
    }
}

pub struct RefreshScheduler<T: RefreshTarget> {
    inner: Arc<SchedulerInner<T>>,
}

impl<T: RefreshTarget> Clone for RefreshScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RefreshTarget> RefreshScheduler<T> {
    pub fn new(target: Arc<T>, period: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                target,
                period: period.max(MIN_PERIOD),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Registers a consumer of `base`, starting the timer for the first one.
    pub fn attach(&self, base: &CurrencyCode) {
        let first = {
            let mut state = self.state();
            *state.consumers.entry(base.clone()).or_default() += 1;
            state.timer.is_none()
        };
        debug!(%base, "Consumer attached");
        if first {
            self.start();
        }
    }

    /// Unregisters a consumer of `base`, stopping the timer after the last one.
    pub fn detach(&self, base: &CurrencyCode) {
        let last = {
            let mut state = self.state();
            if let Some(count) = state.consumers.get_mut(base) {
                *count -= 1;
                if *count == 0 {
                    state.consumers.remove(base);
                }
            }
            state.consumers.is_empty()
        };
        debug!(%base, "Consumer detached");
        if last {
            self.stop();
        }
    }

    /// Bases with at least one attached consumer.
    pub fn subscribed(&self) -> Vec<CurrencyCode> {
        self.state().consumers.keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.state().timer.is_some()
    }

    /// Spawns the timer task unless it is already running. The first tick
    /// fires one period from now.
    pub fn start(&self) {
        let mut state = self.state();
        if state.timer.is_some() {
            return;
        }

        let (shutdown, receiver) = watch::channel(false);
        tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.period,
            receiver,
        ));
        state.timer = Some(Timer { shutdown });
        info!(period = ?self.inner.period, "Refresh scheduler started");
    }

    /// Stops future ticks. Refreshes already started keep running.
    pub fn stop(&self) {
        if let Some(timer) = self.state().timer.take() {
            let _ = timer.shutdown.send(true);
            info!("Refresh scheduler stopped");
        }
    }

    /// Forces a refresh of `base` outside the periodic cadence.
    pub async fn refresh_now(&self, base: &CurrencyCode) {
        self.inner.target.force_refresh(base).await;
    }
}

async fn run_timer<T: RefreshTarget>(
    scheduler: Weak<SchedulerInner<T>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = scheduler.upgrade() else { break };
                let bases: Vec<CurrencyCode> = {
                    let state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.consumers.keys().cloned().collect()
                };
                debug!(bases = ?bases, "Scheduled refresh tick");
                for base in bases {
                    let target = Arc::clone(&inner.target);
                    tokio::spawn(async move { target.force_refresh(&base).await });
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Refresh timer exited");
}
