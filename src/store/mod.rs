pub mod memory;

use crate::core::currency::RateSnapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::RateStore;

/// A published snapshot and the instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Arc<RateSnapshot>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
