//! Rate provider abstractions

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::core::currency::CurrencyCode;
use crate::core::error::ProviderError;

/// Static description of one fallback tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    /// Lower values are tried first. Never changes at runtime.
    pub priority: u8,
    pub timeout: Duration,
    pub requires_api_key: bool,
}

/// Rates normalized to `1 base = X target`, keyed by target code.
pub type ProviderRates = BTreeMap<CurrencyCode, f64>;

#[async_trait]
pub trait RateProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Fetches rates for `base`, normalized to the common shape.
    ///
    /// Implementations may return codes beyond `targets` and may omit some
    /// of them; the resolver checks coverage.
    async fn try_fetch(
        &self,
        base: &CurrencyCode,
        targets: &BTreeSet<CurrencyCode>,
    ) -> Result<ProviderRates, ProviderError>;
}
