//! Walks the fallback tiers in priority order and always produces a usable
//! snapshot.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::currency::{CurrencyCode, RateSnapshot, RateSource};
use crate::core::error::{ProviderError, RateError};
use crate::core::provider::{ProviderRates, RateProvider};
use crate::core::reference::ReferenceTable;

pub struct RateResolver {
    providers: Vec<Arc<dyn RateProvider>>,
    reference: &'static ReferenceTable,
}

/// Parses a base and a list of targets, collecting every violation rather
/// than stopping at the first one.
pub fn parse_request<S: AsRef<str>>(
    base: &str,
    targets: &[S],
) -> Result<(CurrencyCode, BTreeSet<CurrencyCode>), RateError> {
    let mut violations = Vec::new();

    let base = match CurrencyCode::normalize(base) {
        Ok(code) => Some(code),
        Err(e) => {
            violations.extend(e.details().iter().map(|d| format!("base: {d}")));
            None
        }
    };

    let mut codes = BTreeSet::new();
    for target in targets {
        match CurrencyCode::normalize(target.as_ref()) {
            Ok(code) => {
                codes.insert(code);
            }
            Err(e) => violations.extend(e.details().iter().map(|d| format!("targets: {d}"))),
        }
    }

    match base {
        Some(base) if violations.is_empty() => Ok((base, codes)),
        _ => Err(RateError::InvalidInput(violations)),
    }
}

impl RateResolver {
    pub fn new(mut providers: Vec<Arc<dyn RateProvider>>) -> Self {
        providers.sort_by_key(|p| p.descriptor().priority);
        RateResolver {
            providers,
            reference: ReferenceTable::global(),
        }
    }

    pub fn reference(&self) -> &'static ReferenceTable {
        self.reference
    }

    /// Validates raw codes, then resolves them.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        base: &str,
        targets: &[S],
    ) -> Result<RateSnapshot, RateError> {
        let (base, targets) = parse_request(base, targets)?;
        Ok(self.resolve_codes(&base, &targets).await)
    }

    /// Resolves already validated codes. Never fails: when every tier fails
    /// the snapshot is built from the reference table.
    pub async fn resolve_codes(
        &self,
        base: &CurrencyCode,
        targets: &BTreeSet<CurrencyCode>,
    ) -> RateSnapshot {
        self.resolve_tracked(base, targets, &BTreeSet::new()).await
    }

    /// Like [`resolve_codes`](Self::resolve_codes), with `optional` codes kept
    /// whenever the answering tier also returns them. Only `required` codes
    /// decide whether a tier succeeded, and only they are ever filled from the
    /// reference table.
    pub async fn resolve_tracked(
        &self,
        base: &CurrencyCode,
        required: &BTreeSet<CurrencyCode>,
        optional: &BTreeSet<CurrencyCode>,
    ) -> RateSnapshot {
        let wanted: BTreeSet<CurrencyCode> =
            required.iter().filter(|t| *t != base).cloned().collect();

        if wanted.is_empty() {
            debug!(%base, "Only identity rates requested, skipping providers");
            return self.snapshot(base, BTreeMap::new(), None, BTreeSet::new(), RateSource::Live);
        }

        let requested: BTreeSet<CurrencyCode> = wanted
            .iter()
            .chain(optional.iter().filter(|t| *t != base))
            .cloned()
            .collect();

        // First tier that answered some but not all required codes
        let mut best_partial: Option<(&'static str, ProviderRates)> = None;

        for provider in &self.providers {
            let descriptor = provider.descriptor();
            let result = match tokio::time::timeout(
                descriptor.timeout,
                provider.try_fetch(base, &requested),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(descriptor.timeout)),
            };

            let rates = match result {
                Ok(rates) => rates,
                Err(ProviderError::MissingApiKey(_)) if descriptor.requires_api_key => {
                    debug!(
                        provider = descriptor.name,
                        %base,
                        "Skipping key-gated provider, no API key"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(provider = descriptor.name, %base, error = %e, "Provider failed");
                    continue;
                }
            };

            let found: ProviderRates = requested
                .iter()
                .filter_map(|t| {
                    let rate = *rates.get(t)?;
                    (rate.is_finite() && rate > 0.0).then(|| (t.clone(), rate))
                })
                .collect();

            let missing: Vec<String> = wanted
                .iter()
                .filter(|t| !found.contains_key(*t))
                .map(ToString::to_string)
                .collect();
            if missing.is_empty() {
                debug!(provider = descriptor.name, %base, count = found.len(), "Resolved rates");
                return self.snapshot(
                    base,
                    found,
                    Some(descriptor.name),
                    BTreeSet::new(),
                    RateSource::Live,
                );
            }

            warn!(
                provider = descriptor.name,
                %base,
                error = %ProviderError::MissingRates(missing),
                "Provider failed"
            );
            if best_partial.is_none() && !found.is_empty() {
                best_partial = Some((descriptor.name, found));
            }
        }

        match best_partial {
            Some((name, mut rates)) => {
                let estimated: BTreeSet<CurrencyCode> = wanted
                    .iter()
                    .filter(|t| !rates.contains_key(*t))
                    .cloned()
                    .collect();
                for code in &estimated {
                    rates.insert(code.clone(), self.reference.rate_or_default(base, code));
                }
                warn!(provider = name, %base, estimated = ?estimated, "Filled missing rates from reference table");
                self.snapshot(base, rates, Some(name), estimated, RateSource::Partial)
            }
            None => {
                warn!(
                    error = %RateError::ProvidersExhausted(base.to_string()),
                    "Falling back to reference rates"
                );
                let rates = wanted
                    .iter()
                    .map(|t| (t.clone(), self.reference.rate_or_default(base, t)))
                    .collect();
                self.snapshot(base, rates, None, wanted, RateSource::Mock)
            }
        }
    }

    fn snapshot(
        &self,
        base: &CurrencyCode,
        rates: ProviderRates,
        provider: Option<&str>,
        estimated: BTreeSet<CurrencyCode>,
        source: RateSource,
    ) -> RateSnapshot {
        RateSnapshot {
            base: base.clone(),
            rates,
            fetched_at: Utc::now(),
            source,
            provider: provider.map(str::to_string),
            estimated,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::provider::ProviderDescriptor;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    pub(crate) fn codes(list: &[&str]) -> BTreeSet<CurrencyCode> {
        list.iter().map(|s| code(s)).collect()
    }

    pub(crate) enum Behavior {
        Rates(Vec<(&'static str, f64)>),
        Fail,
        NoApiKey,
    }

    /// Scripted provider that counts its invocations.
    pub(crate) struct MockProvider {
        descriptor: ProviderDescriptor,
        behavior: Mutex<Behavior>,
        delay: Duration,
        pub(crate) calls: AtomicUsize,
    }

    impl MockProvider {
        pub(crate) fn new(name: &'static str, priority: u8, behavior: Behavior) -> Arc<Self> {
            Self::with_delay(name, priority, behavior, Duration::ZERO)
        }

        pub(crate) fn key_gated(name: &'static str, priority: u8, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ProviderDescriptor {
                    name,
                    priority,
                    timeout: Duration::from_millis(200),
                    requires_api_key: true,
                },
                behavior: Mutex::new(behavior),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn with_delay(
            name: &'static str,
            priority: u8,
            behavior: Behavior,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                descriptor: ProviderDescriptor {
                    name,
                    priority,
                    timeout: Duration::from_millis(200),
                    requires_api_key: false,
                },
                behavior: Mutex::new(behavior),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn set_behavior(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateProvider for MockProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn try_fetch(
            &self,
            _base: &CurrencyCode,
            _targets: &BTreeSet<CurrencyCode>,
        ) -> Result<ProviderRates, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &*self.behavior.lock().unwrap() {
                Behavior::Rates(rates) => Ok(rates.iter().map(|(c, r)| (code(c), *r)).collect()),
                Behavior::Fail => Err(ProviderError::Request("connection refused".to_string())),
                Behavior::NoApiKey => {
                    Err(ProviderError::MissingApiKey(self.descriptor.name.to_string()))
                }
            }
        }
    }

    fn resolver(providers: Vec<Arc<MockProvider>>) -> RateResolver {
        RateResolver::new(
            providers
                .into_iter()
                .map(|p| p as Arc<dyn RateProvider>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_first_tier_success_short_circuits() {
        let tier1 = MockProvider::new(
            "direct",
            1,
            Behavior::Rates(vec![("USD", 0.74), ("EUR", 0.68)]),
        );
        let tier2 = MockProvider::new("pivot", 2, Behavior::Rates(vec![("USD", 0.9), ("EUR", 0.9)]));
        let resolver = resolver(vec![tier2.clone(), tier1.clone()]);

        let snapshot = resolver.resolve("CAD", &["USD", "EUR"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Live);
        assert_eq!(snapshot.provider.as_deref(), Some("direct"));
        assert_eq!(snapshot.rates.get(&code("USD")), Some(&0.74));
        assert_eq!(snapshot.rates.get(&code("EUR")), Some(&0.68));
        assert_eq!(tier1.calls(), 1);
        assert_eq!(tier2.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_tier_falls_through_in_order() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Fail);
        let tier2 = MockProvider::new("pivot", 2, Behavior::Rates(vec![("USD", 1.08 / 1.47)]));
        let tier3 = MockProvider::new("keyed", 3, Behavior::Rates(vec![("USD", 0.5)]));
        let resolver = resolver(vec![tier1.clone(), tier2.clone(), tier3.clone()]);

        let snapshot = resolver.resolve("CAD", &["USD"]).await.unwrap();
        assert_eq!(snapshot.provider.as_deref(), Some("pivot"));
        assert!((snapshot.rates[&code("USD")] - 0.7347).abs() < 1e-4);
        assert_eq!((tier1.calls(), tier2.calls(), tier3.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_key_gated_tier_without_key_is_skipped() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Fail);
        let keyed = MockProvider::key_gated("keyed", 2, Behavior::NoApiKey);
        let resolver = resolver(vec![tier1.clone(), keyed.clone()]);
        assert!(keyed.descriptor().requires_api_key);

        let snapshot = resolver.resolve("CAD", &["USD"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Mock);
        assert_eq!(snapshot.rates[&code("USD")], 0.74);
        assert_eq!(tier1.calls(), 1);
        assert_eq!(keyed.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_tiers_fail_uses_reference_table() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Fail);
        let tier2 = MockProvider::new("pivot", 2, Behavior::Fail);
        let tier3 = MockProvider::new("keyed", 3, Behavior::Fail);
        let resolver = resolver(vec![tier1, tier2, tier3]);

        let snapshot = resolver.resolve("CAD", &["USD", "XYZ"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Mock);
        assert_eq!(snapshot.provider, None);
        assert_eq!(snapshot.rates[&code("USD")], 0.74);
        assert_eq!(snapshot.rates[&code("XYZ")], 1.0);
        assert_eq!(snapshot.estimated, codes(&["USD", "XYZ"]));
    }

    #[tokio::test]
    async fn test_no_providers_still_answers() {
        let resolver = RateResolver::new(Vec::new());
        let snapshot = resolver.resolve("CAD", &["EUR"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Mock);
        assert!(!snapshot.rates.is_empty());
    }

    #[tokio::test]
    async fn test_partial_answer_is_filled_from_reference() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Rates(vec![("USD", 0.75)]));
        let tier2 = MockProvider::new("pivot", 2, Behavior::Fail);
        let resolver = resolver(vec![tier1, tier2.clone()]);

        let snapshot = resolver.resolve("CAD", &["USD", "EUR"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Partial);
        assert_eq!(snapshot.provider.as_deref(), Some("direct"));
        assert_eq!(snapshot.rates[&code("USD")], 0.75);
        assert_eq!(snapshot.rates[&code("EUR")], 0.68);
        assert_eq!(snapshot.estimated, codes(&["EUR"]));
        // A partial answer still lets later tiers try for a complete one
        assert_eq!(tier2.calls(), 1);
    }

    #[tokio::test]
    async fn test_later_complete_answer_beats_earlier_partial() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Rates(vec![("USD", 0.75)]));
        let tier2 = MockProvider::new(
            "pivot",
            2,
            Behavior::Rates(vec![("USD", 0.73), ("EUR", 0.67)]),
        );
        let resolver = resolver(vec![tier1, tier2]);

        let snapshot = resolver.resolve("CAD", &["USD", "EUR"]).await.unwrap();
        assert_eq!(snapshot.source, RateSource::Live);
        assert_eq!(snapshot.provider.as_deref(), Some("pivot"));
        assert_eq!(snapshot.rates[&code("USD")], 0.73);
    }

    #[tokio::test]
    async fn test_slow_tier_times_out() {
        let slow = MockProvider::with_delay(
            "direct",
            1,
            Behavior::Rates(vec![("USD", 0.74)]),
            Duration::from_secs(5),
        );
        let fast = MockProvider::new("pivot", 2, Behavior::Rates(vec![("USD", 0.73)]));
        let resolver = resolver(vec![slow.clone(), fast]);

        let snapshot = resolver.resolve("CAD", &["USD"]).await.unwrap();
        assert_eq!(snapshot.provider.as_deref(), Some("pivot"));
        assert_eq!(slow.calls(), 1);
    }

    #[tokio::test]
    async fn test_identity_pairs_skip_providers() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Rates(vec![("USD", 0.74)]));
        let resolver = resolver(vec![tier1.clone()]);

        let snapshot = resolver.resolve("cad", &[" CAD "]).await.unwrap();
        assert!(snapshot.rates.is_empty());
        assert_eq!(snapshot.rate(&code("CAD")), Some(1.0));
        assert_eq!(tier1.calls(), 0);

        let snapshot = resolver.resolve("CAD", &["CAD", "USD"]).await.unwrap();
        assert!(!snapshot.rates.contains_key(&code("CAD")));
        assert_eq!(snapshot.rates.len(), 1);
    }

    #[tokio::test]
    async fn test_optional_codes_do_not_decide_success() {
        let tier1 = MockProvider::new(
            "direct",
            1,
            Behavior::Rates(vec![("USD", 0.74), ("GBP", 0.58)]),
        );
        let tier2 = MockProvider::new("pivot", 2, Behavior::Fail);
        let resolver = resolver(vec![tier1, tier2.clone()]);

        let snapshot = resolver
            .resolve_tracked(&code("CAD"), &codes(&["USD"]), &codes(&["GBP", "EUR", "CAD"]))
            .await;
        assert_eq!(snapshot.source, RateSource::Live);
        assert_eq!(snapshot.rates.len(), 2);
        assert_eq!(snapshot.rates[&code("GBP")], 0.58);
        assert!(!snapshot.rates.contains_key(&code("EUR")));
        assert_eq!(tier2.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_codes_fail_fast() {
        let tier1 = MockProvider::new("direct", 1, Behavior::Rates(vec![("USD", 0.74)]));
        let resolver = resolver(vec![tier1.clone()]);

        let err = resolver.resolve("CA", &["USD", "E1R", "eu"]).await.unwrap_err();
        assert_eq!(err.details().len(), 3);
        assert_eq!(err.details()[0], "base: Invalid currency code: 'CA'");
        assert_eq!(tier1.calls(), 0);
    }
}
