use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::core::config::ProviderConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::ProviderError;
use crate::core::provider::{ProviderDescriptor, ProviderRates, RateProvider};
use crate::providers::util::{get_json, http_client, normalize_rates};

/// Tier 2: `GET {base_url}/latest` returning a table denominated in a fixed
/// pivot currency (EUR for ECB-backed services). Other bases are derived as
/// cross rates through the pivot.
pub struct PivotTableProvider {
    base_url: String,
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl PivotTableProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(PivotTableProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            descriptor: ProviderDescriptor {
                name: "pivot",
                priority: 2,
                timeout: config.timeout(),
                requires_api_key: false,
            },
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PivotTableResponse {
    base: String,
    rates: HashMap<String, f64>,
}

/// Re-expresses a pivot denominated table against `base`.
///
/// With `pivot_rates` holding `1 pivot = X code`, the rate `1 base = Y target`
/// is `pivot_rates[target] / pivot_rates[base]`, and the pivot itself becomes
/// `1 / pivot_rates[base]`.
pub fn cross_rates(
    pivot: &CurrencyCode,
    pivot_rates: &ProviderRates,
    base: &CurrencyCode,
) -> Result<ProviderRates, ProviderError> {
    if base == pivot {
        let mut rates = pivot_rates.clone();
        rates.remove(base);
        return Ok(rates);
    }

    let pivot_to_base = *pivot_rates
        .get(base)
        .ok_or_else(|| ProviderError::MissingRates(vec![base.to_string()]))?;

    let mut rates: ProviderRates = pivot_rates
        .iter()
        .filter(|(code, _)| *code != base)
        .map(|(code, pivot_to_target)| (code.clone(), pivot_to_target / pivot_to_base))
        .collect();
    rates.insert(pivot.clone(), 1.0 / pivot_to_base);
    Ok(rates)
}

#[async_trait]
impl RateProvider for PivotTableProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(name = "PivotTableFetch", skip(self, _targets), fields(base = %base))]
    async fn try_fetch(
        &self,
        base: &CurrencyCode,
        _targets: &BTreeSet<CurrencyCode>,
    ) -> Result<ProviderRates, ProviderError> {
        let url = format!("{}/latest", self.base_url);
        let url = reqwest::Url::parse(&url)
            .map_err(|e| ProviderError::Request(format!("Invalid URL {url}: {e}")))?;
        let data: PivotTableResponse = get_json(&self.client, url).await?;

        let pivot: CurrencyCode = data.base.parse().map_err(|_| {
            ProviderError::Malformed(format!("Invalid pivot currency '{}'", data.base))
        })?;
        debug!(%pivot, "Received pivot table");

        cross_rates(&pivot, &normalize_rates(data.rates), base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    async fn create_mock_server(mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn provider(server: &MockServer) -> PivotTableProvider {
        PivotTableProvider::new(&ProviderConfig {
            base_url: server.uri(),
            timeout_ms: 1000,
            api_key: None,
            enabled: true,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_cross_rate_for_non_pivot_base() {
        let mock_server = create_mock_server(
            r#"{"amount": 1.0, "base": "EUR", "date": "2024-05-01", "rates": {"CAD": 1.47, "USD": 1.08}}"#,
        )
        .await;

        let rates = provider(&mock_server)
            .try_fetch(&code("CAD"), &BTreeSet::from([code("USD")]))
            .await
            .unwrap();

        let usd = rates.get(&code("USD")).unwrap();
        assert!((usd - 1.08 / 1.47).abs() < 1e-12);
        assert!((usd - 0.7347).abs() < 1e-4);
        let eur = rates.get(&code("EUR")).unwrap();
        assert!((eur - 1.0 / 1.47).abs() < 1e-12);
        assert!(!rates.contains_key(&code("CAD")));
    }

    #[tokio::test]
    async fn test_pivot_base_uses_values_directly() {
        let mock_server =
            create_mock_server(r#"{"base": "EUR", "rates": {"CAD": 1.47, "USD": 1.08}}"#).await;

        let rates = provider(&mock_server)
            .try_fetch(&code("EUR"), &BTreeSet::from([code("USD")]))
            .await
            .unwrap();
        assert_eq!(rates.get(&code("USD")), Some(&1.08));
        assert_eq!(rates.get(&code("CAD")), Some(&1.47));
    }

    #[tokio::test]
    async fn test_base_missing_from_pivot_table() {
        let mock_server =
            create_mock_server(r#"{"base": "EUR", "rates": {"USD": 1.08}}"#).await;

        let err = provider(&mock_server)
            .try_fetch(&code("ZAR"), &BTreeSet::from([code("USD")]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing rates for: ZAR");
    }

    #[tokio::test]
    async fn test_invalid_pivot_is_malformed() {
        let mock_server = create_mock_server(r#"{"base": "euro", "rates": {"USD": 1.08}}"#).await;

        let err = provider(&mock_server)
            .try_fetch(&code("USD"), &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
