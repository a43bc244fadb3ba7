use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::core::config::ProviderConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::ProviderError;
use crate::core::provider::{ProviderDescriptor, ProviderRates, RateProvider};
use crate::providers::util::{get_json, http_client, normalize_rates};

/// Tier 3: `GET {base_url}/rates/latest?base=&symbols=&apikey=`.
///
/// Requires a provisioned API key; without one the tier fails before any
/// request is made.
pub struct KeyedProvider {
    base_url: String,
    api_key: Option<String>,
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl KeyedProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(KeyedProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            descriptor: ProviderDescriptor {
                name: "keyed",
                priority: 3,
                timeout: config.timeout(),
                requires_api_key: true,
            },
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct KeyedResponse {
    status: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

#[async_trait]
impl RateProvider for KeyedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(name = "KeyedFetch", skip(self, targets), fields(base = %base))]
    async fn try_fetch(
        &self,
        base: &CurrencyCode,
        targets: &BTreeSet<CurrencyCode>,
    ) -> Result<ProviderRates, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey(self.descriptor.name.to_string()))?;

        let symbols = targets
            .iter()
            .filter(|t| *t != base)
            .map(CurrencyCode::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let url = format!("{}/rates/latest", self.base_url);
        let mut params = vec![("base", base.as_str()), ("apikey", api_key)];
        if !symbols.is_empty() {
            params.insert(1, ("symbols", symbols.as_str()));
        }
        let url = reqwest::Url::parse_with_params(&url, &params)
            .map_err(|e| ProviderError::Request(format!("Invalid URL {url}: {e}")))?;

        let data: KeyedResponse = get_json(&self.client, url).await?;
        match data.status.as_deref() {
            Some("success") => {}
            Some(other) => return Err(ProviderError::Rejected(other.to_string())),
            None => return Err(ProviderError::Rejected("missing".to_string())),
        }

        let mut rates = normalize_rates(data.rates);
        rates.remove(base);
        debug!(count = rates.len(), "Received keyed rates");
        Ok(rates)
    }
}
