use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

use crate::core::config::ProviderConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::ProviderError;
use crate::core::provider::{ProviderDescriptor, ProviderRates, RateProvider};
use crate::providers::util::{get_json, http_client, normalize_rates};

/// Tier 1: `GET {base_url}/latest/{base}` returning a table already keyed by
/// the requested base currency.
pub struct DirectTableProvider {
    base_url: String,
    api_key: Option<String>,
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl DirectTableProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(DirectTableProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            descriptor: ProviderDescriptor {
                name: "direct",
                priority: 1,
                timeout: config.timeout(),
                requires_api_key: false,
            },
            client: http_client()?,
        })
    }

    fn url(&self, base: &CurrencyCode) -> Result<reqwest::Url, ProviderError> {
        let url = format!("{}/latest/{}", self.base_url, base);
        let parsed = match &self.api_key {
            Some(key) => reqwest::Url::parse_with_params(&url, &[("apikey", key)]),
            None => reqwest::Url::parse(&url),
        };
        parsed.map_err(|e| ProviderError::Request(format!("Invalid URL {url}: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct DirectTableResponse {
    /// Some deployments report `"result": "error"` with a 200 status.
    result: Option<String>,
    base: Option<String>,
    base_code: Option<String>,
    rates: HashMap<String, f64>,
}

#[async_trait]
impl RateProvider for DirectTableProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    #[instrument(name = "DirectTableFetch", skip(self, _targets), fields(base = %base))]
    async fn try_fetch(
        &self,
        base: &CurrencyCode,
        _targets: &BTreeSet<CurrencyCode>,
    ) -> Result<ProviderRates, ProviderError> {
        let data: DirectTableResponse = get_json(&self.client, self.url(base)?).await?;

        if let Some(result) = data.result.as_deref()
            && result != "success"
        {
            return Err(ProviderError::Rejected(result.to_string()));
        }

        if let Some(reported) = data.base.as_deref().or(data.base_code.as_deref())
            && !reported.eq_ignore_ascii_case(base.as_str())
        {
            return Err(ProviderError::Malformed(format!(
                "Expected rates for {base}, received {reported}"
            )));
        }

        let mut rates = normalize_rates(data.rates);
        rates.remove(base);
        debug!(count = rates.len(), "Received direct table");
        Ok(rates)
    }
}
