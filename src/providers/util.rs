use crate::core::currency::CurrencyCode;
use crate::core::error::ProviderError;
use crate::core::provider::ProviderRates;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;

/// Builds the HTTP client shared by the rate adapters.
pub fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent("fxrates/1.0")
        .build()
        .map_err(ProviderError::from)
}

/// Sends a GET request and decodes the JSON body, mapping non-2xx statuses
/// and undecodable payloads to provider errors.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: reqwest::Url,
) -> Result<T, ProviderError> {
    debug!(%url, "Requesting rates");
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status(status));
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Converts a raw `{CODE: number}` table into typed codes, skipping entries
/// that are not well formed codes or not strictly positive.
pub fn normalize_rates(raw: HashMap<String, f64>) -> ProviderRates {
    raw.into_iter()
        .filter_map(|(code, rate)| {
            let code = code.parse::<CurrencyCode>().ok()?;
            (rate.is_finite() && rate > 0.0).then_some((code, rate))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rates_drops_invalid_entries() {
        let raw = HashMap::from([
            ("USD".to_string(), 0.74),
            ("eur".to_string(), 0.68),
            ("GBP".to_string(), 0.0),
            ("JPY".to_string(), -1.0),
            ("XAU".to_string(), f64::NAN),
        ]);
        let rates = normalize_rates(raw);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates.get(&"USD".parse().unwrap()), Some(&0.74));
    }
}
