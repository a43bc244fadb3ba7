//! Error types for rate resolution

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the resolver and the rate service.
#[derive(Debug, Clone, Error)]
pub enum RateError {
    /// One or more currency codes are malformed. Never retried.
    #[error("Invalid input: {}", .0.join("; "))]
    InvalidInput(Vec<String>),

    /// Every provider failed. Recovered internally by the reference table,
    /// so callers only ever see it as a warning.
    #[error("All rate providers failed for {0}")]
    ProvidersExhausted(String),

    /// An unexpected fault unrelated to upstream providers.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateError {
    /// Violation messages for an `InvalidInput` error, empty otherwise.
    pub fn details(&self) -> &[String] {
        match self {
            RateError::InvalidInput(details) => details,
            _ => &[],
        }
    }
}

/// A single adapter failing. The resolver logs these and moves on to the
/// next tier; they never reach the end consumer.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No API key configured for {0}")]
    MissingApiKey(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Provider rejected request with status '{0}'")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Missing rates for: {}", .0.join(", "))]
    MissingRates(Vec<String>),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}
