//! Currency codes and rate snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;

use crate::core::error::RateError;

/// A three letter, uppercase ISO-4217 style currency code.
///
/// Validity is purely syntactic: a well formed code may still be unknown to
/// every provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(pub(crate) String);

impl CurrencyCode {
    /// Parses a code as received from a caller: surrounding whitespace is
    /// trimmed and the code is uppercased before validation.
    pub fn normalize(raw: &str) -> Result<Self, RateError> {
        raw.trim().to_ascii_uppercase().parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(CurrencyCode(s.to_string()))
        } else {
            Err(RateError::InvalidInput(vec![format!(
                "Invalid currency code: '{s}'"
            )]))
        }
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = RateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the values of a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Every rate came from an upstream provider.
    Live,
    /// Every rate came from the static reference table.
    Mock,
    /// Some rates are live, the rest were filled from the reference table.
    Partial,
}

impl Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RateSource::Live => "live",
                RateSource::Mock => "mock",
                RateSource::Partial => "partial",
            }
        )
    }
}

/// An immutable set of rates for one base currency.
///
/// `rates` never contains `base` and every value is strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base: CurrencyCode,
    pub rates: BTreeMap<CurrencyCode, f64>,
    pub fetched_at: DateTime<Utc>,
    pub source: RateSource,
    /// Name of the provider that answered, if any did.
    pub provider: Option<String>,
    /// Codes whose value was filled from the reference table.
    pub estimated: BTreeSet<CurrencyCode>,
}

impl RateSnapshot {
    /// Rate for `target`, with the base currency always converting at exactly 1.
    pub fn rate(&self, target: &CurrencyCode) -> Option<f64> {
        if *target == self.base {
            return Some(1.0);
        }
        self.rates.get(target).copied()
    }

    pub fn covers(&self, targets: &BTreeSet<CurrencyCode>) -> bool {
        targets
            .iter()
            .all(|t| *t == self.base || self.rates.contains_key(t))
    }

    /// Restricts the snapshot to `targets`, recomputing the source for the
    /// selected codes. Codes the snapshot does not hold are left out.
    pub fn project(&self, targets: &BTreeSet<CurrencyCode>) -> RateSnapshot {
        let rates: BTreeMap<_, _> = self
            .rates
            .iter()
            .filter(|(code, _)| targets.contains(*code))
            .map(|(code, rate)| (code.clone(), *rate))
            .collect();
        let estimated: BTreeSet<_> = self
            .estimated
            .iter()
            .filter(|code| rates.contains_key(*code))
            .cloned()
            .collect();

        RateSnapshot {
            base: self.base.clone(),
            source: derive_source(self.source, rates.len(), estimated.len()),
            rates,
            fetched_at: self.fetched_at,
            provider: self.provider.clone(),
            estimated,
        }
    }

    /// Adds reference fills for codes the snapshot lacks. Codes already
    /// present, and the base itself, are left untouched.
    pub fn with_estimates(mut self, fills: BTreeMap<CurrencyCode, f64>) -> RateSnapshot {
        for (code, rate) in fills {
            if code == self.base || self.rates.contains_key(&code) {
                continue;
            }
            self.rates.insert(code.clone(), rate);
            self.estimated.insert(code);
        }
        self.source = derive_source(self.source, self.rates.len(), self.estimated.len());
        self
    }
}

fn derive_source(original: RateSource, total: usize, estimated: usize) -> RateSource {
    match original {
        RateSource::Mock => RateSource::Mock,
        _ if estimated == 0 => RateSource::Live,
        _ if estimated == total => RateSource::Mock,
        _ => RateSource::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> CurrencyCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_currency_code_validation() {
        assert!("USD".parse::<CurrencyCode>().is_ok());
        assert!("usd".parse::<CurrencyCode>().is_err());
        assert!("US".parse::<CurrencyCode>().is_err());
        assert!("USDT".parse::<CurrencyCode>().is_err());
        assert!("U5D".parse::<CurrencyCode>().is_err());
        assert!("".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_currency_code_normalize() {
        assert_eq!(CurrencyCode::normalize("  eur ").unwrap(), code("EUR"));
        assert_eq!(CurrencyCode::normalize("Cad").unwrap(), code("CAD"));

        let err = CurrencyCode::normalize("e u").unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: Invalid currency code: 'E U'");
    }

    #[test]
    fn test_currency_code_serde() {
        let parsed: CurrencyCode = serde_json::from_str(r#""JPY""#).unwrap();
        assert_eq!(parsed, code("JPY"));
        assert!(serde_json::from_str::<CurrencyCode>(r#""jpy1""#).is_err());
    }

    #[test]
    fn test_project_recomputes_source() {
        let snapshot = RateSnapshot {
            base: code("CAD"),
            rates: BTreeMap::from([(code("USD"), 0.74), (code("EUR"), 0.68), (code("XAU"), 1.0)]),
            fetched_at: Utc::now(),
            source: RateSource::Partial,
            provider: Some("direct".to_string()),
            estimated: BTreeSet::from([code("XAU")]),
        };

        let live_only = snapshot.project(&BTreeSet::from([code("USD")]));
        assert_eq!(live_only.source, RateSource::Live);
        assert_eq!(live_only.rates.len(), 1);
        assert!(live_only.estimated.is_empty());

        let mixed = snapshot.project(&BTreeSet::from([code("USD"), code("XAU")]));
        assert_eq!(mixed.source, RateSource::Partial);

        let estimated_only = snapshot.project(&BTreeSet::from([code("XAU")]));
        assert_eq!(estimated_only.source, RateSource::Mock);
    }

    #[test]
    fn test_with_estimates_marks_filled_codes() {
        let snapshot = RateSnapshot {
            base: code("CAD"),
            rates: BTreeMap::from([(code("USD"), 0.74)]),
            fetched_at: Utc::now(),
            source: RateSource::Live,
            provider: Some("direct".to_string()),
            estimated: BTreeSet::new(),
        };

        let filled = snapshot.with_estimates(BTreeMap::from([
            (code("USD"), 9.9),
            (code("CAD"), 1.0),
            (code("XYZ"), 1.0),
        ]));
        assert_eq!(filled.rates[&code("USD")], 0.74);
        assert!(!filled.rates.contains_key(&code("CAD")));
        assert_eq!(filled.estimated, BTreeSet::from([code("XYZ")]));
        assert_eq!(filled.source, RateSource::Partial);
    }

    #[test]
    fn test_rate_for_base_is_one() {
        let snapshot = RateSnapshot {
            base: code("CAD"),
            rates: BTreeMap::from([(code("USD"), 0.74)]),
            fetched_at: Utc::now(),
            source: RateSource::Live,
            provider: None,
            estimated: BTreeSet::new(),
        };
        assert_eq!(snapshot.rate(&code("CAD")), Some(1.0));
        assert_eq!(snapshot.rate(&code("USD")), Some(0.74));
        assert_eq!(snapshot.rate(&code("EUR")), None);
        assert!(snapshot.covers(&BTreeSet::from([code("CAD"), code("USD")])));
        assert!(!snapshot.covers(&BTreeSet::from([code("EUR")])));
    }
}
