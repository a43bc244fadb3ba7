//! Static reference rates used as the last fallback tier.
//!
//! Rates are approximate and expressed against a single pivot currency
//! (`1 CAD = X units`). The pivot itself is listed among the supported
//! currencies with an implied rate of 1, so the client-facing currency list
//! and the table agree.

use crate::core::currency::CurrencyCode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Code every reference rate is denominated against.
pub const PIVOT: &str = "CAD";

/// (code, display name, rate against the pivot)
const REFERENCE_DATA: &[(&str, &str, f64)] = &[
    ("CAD", "Canadian Dollar", 1.0),
    ("USD", "US Dollar", 0.74),
    ("EUR", "Euro", 0.68),
    ("GBP", "British Pound", 0.58),
    ("JPY", "Japanese Yen", 110.5),
    ("AUD", "Australian Dollar", 1.12),
    ("CHF", "Swiss Franc", 0.65),
    ("CNY", "Chinese Yuan", 5.35),
    ("INR", "Indian Rupee", 61.5),
    ("MXN", "Mexican Peso", 12.6),
    ("BRL", "Brazilian Real", 3.7),
    ("KRW", "South Korean Won", 985.0),
    ("NZD", "New Zealand Dollar", 1.22),
    ("SEK", "Swedish Krona", 7.85),
    ("NOK", "Norwegian Krone", 7.95),
    ("HKD", "Hong Kong Dollar", 5.78),
    ("SGD", "Singapore Dollar", 0.99),
];

/// Immutable table of approximate rates and currency names.
#[derive(Debug)]
pub struct ReferenceTable {
    pivot: CurrencyCode,
    rates: BTreeMap<CurrencyCode, f64>,
    names: BTreeMap<CurrencyCode, &'static str>,
}

impl ReferenceTable {
    /// Shared, lazily built table.
    pub fn global() -> &'static ReferenceTable {
        static TABLE: OnceLock<ReferenceTable> = OnceLock::new();
        TABLE.get_or_init(ReferenceTable::build)
    }

    fn build() -> Self {
        let mut rates = BTreeMap::new();
        let mut names = BTreeMap::new();
        for (code, name, rate) in REFERENCE_DATA {
            let code = CurrencyCode(code.to_string());
            rates.insert(code.clone(), *rate);
            names.insert(code, *name);
        }
        ReferenceTable {
            pivot: CurrencyCode(PIVOT.to_string()),
            rates,
            names,
        }
    }

    pub fn pivot(&self) -> &CurrencyCode {
        &self.pivot
    }

    /// Every code with a reference rate, the pivot included.
    pub fn supported(&self) -> BTreeSet<CurrencyCode> {
        self.rates.keys().cloned().collect()
    }

    pub fn name(&self, code: &CurrencyCode) -> Option<&'static str> {
        self.names.get(code).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = (&CurrencyCode, &'static str)> {
        self.names.iter().map(|(code, name)| (code, *name))
    }

    /// Approximate rate from `base` to `target`, crossing through the pivot.
    /// `None` when either side is unknown to the table.
    pub fn rate(&self, base: &CurrencyCode, target: &CurrencyCode) -> Option<f64> {
        if base == target {
            return Some(1.0);
        }
        let pivot_to_base = self.rates.get(base)?;
        let pivot_to_target = self.rates.get(target)?;
        Some(pivot_to_target / pivot_to_base)
    }

    /// Same as [`rate`](Self::rate) but unknown currencies convert at 1.
    pub fn rate_or_default(&self, base: &CurrencyCode, target: &CurrencyCode) -> f64 {
        self.rate(base, target).unwrap_or(1.0)
    }

    /// The full table expressed against `base`, without `base` itself.
    pub fn rates_for(&self, base: &CurrencyCode) -> BTreeMap<CurrencyCode, f64> {
        self.rates
            .keys()
            .filter(|code| *code != base)
            .map(|code| (code.clone(), self.rate_or_default(base, code)))
            .collect()
    }
}
