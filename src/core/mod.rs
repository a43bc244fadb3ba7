//! Core rate model: codes, snapshots, providers and the fallback resolver

pub mod config;
pub mod currency;
pub mod error;
pub mod log;
pub mod provider;
pub mod reference;
pub mod resolver;

// Re-export main types for cleaner imports
pub use currency::{CurrencyCode, RateSnapshot, RateSource};
pub use error::{ProviderError, RateError};
pub use provider::{ProviderDescriptor, RateProvider};
pub use reference::ReferenceTable;
pub use resolver::RateResolver;
