pub mod direct;
pub mod keyed;
pub mod pivot;
pub mod util;

use crate::core::config::ProvidersConfig;
use crate::core::provider::RateProvider;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Builds the enabled fallback tiers, ordered by priority.
pub fn build_providers(config: &ProvidersConfig) -> Result<Vec<Arc<dyn RateProvider>>> {
    let mut providers: Vec<Arc<dyn RateProvider>> = Vec::new();

    if config.direct.enabled {
        let provider = direct::DirectTableProvider::new(&config.direct)
            .context("Failed to create direct table provider")?;
        providers.push(Arc::new(provider));
    }
    if config.pivot.enabled {
        let provider = pivot::PivotTableProvider::new(&config.pivot)
            .context("Failed to create pivot table provider")?;
        providers.push(Arc::new(provider));
    }
    if config.keyed.enabled {
        let provider = keyed::KeyedProvider::new(&config.keyed)
            .context("Failed to create key-gated provider")?;
        providers.push(Arc::new(provider));
    }

    providers.sort_by_key(|p| p.descriptor().priority);
    debug!(
        providers = ?providers.iter().map(|p| p.descriptor().name).collect::<Vec<_>>(),
        "Configured rate providers"
    );
    Ok(providers)
}
