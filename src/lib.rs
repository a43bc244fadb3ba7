pub mod cli;
pub mod core;
pub mod gateway;
pub mod providers;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod subscription;

use crate::core::config::AppConfig;
use crate::core::currency::CurrencyCode;
use crate::core::reference::ReferenceTable;
use crate::service::RateService;
use crate::subscription::RateFeed;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    Rates {
        base: Option<String>,
        targets: Vec<String>,
    },
    Watch {
        base: Option<String>,
    },
    Currencies,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxrates starting...");

    let config = AppConfig::load_or_default(config_path)?;
    debug!(
        base = %config.base_currency,
        ttl = ?config.cache_ttl(),
        refresh = ?config.refresh_interval(),
        "Loaded config"
    );

    match command {
        AppCommand::Serve => cli::serve::run(&config).await,
        AppCommand::Rates { base, targets } => {
            let service = RateService::from_config(&config)?;
            cli::rates::run(&service, base.as_deref(), &targets).await
        }
        AppCommand::Watch { base } => {
            let base = match base {
                Some(base) => CurrencyCode::normalize(&base)?,
                None => config.base_currency.clone(),
            };
            let feed = RateFeed::from_config(&config)?;
            cli::watch::run(&feed, &base).await
        }
        AppCommand::Currencies => {
            cli::currencies::run(ReferenceTable::global());
            Ok(())
        }
    }
}
