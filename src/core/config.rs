use anyhow::{Context, Result, ensure};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::core::currency::CurrencyCode;

/// Environment variable consulted for the key-gated provider credential
/// when the config file does not carry one.
pub const API_KEY_ENV: &str = "FXRATES_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderConfig {
    fn with_url(base_url: &str) -> Self {
        ProviderConfig {
            base_url: base_url.to_string(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    /// Tier 1: table already keyed by the requested base.
    #[serde(default = "default_direct")]
    pub direct: ProviderConfig,
    /// Tier 2: table denominated in a fixed pivot currency.
    #[serde(default = "default_pivot")]
    pub pivot: ProviderConfig,
    /// Tier 3: requires an API key.
    #[serde(default = "default_keyed")]
    pub keyed: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            direct: default_direct(),
            pivot: default_pivot(),
            keyed: default_keyed(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_five_minutes")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: default_five_minutes(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_five_minutes")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_secs: default_five_minutes(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: CurrencyCode,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_currency: default_base_currency(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "fxrates", "fxrates")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        config.apply_env();
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Loads `path` if given, else the default location, falling back to
    /// built-in defaults when no default config file exists yet.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        let default_path = Self::default_config_path()?;
        if default_path.exists() {
            Self::load_from_path(default_path)
        } else {
            debug!("No config file found, using defaults");
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.cache.ttl_secs > 0, "cache.ttl_secs must be greater than zero");
        ensure!(
            self.refresh.interval_secs > 0,
            "refresh.interval_secs must be greater than zero"
        );
        Ok(())
    }

    fn apply_env(&mut self) {
        if self.providers.keyed.api_key.is_none()
            && let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.trim().is_empty()
        {
            debug!("Using key-gated provider API key from {}", API_KEY_ENV);
            self.providers.keyed.api_key = Some(key);
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh.interval_secs)
    }

    /// Default configuration written by the `setup` command.
    pub fn default_yaml() -> &'static str {
        r#"---
base_currency: "CAD"

server:
  bind: "127.0.0.1:8080"

cache:
  ttl_secs: 300

refresh:
  interval_secs: 300

providers:
  direct:
    base_url: "https://open.er-api.com/v6"
    timeout_ms: 5000
  pivot:
    base_url: "https://api.frankfurter.app"
    timeout_ms: 5000
  keyed:
    base_url: "https://api.fxratesapi.com"
    timeout_ms: 5000
    # api_key: "..."  (or set FXRATES_API_KEY)
"#
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_five_minutes() -> u64 {
    5 * 60
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_currency() -> CurrencyCode {
    CurrencyCode(crate::core::reference::PIVOT.to_string())
}

fn default_direct() -> ProviderConfig {
    ProviderConfig::with_url("https://open.er-api.com/v6")
}

fn default_pivot() -> ProviderConfig {
    ProviderConfig::with_url("https://api.frankfurter.app")
}

fn default_keyed() -> ProviderConfig {
    ProviderConfig::with_url("https://api.fxratesapi.com")
}
