use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{CORS_PROXY_URL, INFO_API_URL, RPC_URL, TRACKED_COIN};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Longest accepted sell window: one year.
pub const MAX_SELL_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub staking: StakingConfig,
}

/// Upstream endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// JSON-RPC endpoint answering `eth_getBalance`.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Exchange info API (POST JSON).
    #[serde(default = "default_info_url")]
    pub info_url: String,
    /// Prefix prepended to the info URL when the direct request fails.
    /// Empty disables the fallback.
    #[serde(default = "default_cors_proxy")]
    pub cors_proxy: String,
}

fn default_rpc_url() -> String {
    RPC_URL.to_string()
}

fn default_info_url() -> String {
    INFO_API_URL.to_string()
}

fn default_cors_proxy() -> String {
    CORS_PROXY_URL.to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            info_url: default_info_url(),
            cors_proxy: default_cors_proxy(),
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Window over which sell volume is summed, in seconds.
    #[serde(default = "default_sell_window")]
    pub sell_window_secs: u64,
    #[serde(default = "default_tracked_coin")]
    pub tracked_coin: String,
    /// Directory holding the persisted wallet list, snapshots and episodes.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_sell_window() -> u64 {
    24 * 60 * 60
}

fn default_tracked_coin() -> String {
    TRACKED_COIN.to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".hype-tracker")
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            sell_window_secs: default_sell_window(),
            tracked_coin: default_tracked_coin(),
            store_dir: default_store_dir(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SettingsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Saturates at `MAX_SELL_WINDOW_SECS` for configs that skipped `validate`.
    pub fn sell_window(&self) -> chrono::Duration {
        let secs = self.sell_window_secs.min(MAX_SELL_WINDOW_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Where the staked amount comes from.
///
/// The upstream schema for delegation data is not settled, so both the query
/// kind and the response field are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Info API `type` for the staking query. Empty uses the spot state's
    /// `staking` field instead of a separate request.
    #[serde(default = "default_staking_query")]
    pub query: String,
    /// Field of the staking response holding the staked amount.
    #[serde(default = "default_staking_field")]
    pub field: String,
}

fn default_staking_query() -> String {
    "userStaking".to_string()
}

fn default_staking_field() -> String {
    "staked".to_string()
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            query: default_staking_query(),
            field: default_staking_field(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Reject settings that would make polling or metrics meaningless.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.endpoints.rpc_url)
            .with_context(|| format!("invalid rpc_url {:?}", self.endpoints.rpc_url))?;
        Url::parse(&self.endpoints.info_url)
            .with_context(|| format!("invalid info_url {:?}", self.endpoints.info_url))?;
        if self.settings.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.settings.sell_window_secs == 0 {
            anyhow::bail!("sell_window_secs must be positive");
        }
        if self.settings.sell_window_secs > MAX_SELL_WINDOW_SECS {
            anyhow::bail!(
                "sell_window_secs must be at most {MAX_SELL_WINDOW_SECS} (one year), got {}",
                self.settings.sell_window_secs
            );
        }
        if self.settings.tracked_coin.trim().is_empty() {
            anyhow::bail!("tracked_coin cannot be empty");
        }
        Ok(())
    }
}
