//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Only the client id can come from the environment (`IDENTITY_CLIENT_ID`);
//! everything else lives in the TOML file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use identity_auth::authorization::Slice;
use identity_auth::{CloudDescriptor, StaticCloudRegistry, StrategyConfig};
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub strategy: StrategySettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub interactive: InteractiveConfig,
    /// Clouds registered on top of the well-known ones.
    #[serde(default)]
    pub clouds: Vec<CloudDescriptor>,
}

/// Application registration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Process uid recorded in the application metadata cache entry.
    #[serde(default)]
    pub application_uid: i32,
}

/// Protocol knobs passed to the strategy
#[derive(Debug, Default, Deserialize)]
pub struct StrategySettings {
    #[serde(default)]
    pub multiple_clouds_supported: bool,
    #[serde(default)]
    pub slice: Option<String>,
    #[serde(default)]
    pub dc: Option<String>,
    #[serde(default)]
    pub flight_parameters: BTreeMap<String, String>,
}

/// Credential cache settings
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// Interactive flow settings
#[derive(Debug, Default, Deserialize)]
pub struct InteractiveConfig {
    /// Give up waiting for the redirect after this long. Unset waits forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl InteractiveConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_authority() -> String {
    "https://login.microsoftonline.com/common".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["user.read".to_string()]
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("identity-cache.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("IDENTITY_CLIENT_ID") {
            config.client.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.client.client_id.trim().is_empty() {
            return Err(common::Error::config(
                "client.client_id must be set in the config file or IDENTITY_CLIENT_ID",
            ));
        }

        if self.client.redirect_uri.trim().is_empty() {
            return Err(common::Error::config("client.redirect_uri must not be empty"));
        }

        let authority = self.authority()?;
        if authority.scheme() != "https" {
            return Err(common::Error::config(format!(
                "client.authority must use https, got: {authority}"
            )));
        }

        if self.client.scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(common::Error::config("client.scopes must not contain empty entries"));
        }

        if self.interactive.timeout_secs == Some(0) {
            return Err(common::Error::config(
                "interactive.timeout_secs must be greater than 0",
            ));
        }

        for cloud in &self.clouds {
            if cloud.preferred_network_host.trim().is_empty() || cloud.preferred_cache_host.trim().is_empty() {
                return Err(common::Error::config(
                    "clouds entries need preferred_network_host and preferred_cache_host",
                ));
            }
        }

        Ok(())
    }

    pub fn authority(&self) -> common::Result<Url> {
        Url::parse(&self.client.authority)
            .map_err(|e| common::Error::config(format!("client.authority is not a URL: {e}")))
    }

    /// Strategy configuration for the configured authority.
    pub fn strategy_config(&self) -> common::Result<StrategyConfig> {
        let mut strategy = StrategyConfig::new(self.authority()?)
            .map_err(|e| common::Error::config(format!("invalid authority: {e}")))?;
        strategy.multiple_clouds_supported = self.strategy.multiple_clouds_supported;
        strategy.flight_parameters = self.strategy.flight_parameters.clone();
        if self.strategy.slice.is_some() || self.strategy.dc.is_some() {
            strategy.slice = Some(Slice {
                slice: self.strategy.slice.clone(),
                dc: self.strategy.dc.clone(),
            });
        }
        Ok(strategy)
    }

    /// Well-known clouds plus the configured ones.
    pub fn cloud_registry(&self) -> StaticCloudRegistry {
        let mut registry = StaticCloudRegistry::well_known();
        for cloud in &self.clouds {
            registry.register(cloud.clone());
        }
        registry
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("identity-cli.toml")
    }
}
