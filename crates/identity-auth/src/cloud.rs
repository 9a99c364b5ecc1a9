//! Cloud/issuer registry
//!
//! Several authority host names alias the same logical cloud (e.g.
//! `login.microsoftonline.com` and `login.windows.net`). Cached credentials
//! must collapse onto one canonical host per cloud, so the strategy resolves
//! every authority through a registry before using its host as a cache key.

use std::collections::HashMap;

use serde::Deserialize;

/// A logical cloud and the host names that reach it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudDescriptor {
    /// Host used for network calls.
    pub preferred_network_host: String,
    /// Host used as the cache partition key.
    pub preferred_cache_host: String,
    /// Every host that resolves to this cloud, including the preferred ones.
    pub aliases: Vec<String>,
}

impl CloudDescriptor {
    pub fn new(network: &str, cache: &str, aliases: &[&str]) -> Self {
        Self {
            preferred_network_host: network.to_string(),
            preferred_cache_host: cache.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Lookup of the cloud an authority host belongs to.
pub trait CloudRegistry: Send + Sync {
    fn lookup(&self, authority_host: &str) -> Option<CloudDescriptor>;
}

/// In-memory registry keyed by lowercase alias.
#[derive(Debug, Clone, Default)]
pub struct StaticCloudRegistry {
    by_alias: HashMap<String, CloudDescriptor>,
}

impl StaticCloudRegistry {
    /// Empty registry; every host resolves to itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the well-known public, US government and China clouds.
    pub fn well_known() -> Self {
        let mut registry = Self::new();
        registry.register(CloudDescriptor::new(
            "login.microsoftonline.com",
            "login.windows.net",
            &[
                "login.microsoftonline.com",
                "login.windows.net",
                "login.microsoft.com",
                "sts.windows.net",
            ],
        ));
        registry.register(CloudDescriptor::new(
            "login.microsoftonline.us",
            "login.microsoftonline.us",
            &["login.microsoftonline.us", "login.usgovcloudapi.net"],
        ));
        registry.register(CloudDescriptor::new(
            "login.partner.microsoftonline.cn",
            "login.partner.microsoftonline.cn",
            &["login.partner.microsoftonline.cn", "login.chinacloudapi.cn"],
        ));
        registry
    }

    /// Add a cloud. Aliases already registered are re-pointed to it.
    pub fn register(&mut self, cloud: CloudDescriptor) {
        let mut hosts = cloud.aliases.clone();
        hosts.push(cloud.preferred_network_host.clone());
        hosts.push(cloud.preferred_cache_host.clone());
        for host in hosts {
            self.by_alias.insert(host.to_ascii_lowercase(), cloud.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

impl CloudRegistry for StaticCloudRegistry {
    fn lookup(&self, authority_host: &str) -> Option<CloudDescriptor> {
        self.by_alias
            .get(&authority_host.to_ascii_lowercase())
            .cloned()
    }
}
