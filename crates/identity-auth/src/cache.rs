//! Credential cache
//!
//! `TokenCache` is the collaborator the silent flow reads from and both flows
//! write to. `CredentialStore` is the file-backed implementation: a JSON file
//! holding credentials keyed by account, environment and client id, plus the
//! application metadata entries. All writes use atomic temp-file + rename and
//! a tokio Mutex serializes concurrent writers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::Account;
use crate::constants::client_error;
use crate::error::{Error, Result};
use crate::metadata::ApplicationMetadata;
use crate::transport::BoxFuture;

/// Access tokens this close to expiry are treated as expired.
pub const EXPIRY_BUFFER_MS: u64 = 5 * 60 * 1000;

/// Tokens cached for one account of one client in one environment.
///
/// `expires_on` is a unix timestamp in milliseconds (absolute, not a delta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCredential {
    pub account: Account,
    #[serde(default)]
    pub access_token: Option<Secret<String>>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_on: u64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl CachedCredential {
    /// Whether the cached access token covers `scopes` and outlives the
    /// expiry buffer at `now_millis`.
    pub fn has_valid_access_token(&self, scopes: &[String], now_millis: u64) -> bool {
        if !self.has_access_token() || self.expires_on <= now_millis + EXPIRY_BUFFER_MS {
            return false;
        }
        scopes
            .iter()
            .all(|s| self.scopes.iter().any(|c| c.eq_ignore_ascii_case(s)))
    }

    pub fn has_access_token(&self) -> bool {
        non_empty(self.access_token.as_ref())
    }

    pub fn has_refresh_token(&self) -> bool {
        non_empty(self.refresh_token.as_ref())
    }
}

fn non_empty(token: Option<&Secret<String>>) -> bool {
    token.is_some_and(|t| !t.expose().is_empty())
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Usable tokens are cached.
    Found(CachedCredential),
    /// Nothing cached for the account.
    NotFound,
    /// The account is known but holds nothing a silent flow can redeem.
    UiRequired,
}

/// Cache collaborator used by the token controller.
pub trait TokenCache: Send + Sync {
    fn lookup<'a>(&'a self, client_id: &'a str, account: &'a Account) -> BoxFuture<'a, Result<CacheLookup>>;

    fn save<'a>(
        &'a self,
        client_id: &'a str,
        credential: CachedCredential,
        metadata: Option<ApplicationMetadata>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Drop the tokens held for an account, keeping the account itself.
    fn invalidate<'a>(&'a self, client_id: &'a str, account: &'a Account) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    credentials: HashMap<String, CachedCredential>,
    #[serde(default)]
    app_metadata: HashSet<ApplicationMetadata>,
}

fn credential_key(client_id: &str, home_account_id: &str, environment: &str) -> String {
    format!("{home_account_id}-{environment}-{client_id}").to_ascii_lowercase()
}

/// File-backed `TokenCache`.
///
/// Reads take the lock briefly to clone what they need.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<CacheFile>,
}

impl CredentialStore {
    /// Load the cache file, creating an empty one if it does not exist.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| cache_failure(format!("reading cache file: {e}")))?;
            let file: CacheFile = serde_json::from_str(&contents)
                .map_err(|e| cache_failure(format!("parsing cache file: {e}")))?;
            info!(
                path = %path.display(),
                credentials = file.credentials.len(),
                "loaded credential cache"
            );
            file
        } else {
            info!(path = %path.display(), "cache file not found, starting with empty cache");
            let file = CacheFile::default();
            write_atomic(&path, &file).await?;
            file
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Accounts with cached credentials for `client_id`.
    pub async fn accounts(&self, client_id: &str) -> Vec<Account> {
        let state = self.state.lock().await;
        let suffix = format!("-{}", client_id.to_ascii_lowercase());
        let mut accounts: Vec<Account> = state
            .credentials
            .iter()
            .filter(|(key, _)| key.ends_with(&suffix))
            .map(|(_, credential)| credential.account.clone())
            .collect();
        accounts.sort_by(|a, b| a.home_account_id.cmp(&b.home_account_id));
        accounts
    }

    /// Cached credential for an account, if any.
    pub async fn get(&self, client_id: &str, account: &Account) -> Option<CachedCredential> {
        let key = credential_key(client_id, &account.home_account_id, &account.environment);
        let state = self.state.lock().await;
        state.credentials.get(&key).cloned()
    }

    /// Remove an account's credential and persist. Returns whether it existed.
    pub async fn remove(&self, client_id: &str, account: &Account) -> Result<bool> {
        let key = credential_key(client_id, &account.home_account_id, &account.environment);
        let mut state = self.state.lock().await;
        let removed = state.credentials.remove(&key).is_some();
        if removed {
            debug!(key = %key, "removed credential");
            write_atomic(&self.path, &state).await?;
        }
        Ok(removed)
    }

    pub async fn app_metadata(&self) -> Vec<ApplicationMetadata> {
        let state = self.state.lock().await;
        state.app_metadata.iter().cloned().collect()
    }

    /// Number of cached credentials.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.credentials.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl TokenCache for CredentialStore {
    fn lookup<'a>(&'a self, client_id: &'a str, account: &'a Account) -> BoxFuture<'a, Result<CacheLookup>> {
        Box::pin(async move {
            let Some(credential) = self.get(client_id, account).await else {
                return Ok(CacheLookup::NotFound);
            };
            if credential.has_refresh_token() || credential.has_access_token() {
                Ok(CacheLookup::Found(credential))
            } else {
                Ok(CacheLookup::UiRequired)
            }
        })
    }

    fn save<'a>(
        &'a self,
        client_id: &'a str,
        mut credential: CachedCredential,
        metadata: Option<ApplicationMetadata>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = credential_key(
                client_id,
                &credential.account.home_account_id,
                &credential.account.environment,
            );
            let mut state = self.state.lock().await;

            // A refresh response may omit the refresh token; keep the one we have.
            if credential.refresh_token.is_none() {
                credential.refresh_token = state
                    .credentials
                    .get(&key)
                    .and_then(|existing| existing.refresh_token.clone());
            }
            state.credentials.insert(key.clone(), credential);
            if let Some(entry) = metadata {
                state
                    .app_metadata
                    .retain(|m| !(m.client_id == entry.client_id && m.environment == entry.environment));
                state.app_metadata.insert(entry);
            }
            debug!(key = %key, "saved credential");
            write_atomic(&self.path, &state).await
        })
    }

    fn invalidate<'a>(&'a self, client_id: &'a str, account: &'a Account) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = credential_key(client_id, &account.home_account_id, &account.environment);
            let mut state = self.state.lock().await;
            let Some(credential) = state.credentials.get_mut(&key) else {
                return Ok(());
            };
            credential.access_token = None;
            credential.refresh_token = None;
            credential.expires_on = 0;
            info!(key = %key, "invalidated cached tokens");
            write_atomic(&self.path, &state).await
        })
    }
}

fn cache_failure(message: String) -> Error {
    Error::client(client_error::CACHE_FAILURE, message)
}

/// Write the cache file atomically with 0600 permissions.
async fn write_atomic(path: &Path, data: &CacheFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| cache_failure(format!("serializing cache: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| cache_failure("cache path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".identity-cache.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| cache_failure(format!("writing temp cache file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| cache_failure(format!("setting cache file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| cache_failure(format!("renaming temp cache file: {e}")))?;

    debug!(path = %path.display(), "persisted credential cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const CLIENT: &str = "client-123";

    fn account(uid: &str) -> Account {
        Account {
            home_account_id: format!("{uid}.tenant"),
            environment: "login.windows.net".into(),
            realm: Some("tenant".into()),
            local_account_id: None,
            username: Some(format!("{uid}@contoso.com")),
            name: None,
        }
    }

    fn credential(uid: &str, refresh: Option<&str>) -> CachedCredential {
        CachedCredential {
            account: account(uid),
            access_token: Some(Secret::new(format!("at_{uid}"))),
            refresh_token: refresh.map(|t| Secret::new(t.to_string())),
            id_token: None,
            expires_on: 10_000_000,
            scopes: vec!["user.read".into()],
            tenant_id: Some("tenant".into()),
        }
    }

    #[tokio::test]
    async fn save_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store
            .save(
                CLIENT,
                credential("alice", Some("rt_alice")),
                Some(ApplicationMetadata::new(CLIENT, "login.windows.net", None, 1000)),
            )
            .await
            .unwrap();

        let reloaded = CredentialStore::load(path).await.unwrap();
        let CacheLookup::Found(found) = reloaded.lookup(CLIENT, &account("alice")).await.unwrap() else {
            panic!("expected cached credential");
        };
        assert_eq!(found.refresh_token.as_ref().map(|t| t.expose().as_str()), Some("rt_alice"));
        assert_eq!(reloaded.app_metadata().await.len(), 1);
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        assert!(!path.exists());
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("cache.json")).await.unwrap();
        assert!(matches!(
            store.lookup(CLIENT, &account("nobody")).await.unwrap(),
            CacheLookup::NotFound
        ));
    }

    #[tokio::test]
    async fn invalidated_account_requires_ui() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("cache.json")).await.unwrap();
        store.save(CLIENT, credential("bob", Some("rt_bob")), None).await.unwrap();

        store.invalidate(CLIENT, &account("bob")).await.unwrap();
        assert!(matches!(
            store.lookup(CLIENT, &account("bob")).await.unwrap(),
            CacheLookup::UiRequired
        ));
    }

    #[tokio::test]
    async fn refresh_token_survives_response_without_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("cache.json")).await.unwrap();
        store.save(CLIENT, credential("carol", Some("rt_old")), None).await.unwrap();
        store.save(CLIENT, credential("carol", None), None).await.unwrap();

        let cached = store.get(CLIENT, &account("carol")).await.unwrap();
        assert_eq!(cached.refresh_token.as_ref().map(|t| t.expose().as_str()), Some("rt_old"));
    }

    #[tokio::test]
    async fn metadata_replaced_per_client_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("cache.json")).await.unwrap();
        let first = ApplicationMetadata::new(CLIENT, "login.windows.net", None, 1000);
        let second = ApplicationMetadata::new(CLIENT, "login.windows.net", Some("1".into()), 1000);

        store.save(CLIENT, credential("dan", Some("rt")), Some(first)).await.unwrap();
        store.save(CLIENT, credential("dan", Some("rt")), Some(second.clone())).await.unwrap();

        assert_eq!(store.app_metadata().await, vec![second]);
    }

    #[tokio::test]
    async fn accounts_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("cache.json")).await.unwrap();
        store.save(CLIENT, credential("b", Some("rt")), None).await.unwrap();
        store.save(CLIENT, credential("a", Some("rt")), None).await.unwrap();
        store.save("other-client", credential("c", Some("rt")), None).await.unwrap();

        let ids: Vec<_> = store
            .accounts(CLIENT)
            .await
            .into_iter()
            .map(|a| a.home_account_id)
            .collect();
        assert_eq!(ids, vec!["a.tenant", "b.tenant"]);

        assert!(store.remove(CLIENT, &account("a")).await.unwrap());
        assert!(!store.remove(CLIENT, &account("a")).await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[test]
    fn access_token_validity() {
        let cached = credential("e", None);
        let scopes = vec!["User.Read".to_string()];
        assert!(cached.has_valid_access_token(&scopes, 0));
        assert!(!cached.has_valid_access_token(&scopes, 10_000_000 - EXPIRY_BUFFER_MS));
        assert!(!cached.has_valid_access_token(&["mail.read".to_string()], 0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.save(CLIENT, credential("f", Some("rt")), None).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "cache file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save(CLIENT, credential(&format!("user{i}"), Some("rt")), None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: CacheFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.credentials.len(), 10);
    }
}
