//! Accounts derived from identity claims
//!
//! An account is built from two server-issued blobs: the OIDC id token (a JWT
//! whose payload carries the user's claims) and `client_info` (base64url JSON
//! with the home `uid`/`utid`). Signatures are not verified here; the token
//! came straight from the token endpoint over TLS.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::constants::client_error;
use crate::error::{Error, Result};

/// Claims read from an id token payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A decoded id token.
#[derive(Debug, Clone)]
pub struct IdToken {
    raw: String,
    claims: IdTokenClaims,
}

impl IdToken {
    /// Decode the payload segment of a JWT.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = raw.split('.');
        let payload = match (segments.next(), segments.next()) {
            (Some(_header), Some(payload)) if !payload.is_empty() => payload,
            _ => {
                return Err(Error::client(
                    client_error::INVALID_ID_TOKEN,
                    "id token is not a JWT",
                ));
            }
        };
        let claims = decode_json(payload, client_error::INVALID_ID_TOKEN, "id token")?;
        Ok(Self {
            raw: raw.to_string(),
            claims,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }
}

/// The `client_info` blob: home object id and home tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    pub uid: String,
    pub utid: String,
}

impl ClientInfo {
    pub fn parse(raw: &str) -> Result<Self> {
        decode_json(raw, client_error::INVALID_CLIENT_INFO, "client info")
    }

    pub fn home_account_id(&self) -> String {
        format!("{}.{}", self.uid, self.utid)
    }
}

fn decode_json<T: DeserializeOwned>(segment: &str, code: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| Error::client(code, format!("{what} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::client(code, format!("{what} is not valid JSON: {e}")))
}

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// `uid.utid` of the home tenant.
    pub home_account_id: String,
    /// Cache partition host. Set from the issuer claim at construction, then
    /// overwritten by the strategy with the issuer cache identifier.
    pub environment: String,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub local_account_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Account {
    pub fn new(id_token: &IdToken, client_info: &ClientInfo) -> Self {
        let claims = id_token.claims();
        let environment = claims
            .iss
            .as_deref()
            .and_then(|iss| Url::parse(iss).ok())
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();

        Self {
            home_account_id: client_info.home_account_id(),
            environment,
            realm: claims.tid.clone(),
            local_account_id: claims.oid.clone().or_else(|| claims.sub.clone()),
            username: claims.preferred_username.clone(),
            name: claims.name.clone(),
        }
    }

    /// `(uid, utid)` decomposed from the home account id.
    pub fn tenant_info(&self) -> (String, String) {
        split_home_account_id(&self.home_account_id)
    }
}

/// Split `uid.utid`. Missing halves come back empty.
pub fn split_home_account_id(home_account_id: &str) -> (String, String) {
    match home_account_id.split_once('.') {
        Some((uid, utid)) => (uid.to_string(), utid.to_string()),
        None => (home_account_id.to_string(), String::new()),
    }
}
