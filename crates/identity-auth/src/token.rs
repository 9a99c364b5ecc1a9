//! Token endpoint requests and responses
//!
//! Two grant types reach the token endpoint:
//! 1. `authorization_code`, redeeming the code from an interactive flow
//!    together with the PKCE verifier
//! 2. `refresh_token`, used by the silent flow
//!
//! Each request carries its own endpoint so a cross-cloud redirect can retarget
//! one exchange without touching the shared strategy.

use common::Secret;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::constants::{CLIENT_REQUEST_ID_HEADER, grant_type};

/// A request to the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub token_endpoint: Url,
    pub grant_type: String,
    pub client_id: Option<String>,
    pub code: Option<String>,
    pub code_verifier: Option<Secret<String>>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<Secret<String>>,
    pub scope: Option<String>,
    pub correlation_id: Option<Uuid>,
    /// Ask the server to return the `client_info` blob.
    pub request_client_info: bool,
}

impl TokenRequest {
    pub fn new(token_endpoint: Url, grant_type: &str) -> Self {
        Self {
            token_endpoint,
            grant_type: grant_type.to_string(),
            client_id: None,
            code: None,
            code_verifier: None,
            redirect_uri: None,
            refresh_token: None,
            scope: None,
            correlation_id: None,
            request_client_info: true,
        }
    }

    pub fn is_refresh(&self) -> bool {
        self.grant_type == grant_type::REFRESH_TOKEN
    }

    /// Form-encoded body parameters. Absent fields are omitted.
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut form = vec![("grant_type".to_string(), self.grant_type.clone())];
        let mut push = |name: &str, value: Option<&str>| {
            if let Some(v) = value {
                form.push((name.to_string(), v.to_string()));
            }
        };
        push("client_id", self.client_id.as_deref());
        push("code", self.code.as_deref());
        push("code_verifier", self.code_verifier.as_ref().map(|v| v.expose().as_str()));
        push("redirect_uri", self.redirect_uri.as_deref());
        push("refresh_token", self.refresh_token.as_ref().map(|v| v.expose().as_str()));
        push("scope", self.scope.as_deref());
        if self.request_client_info {
            push("client_info", Some("1"));
        }
        form
    }

    /// Headers sent with the request (correlation id when known).
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(id) = self.correlation_id {
            headers.push((CLIENT_REQUEST_ID_HEADER.to_string(), id.to_string()));
            headers.push(("return-client-request-id".to_string(), "true".to_string()));
        }
        headers
    }
}

/// Successful token endpoint response.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub client_info: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub ext_expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Family-of-client-id marker ("1" when the app belongs to the family).
    #[serde(default)]
    pub foci: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry as unix milliseconds, relative to `now_millis`.
    pub fn expires_on(&self, now_millis: u64) -> u64 {
        now_millis.saturating_add(self.expires_in.unwrap_or(0).saturating_mul(1000))
    }

    /// Granted scopes, split on whitespace.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

/// Error body returned by the token endpoint, plus transport details attached
/// after parsing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenErrorResponse {
    /// Empty in the body is replaced by `http_<status>` once the status is known.
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default, alias = "error_subcode")]
    pub suberror: Option<String>,
    #[serde(default)]
    pub error_codes: Vec<i64>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(skip)]
    pub status_code: u16,
    #[serde(skip)]
    pub response_headers_json: Option<String>,
    #[serde(skip)]
    pub response_body: Option<String>,
}

impl TokenErrorResponse {
    pub fn message(&self) -> &str {
        self.error_description.as_deref().unwrap_or(&self.error)
    }
}

/// Either a token response or a token error response, never both.
#[derive(Debug, Clone)]
pub enum TokenResult {
    Success(TokenResponse),
    Error(TokenErrorResponse),
}

impl TokenResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TokenResult::Success(_))
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
