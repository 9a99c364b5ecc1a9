//! OAuth2 protocol constants
//!
//! Parameter names, grant types and error codes shared by the strategy, the
//! error adapter and the runtime crate. Error codes produced locally (client
//! errors) live next to the protocol ones so callers can match on a single
//! string namespace.

/// Request code the browser user agent reports back on completion.
pub const BROWSER_FLOW: i32 = 1001;

/// Default OIDC scopes added to every interactive request.
pub const OIDC_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

/// Path (relative to the authority) of the v2.0 authorization endpoint.
pub const AUTHORIZE_PATH: &str = "oauth2/v2.0/authorize";

/// Path (relative to the authority) of the v2.0 token endpoint.
pub const TOKEN_PATH: &str = "oauth2/v2.0/token";

/// Header carrying the correlation id on token endpoint calls.
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Grant type values for the token endpoint.
pub mod grant_type {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Query parameters found on redirect URLs.
pub mod redirect_param {
    pub const CODE: &str = "code";
    pub const STATE: &str = "state";
    pub const ERROR: &str = "error";
    pub const ERROR_SUBCODE: &str = "error_subcode";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const CLOUD_INSTANCE_HOST_NAME: &str = "cloud_instance_host_name";
}

/// Error codes returned by the authorization server.
pub mod oauth2_error {
    pub const INVALID_GRANT: &str = "invalid_grant";
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const LOGIN_REQUIRED: &str = "login_required";
}

/// Sub-error codes returned by the authorization server.
pub mod oauth2_sub_error {
    pub const BAD_TOKEN: &str = "bad_token";
    pub const CANCEL: &str = "cancel";
}

/// Error codes raised by this library rather than the server.
pub mod client_error {
    pub const NO_AGENT_AVAILABLE: &str = "no_agent_available";
    pub const ORCHESTRATOR_DISPOSED: &str = "orchestrator_disposed";
    pub const AUTHORIZATION_ABANDONED: &str = "authorization_abandoned";
    pub const AUTHORIZATION_TIMED_OUT: &str = "authorization_timed_out";
    pub const AUTHORIZATION_FAILED: &str = "authorization_failed";
    pub const AUTHENTICATION_EXCEPTION: &str = "authentication_exception";
    pub const STATE_MISMATCH: &str = "state_mismatch";
    pub const MISSING_PARAMETER: &str = "missing_parameter";
    pub const MALFORMED_URL: &str = "malformed_url";
    pub const MALFORMED_TOKEN_RESPONSE: &str = "malformed_token_response";
    pub const INVALID_ID_TOKEN: &str = "invalid_id_token";
    pub const INVALID_CLIENT_INFO: &str = "invalid_client_info";
    pub const CACHE_FAILURE: &str = "cache_failure";
    pub const UNKNOWN_ERROR: &str = "unknown_error";
}

/// Codes carried by `UiRequired` errors raised from the silent flow.
pub mod ui_required {
    /// No access token and no refresh token to redeem one.
    pub const NO_TOKENS_FOUND: &str = "no_tokens_found";
    /// The supplied account is not in the cache.
    pub const NO_ACCOUNT_FOUND: &str = "no_account_found";
}
