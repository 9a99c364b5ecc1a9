//! Authorization request and redirect handling
//!
//! `AuthorizationRequest` is the PKCE-bound front-channel request rendered as a
//! URL for the user agent. The user agent reports back with a result code and
//! a `RedirectPayload`; the strategy then turns that into an
//! `AuthorizationResult` (code + state check).

use std::collections::{BTreeMap, HashMap};

use url::Url;
use uuid::Uuid;

use crate::constants::{AUTHORIZE_PATH, CLIENT_REQUEST_ID_HEADER, client_error, oauth2_sub_error, redirect_param};
use crate::correlation::current_correlation_uuid;
use crate::error::{Error, Result};
use crate::pkce::{PkceChallenge, generate_state};

/// Service slice parameters (test/dogfood routing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slice {
    pub slice: Option<String>,
    pub dc: Option<String>,
}

/// A front-channel authorization-code request.
///
/// `state` and `pkce` are generated by the builder for every request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub authority: Url,
    pub authorization_endpoint: Url,
    pub scope: String,
    pub state: String,
    pub pkce: PkceChallenge,
    pub login_hint: Option<String>,
    pub prompt: Option<String>,
    pub uid: Option<String>,
    pub utid: Option<String>,
    pub extra_query_params: Vec<(String, String)>,
    pub extra_scopes_to_consent: Vec<String>,
    pub slice: Option<Slice>,
    pub flight_parameters: BTreeMap<String, String>,
    pub multiple_cloud_aware: bool,
    pub correlation_id: Option<Uuid>,
    pub request_headers: BTreeMap<String, String>,
}

impl AuthorizationRequest {
    /// Requested scopes plus any extra scopes to consent, deduplicated.
    pub fn full_scope(&self) -> String {
        let mut scopes: Vec<&str> = Vec::new();
        for scope in self
            .scope
            .split_whitespace()
            .chain(self.extra_scopes_to_consent.iter().map(String::as_str))
        {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes.join(" ")
    }

    /// Render the request as the URL the user agent should open.
    pub fn to_url(&self) -> Url {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", &self.full_scope())
                .append_pair("state", &self.state)
                .append_pair("code_challenge", self.pkce.challenge())
                .append_pair("code_challenge_method", self.pkce.method());

            if let Some(hint) = &self.login_hint {
                query.append_pair("login_hint", hint);
            }
            if let Some(prompt) = &self.prompt {
                query.append_pair("prompt", prompt);
            }
            if let (Some(uid), Some(utid)) = (&self.uid, &self.utid) {
                query.append_pair("login_req", uid);
                query.append_pair("domain_req", utid);
            }
            if self.multiple_cloud_aware {
                query.append_pair("instance_aware", "true");
            }
            if let Some(id) = self.correlation_id {
                query.append_pair(CLIENT_REQUEST_ID_HEADER, &id.to_string());
            }
            if let Some(slice) = &self.slice {
                if let Some(s) = &slice.slice {
                    query.append_pair("slice", s);
                }
                if let Some(dc) = &slice.dc {
                    query.append_pair("dc", dc);
                }
            }
            for (key, value) in &self.flight_parameters {
                query.append_pair(key, value);
            }
            for (key, value) in &self.extra_query_params {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// Builder for `AuthorizationRequest`, seeded by the strategy.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequestBuilder {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    authority: Option<Url>,
    authorization_endpoint: Option<Url>,
    scope: Option<String>,
    state: Option<String>,
    pkce: Option<PkceChallenge>,
    login_hint: Option<String>,
    prompt: Option<String>,
    uid: Option<String>,
    utid: Option<String>,
    extra_query_params: Vec<(String, String)>,
    extra_scopes_to_consent: Vec<String>,
    slice: Option<Slice>,
    flight_parameters: BTreeMap<String, String>,
    multiple_cloud_aware: bool,
    request_headers: BTreeMap<String, String>,
}

impl AuthorizationRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn authority(mut self, authority: Url) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn authorization_endpoint(mut self, endpoint: Url) -> Self {
        self.authorization_endpoint = Some(endpoint);
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Override the generated state. Only tests should need this.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Override the generated PKCE pair. Only tests should need this.
    pub fn pkce(mut self, pkce: PkceChallenge) -> Self {
        self.pkce = Some(pkce);
        self
    }

    pub fn login_hint(mut self, hint: Option<String>) -> Self {
        self.login_hint = hint;
        self
    }

    pub fn prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn utid(mut self, utid: impl Into<String>) -> Self {
        self.utid = Some(utid.into());
        self
    }

    pub fn extra_query_params(mut self, params: Vec<(String, String)>) -> Self {
        self.extra_query_params = params;
        self
    }

    pub fn extra_scopes_to_consent(mut self, scopes: Vec<String>) -> Self {
        self.extra_scopes_to_consent = scopes;
        self
    }

    pub fn slice(mut self, slice: Slice) -> Self {
        self.slice = Some(slice);
        self
    }

    pub fn flight_parameters(mut self, params: BTreeMap<String, String>) -> Self {
        self.flight_parameters = params;
        self
    }

    pub fn multiple_cloud_aware(mut self, aware: bool) -> Self {
        self.multiple_cloud_aware = aware;
        self
    }

    pub fn request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Validate and build. A fresh `state` and PKCE pair are generated unless
    /// explicitly supplied; the current correlation id (if a UUID) is attached.
    pub fn build(self) -> Result<AuthorizationRequest> {
        let client_id = require(self.client_id, "client_id")?;
        let redirect_uri = require(self.redirect_uri, "redirect_uri")?;
        let authority = require(self.authority, "authority")?;
        let scope = require(self.scope, "scope")?;
        let authorization_endpoint = match self.authorization_endpoint {
            Some(endpoint) => endpoint,
            None => authority_endpoint(&authority, AUTHORIZE_PATH)?,
        };

        Ok(AuthorizationRequest {
            client_id,
            redirect_uri,
            authority,
            authorization_endpoint,
            scope,
            state: self.state.unwrap_or_else(generate_state),
            pkce: self.pkce.unwrap_or_else(PkceChallenge::generate),
            login_hint: self.login_hint,
            prompt: self.prompt,
            uid: self.uid,
            utid: self.utid,
            extra_query_params: self.extra_query_params,
            extra_scopes_to_consent: self.extra_scopes_to_consent,
            slice: self.slice,
            flight_parameters: self.flight_parameters,
            multiple_cloud_aware: self.multiple_cloud_aware,
            correlation_id: current_correlation_uuid(),
            request_headers: self.request_headers,
        })
    }
}

fn require<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| {
        Error::client(
            client_error::MISSING_PARAMETER,
            format!("authorization request is missing {name}"),
        )
    })
}

/// Resolve `path` relative to an authority such as
/// `https://login.microsoftonline.com/common`, keeping the tenant segment.
pub fn authority_endpoint(authority: &Url, path: &str) -> Result<Url> {
    let mut base = authority.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).map_err(|e| {
        Error::client(
            client_error::MALFORMED_URL,
            format!("cannot derive endpoint {path} from {authority}: {e}"),
        )
    })
}

/// Completion codes reported by the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Redirect received; the final URL is in the payload.
    Complete,
    /// The user backed out, or the server redirected with sub-error `cancel`.
    Cancel,
    /// The server redirected with an error.
    Error,
    /// The user agent itself failed before a redirect arrived.
    AuthenticationException,
}

/// What the user agent hands back alongside a `ResultCode`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectPayload {
    pub final_url: Option<String>,
    pub error: Option<String>,
    pub error_subcode: Option<String>,
    pub error_message: Option<String>,
}

impl RedirectPayload {
    /// Classify a final redirect URL.
    ///
    /// - `error` present: `Error`, with the message taken from
    ///   `error_description` or, when that is empty, `error_subcode`.
    /// - sub-error `cancel` (any case): `Cancel`, whatever `error` says.
    /// - no `error`: `Complete`, carrying the full URL for code extraction.
    pub fn from_redirect_url(url: &str) -> (ResultCode, Self) {
        let params = url_parameters(url);
        let error = non_empty(params.get(redirect_param::ERROR));

        let Some(error) = error else {
            return (
                ResultCode::Complete,
                Self {
                    final_url: Some(url.to_string()),
                    ..Self::default()
                },
            );
        };

        let subcode = non_empty(params.get(redirect_param::ERROR_SUBCODE));
        let message = non_empty(params.get(redirect_param::ERROR_DESCRIPTION)).or_else(|| subcode.clone());
        let code = if subcode
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(oauth2_sub_error::CANCEL))
        {
            ResultCode::Cancel
        } else {
            ResultCode::Error
        };

        (
            code,
            Self {
                final_url: None,
                error: Some(error),
                error_subcode: subcode,
                error_message: message,
            },
        )
    }

    /// The user left the flow without a redirect.
    pub fn cancelled() -> (ResultCode, Self) {
        (ResultCode::Cancel, Self::default())
    }

    /// The user agent failed before a redirect arrived.
    pub fn exception(message: impl Into<String>) -> (ResultCode, Self) {
        (
            ResultCode::AuthenticationException,
            Self {
                error_message: Some(message.into()),
                ..Self::default()
            },
        )
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

/// Query and fragment parameters of a URL. Query values win on conflict.
pub fn url_parameters(url: &str) -> HashMap<String, String> {
    let Ok(parsed) = Url::parse(url) else {
        return HashMap::new();
    };
    let mut params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    if let Some(fragment) = parsed.fragment() {
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()).into_owned() {
            params.entry(key).or_insert(value);
        }
    }
    params
}

/// The successful part of a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
    /// Cloud the user actually authenticated against (cross-cloud redirects).
    pub cloud_instance_host_name: Option<String>,
}

/// Error details from a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationErrorResponse {
    pub error: String,
    pub subcode: Option<String>,
    pub description: Option<String>,
}

impl AuthorizationErrorResponse {
    pub fn new(error: impl Into<String>, subcode: Option<String>, description: Option<String>) -> Self {
        Self {
            error: error.into(),
            subcode,
            description,
        }
    }

    /// Description, falling back to the sub-error, then the error code.
    pub fn message(&self) -> &str {
        self.description
            .as_deref()
            .or(self.subcode.as_deref())
            .unwrap_or(&self.error)
    }
}

/// Outcome of one authorization flow. Exactly one per completed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Success(AuthorizationResponse),
    Cancel,
    Error(AuthorizationErrorResponse),
}

impl AuthorizationResult {
    pub fn label(&self) -> &'static str {
        match self {
            AuthorizationResult::Success(_) => "success",
            AuthorizationResult::Cancel => "cancel",
            AuthorizationResult::Error(_) => "error",
        }
    }
}
