//! OAuth2 protocol strategy
//!
//! The strategy is the stateless protocol engine: it seeds authorization
//! requests from static configuration, classifies user-agent completions,
//! builds and sends token requests, parses token endpoint responses, and
//! decides which host partitions the cache.
//!
//! Nothing here mutates shared state. A cross-cloud redirect retargets the
//! token endpoint of the one `TokenRequest` it produced, never the strategy.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::account::{Account, ClientInfo, IdToken, split_home_account_id};
use crate::authorization::{
    AuthorizationErrorResponse, AuthorizationRequest, AuthorizationRequestBuilder,
    AuthorizationResponse, AuthorizationResult, RedirectPayload, ResultCode, Slice,
    authority_endpoint, url_parameters,
};
use crate::cloud::CloudRegistry;
use crate::constants::{TOKEN_PATH, client_error, grant_type, redirect_param};
use crate::correlation::current_correlation_uuid;
use crate::error::{Error, Result};
use crate::token::{TokenErrorResponse, TokenRequest, TokenResponse, TokenResult};
use crate::transport::{BoxFuture, HttpResponse, TokenTransport};

/// Protocol operations used by the token controller.
pub trait OAuth2Strategy: Send + Sync {
    /// Builder seeded with authority, slice and flight parameters. With an
    /// account hint, `uid`/`utid` are seeded when both halves are non-blank.
    fn create_authorization_request_builder(&self, account: Option<&Account>) -> AuthorizationRequestBuilder;

    /// Cache partition host for a request's authority.
    fn issuer_cache_identifier(&self, request: &AuthorizationRequest) -> String;

    /// Turn a user-agent completion into an authorization result. A returned
    /// `state` that differs from the request's is rejected.
    fn create_authorization_result(
        &self,
        result_code: ResultCode,
        payload: &RedirectPayload,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult>;

    /// Code-redemption request bound to the request's PKCE verifier.
    fn create_token_request(
        &self,
        request: &AuthorizationRequest,
        response: &AuthorizationResponse,
    ) -> Result<TokenRequest>;

    /// Refresh request with only the grant type set.
    fn create_refresh_token_request(&self) -> TokenRequest;

    fn token_result_from_http_response(&self, response: HttpResponse) -> Result<TokenResult>;

    /// Account from the id token and client info of a token response. The
    /// environment is the issuer cache identifier of `token_endpoint`.
    fn create_account(&self, token_endpoint: &Url, response: &TokenResponse) -> Result<Account>;

    /// POST a token request and parse the response. No retries.
    fn request_token<'a>(
        &'a self,
        transport: &'a dyn TokenTransport,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            debug!(
                endpoint = %request.token_endpoint,
                grant_type = %request.grant_type,
                "sending token request"
            );
            let form = request.form_params();
            let headers = request.headers();
            let response = transport.post(&request.token_endpoint, &form, &headers).await?;
            self.token_result_from_http_response(response)
        })
    }
}

/// Static configuration of a `MicrosoftStsStrategy`.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub authority: Url,
    pub token_endpoint: Url,
    pub slice: Option<Slice>,
    pub flight_parameters: BTreeMap<String, String>,
    pub multiple_clouds_supported: bool,
}

impl StrategyConfig {
    /// Configuration for `authority` with the token endpoint derived from it.
    pub fn new(authority: Url) -> Result<Self> {
        let token_endpoint = authority_endpoint(&authority, TOKEN_PATH)?;
        Ok(Self {
            authority,
            token_endpoint,
            slice: None,
            flight_parameters: BTreeMap::new(),
            multiple_clouds_supported: false,
        })
    }
}

/// Strategy for the Microsoft identity platform v2.0 endpoints.
#[derive(Clone)]
pub struct MicrosoftStsStrategy {
    config: StrategyConfig,
    registry: Arc<dyn CloudRegistry>,
}

impl MicrosoftStsStrategy {
    pub fn new(config: StrategyConfig, registry: Arc<dyn CloudRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn cache_identifier_for(&self, authority: &Url) -> String {
        let host = authority.host_str().unwrap_or_default();
        match self.registry.lookup(host) {
            Some(cloud) => {
                info!("using preferred cache host name");
                debug!(cache_host = %cloud.preferred_cache_host, "preferred cache host");
                cloud.preferred_cache_host
            }
            None => host.to_string(),
        }
    }

    fn token_endpoint_for(&self, response: &AuthorizationResponse) -> Result<Url> {
        let mut endpoint = self.config.token_endpoint.clone();
        if !self.config.multiple_clouds_supported {
            return Ok(endpoint);
        }
        if let Some(host) = response
            .cloud_instance_host_name
            .as_deref()
            .filter(|h| !h.trim().is_empty())
        {
            endpoint.set_host(Some(host)).map_err(|e| {
                Error::client(
                    client_error::MALFORMED_URL,
                    format!("invalid cloud instance host {host}: {e}"),
                )
            })?;
            info!(cloud_instance = %host, "token endpoint retargeted to cloud instance");
        }
        Ok(endpoint)
    }
}

impl std::fmt::Debug for MicrosoftStsStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrosoftStsStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OAuth2Strategy for MicrosoftStsStrategy {
    fn create_authorization_request_builder(&self, account: Option<&Account>) -> AuthorizationRequestBuilder {
        let mut builder = AuthorizationRequestBuilder::new()
            .authority(self.config.authority.clone())
            .flight_parameters(self.config.flight_parameters.clone())
            .multiple_cloud_aware(self.config.multiple_clouds_supported);

        if let Some(slice) = &self.config.slice {
            debug!("setting slice parameters");
            builder = builder.slice(slice.clone());
        }

        if let Some(account) = account {
            let (uid, utid) = split_home_account_id(&account.home_account_id);
            if !uid.trim().is_empty() && !utid.trim().is_empty() {
                debug!(uid = %uid, utid = %utid, "authorization request seeded with account hint");
                builder = builder.uid(uid).utid(utid);
            }
        }

        builder
    }

    fn issuer_cache_identifier(&self, request: &AuthorizationRequest) -> String {
        self.cache_identifier_for(&request.authority)
    }

    fn create_authorization_result(
        &self,
        result_code: ResultCode,
        payload: &RedirectPayload,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResult> {
        match result_code {
            ResultCode::Cancel => {
                info!("user cancelled the authorization flow");
                Ok(AuthorizationResult::Cancel)
            }
            ResultCode::Error => {
                let error = payload
                    .error
                    .clone()
                    .unwrap_or_else(|| client_error::AUTHORIZATION_FAILED.to_string());
                warn!(error = %error, "authorization server redirected with an error");
                Ok(AuthorizationResult::Error(AuthorizationErrorResponse::new(
                    error,
                    payload.error_subcode.clone(),
                    payload.error_message.clone(),
                )))
            }
            ResultCode::AuthenticationException => {
                warn!("user agent failed before a redirect arrived");
                Ok(AuthorizationResult::Error(AuthorizationErrorResponse::new(
                    client_error::AUTHENTICATION_EXCEPTION,
                    None,
                    payload.error_message.clone(),
                )))
            }
            ResultCode::Complete => {
                let Some(url) = payload.final_url.as_deref() else {
                    return Ok(AuthorizationResult::Error(AuthorizationErrorResponse::new(
                        client_error::AUTHORIZATION_FAILED,
                        None,
                        Some("completion carries no redirect URL".to_string()),
                    )));
                };
                let params = url_parameters(url);

                let Some(code) = params.get(redirect_param::CODE).filter(|c| !c.is_empty()) else {
                    return Ok(AuthorizationResult::Error(AuthorizationErrorResponse::new(
                        client_error::AUTHORIZATION_FAILED,
                        None,
                        Some("redirect carries no authorization code".to_string()),
                    )));
                };

                let state = params.get(redirect_param::STATE).cloned().unwrap_or_default();
                if state != request.state {
                    error!("state returned with the redirect does not match the request");
                    return Err(Error::client(
                        client_error::STATE_MISMATCH,
                        "returned state does not match the authorization request",
                    ));
                }

                Ok(AuthorizationResult::Success(AuthorizationResponse {
                    code: code.clone(),
                    state,
                    cloud_instance_host_name: params
                        .get(redirect_param::CLOUD_INSTANCE_HOST_NAME)
                        .cloned(),
                }))
            }
        }
    }

    fn create_token_request(
        &self,
        request: &AuthorizationRequest,
        response: &AuthorizationResponse,
    ) -> Result<TokenRequest> {
        debug!("creating token request");
        let verifier = request.pkce.verifier();
        let mut token_request = TokenRequest::new(self.token_endpoint_for(response)?, grant_type::AUTHORIZATION_CODE);
        token_request.code = Some(response.code.clone());
        token_request.code_verifier = Some(common::Secret::new(verifier.to_string()));
        token_request.redirect_uri = Some(request.redirect_uri.clone());
        token_request.client_id = Some(request.client_id.clone());
        token_request.scope = Some(request.full_scope());
        token_request.correlation_id = current_correlation_uuid();
        Ok(token_request)
    }

    fn create_refresh_token_request(&self) -> TokenRequest {
        debug!("creating refresh token request");
        TokenRequest::new(self.config.token_endpoint.clone(), grant_type::REFRESH_TOKEN)
    }

    fn token_result_from_http_response(&self, response: HttpResponse) -> Result<TokenResult> {
        if response.status_code >= 400 {
            let mut parsed = serde_json::from_str::<TokenErrorResponse>(&response.body)
                .inspect_err(|e| debug!(status = response.status_code, error = %e, "token error body is not JSON"))
                .unwrap_or_default();
            if parsed.error.is_empty() {
                parsed.error = format!("http_{}", response.status_code);
            }
            parsed.status_code = response.status_code;
            if !response.headers.is_empty() {
                parsed.response_headers_json = serde_json::to_string(&response.headers).ok();
            }
            warn!(
                status = response.status_code,
                error = %parsed.error,
                "token endpoint returned an error"
            );
            parsed.response_body = Some(response.body);
            return Ok(TokenResult::Error(parsed));
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            Error::client(
                client_error::MALFORMED_TOKEN_RESPONSE,
                format!("token response is not valid JSON: {e}"),
            )
        })?;
        Ok(TokenResult::Success(parsed))
    }

    fn create_account(&self, token_endpoint: &Url, response: &TokenResponse) -> Result<Account> {
        debug!("creating account from token response");
        let id_token = response.id_token.as_deref().ok_or_else(|| {
            Error::client(client_error::INVALID_ID_TOKEN, "token response carries no id token")
        })?;
        let client_info = response.client_info.as_deref().ok_or_else(|| {
            Error::client(client_error::INVALID_CLIENT_INFO, "token response carries no client info")
        })?;

        let id_token = IdToken::parse(id_token).inspect_err(|e| error!(error = %e, "failed to construct id token"))?;
        let client_info =
            ClientInfo::parse(client_info).inspect_err(|e| error!(error = %e, "failed to construct client info"))?;

        let mut account = Account::new(&id_token, &client_info);
        account.environment = self.cache_identifier_for(token_endpoint);
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_support::{client_info, id_token};
    use crate::cloud::StaticCloudRegistry;
    use crate::correlation::CorrelationContext;
    use std::sync::Mutex;

    fn strategy(multi_cloud: bool) -> MicrosoftStsStrategy {
        let mut config = StrategyConfig::new(Url::parse("https://login.microsoftonline.com/common").unwrap()).unwrap();
        config.multiple_clouds_supported = multi_cloud;
        config.slice = Some(Slice {
            slice: Some("testslice".into()),
            dc: None,
        });
        MicrosoftStsStrategy::new(config, Arc::new(StaticCloudRegistry::well_known()))
    }

    fn request(strategy: &MicrosoftStsStrategy) -> AuthorizationRequest {
        strategy
            .create_authorization_request_builder(None)
            .client_id("client-123")
            .redirect_uri("msauth://app/cb")
            .scope("user.read")
            .state("state-1")
            .build()
            .unwrap()
    }

    fn account(home_account_id: &str) -> Account {
        Account {
            home_account_id: home_account_id.into(),
            environment: "login.windows.net".into(),
            realm: None,
            local_account_id: None,
            username: None,
            name: None,
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        response: HttpResponse,
        seen: Mutex<Vec<(Url, Vec<(String, String)>)>>,
    }

    impl TokenTransport for FakeTransport {
        fn post<'a>(
            &'a self,
            endpoint: &'a Url,
            form: &'a [(String, String)],
            _headers: &'a [(String, String)],
        ) -> BoxFuture<'a, Result<HttpResponse>> {
            self.seen.lock().unwrap().push((endpoint.clone(), form.to_vec()));
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    #[test]
    fn builder_is_seeded_from_config() {
        let s = strategy(true);
        let request = request(&s);
        assert_eq!(request.authority.as_str(), "https://login.microsoftonline.com/common");
        assert!(request.multiple_cloud_aware);
        assert_eq!(request.slice.as_ref().unwrap().slice.as_deref(), Some("testslice"));
    }

    #[test]
    fn account_hint_needs_both_halves() {
        let s = strategy(false);
        let seeded = s
            .create_authorization_request_builder(Some(&account("uid-1.utid-1")))
            .client_id("c")
            .redirect_uri("x://cb")
            .scope("openid")
            .build()
            .unwrap();
        assert_eq!(seeded.uid.as_deref(), Some("uid-1"));
        assert_eq!(seeded.utid.as_deref(), Some("utid-1"));

        let unseeded = s
            .create_authorization_request_builder(Some(&account("uid-only")))
            .client_id("c")
            .redirect_uri("x://cb")
            .scope("openid")
            .build()
            .unwrap();
        assert!(unseeded.uid.is_none());
        assert!(unseeded.utid.is_none());
    }

    #[test]
    fn cloud_aliases_collapse_to_cache_host() {
        let s = strategy(false);
        let mut request = request(&s);
        assert_eq!(s.issuer_cache_identifier(&request), "login.windows.net");

        request.authority = Url::parse("https://sts.windows.net/common").unwrap();
        assert_eq!(s.issuer_cache_identifier(&request), "login.windows.net");
    }

    #[test]
    fn unknown_authority_host_is_used_literally() {
        let s = strategy(false);
        let mut request = request(&s);
        request.authority = Url::parse("https://login.contoso.com/tenant").unwrap();
        assert_eq!(s.issuer_cache_identifier(&request), "login.contoso.com");
    }

    #[test]
    fn complete_redirect_yields_code() {
        let s = strategy(false);
        let request = request(&s);
        let (code, payload) =
            RedirectPayload::from_redirect_url("msauth://app/cb?code=abc&state=state-1&cloud_instance_host_name=login.microsoftonline.us");
        let result = s.create_authorization_result(code, &payload, &request).unwrap();
        let AuthorizationResult::Success(response) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(response.code, "abc");
        assert_eq!(response.cloud_instance_host_name.as_deref(), Some("login.microsoftonline.us"));
    }

    #[test]
    fn state_mismatch_is_rejected() {
        let s = strategy(false);
        let request = request(&s);
        let (code, payload) = RedirectPayload::from_redirect_url("msauth://app/cb?code=abc&state=forged");
        let err = s.create_authorization_result(code, &payload, &request).unwrap_err();
        assert_eq!(err.code(), client_error::STATE_MISMATCH);
    }

    #[test]
    fn cancel_and_error_completions() {
        let s = strategy(false);
        let request = request(&s);

        let (code, payload) = RedirectPayload::cancelled();
        assert_eq!(
            s.create_authorization_result(code, &payload, &request).unwrap(),
            AuthorizationResult::Cancel
        );

        let (code, payload) =
            RedirectPayload::from_redirect_url("msauth://app/cb?error=access_denied&error_description=nope");
        let result = s.create_authorization_result(code, &payload, &request).unwrap();
        let AuthorizationResult::Error(err) = result else {
            panic!("expected error");
        };
        assert_eq!(err.error, "access_denied");
        assert_eq!(err.message(), "nope");
    }

    #[tokio::test]
    async fn token_request_binds_pkce_and_correlation() {
        let s = strategy(false);
        let context = CorrelationContext::generate();
        let expected = context.correlation_id().to_string();

        let token_request = context
            .scope(async {
                let request = request(&s);
                let response = AuthorizationResponse {
                    code: "abc".into(),
                    state: "state-1".into(),
                    cloud_instance_host_name: None,
                };
                let token_request = s.create_token_request(&request, &response).unwrap();
                assert_eq!(
                    token_request.code_verifier.as_ref().unwrap().expose(),
                    request.pkce.verifier()
                );
                assert_eq!(
                    crate::pkce::compute_challenge(token_request.code_verifier.as_ref().unwrap().expose()),
                    request.pkce.challenge()
                );
                token_request
            })
            .await;

        assert_eq!(token_request.code.as_deref(), Some("abc"));
        assert_eq!(token_request.correlation_id.unwrap().to_string(), expected);
        assert_eq!(
            token_request.token_endpoint.as_str(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn non_uuid_correlation_id_is_omitted() {
        let s = strategy(false);
        let token_request = CorrelationContext::from_id("not-a-uuid")
            .scope(async {
                let request = request(&s);
                let response = AuthorizationResponse {
                    code: "abc".into(),
                    state: "state-1".into(),
                    cloud_instance_host_name: None,
                };
                s.create_token_request(&request, &response).unwrap()
            })
            .await;
        assert!(token_request.correlation_id.is_none());
    }

    #[test]
    fn multi_cloud_rewrites_only_that_request() {
        let s = strategy(true);
        let request = request(&s);
        let response = AuthorizationResponse {
            code: "abc".into(),
            state: "state-1".into(),
            cloud_instance_host_name: Some("login.microsoftonline.us".into()),
        };
        let token_request = s.create_token_request(&request, &response).unwrap();
        assert_eq!(token_request.token_endpoint.host_str(), Some("login.microsoftonline.us"));
        assert_eq!(s.config().token_endpoint.host_str(), Some("login.microsoftonline.com"));

        let single = strategy(false).create_token_request(&request, &response).unwrap();
        assert_eq!(single.token_endpoint.host_str(), Some("login.microsoftonline.com"));
    }

    #[test]
    fn error_status_yields_token_error_with_details() {
        let s = strategy(false);
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-request-id".to_string(), vec!["req-1".to_string()]);
        let result = s
            .token_result_from_http_response(HttpResponse {
                status_code: 400,
                body: r#"{"error":"invalid_grant","suberror":"bad_token"}"#.into(),
                headers,
            })
            .unwrap();
        let TokenResult::Error(err) = result else {
            panic!("expected error");
        };
        assert_eq!(err.status_code, 400);
        assert!(err.response_headers_json.unwrap().contains("req-1"));
        assert!(err.response_body.unwrap().contains("bad_token"));
    }

    #[test]
    fn error_status_without_error_field_keeps_status() {
        let s = strategy(false);
        let result = s
            .token_result_from_http_response(HttpResponse {
                status_code: 503,
                body: r#"{"error_description":"service busy"}"#.into(),
                headers: BTreeMap::new(),
            })
            .unwrap();
        let TokenResult::Error(err) = result else {
            panic!("expected error");
        };
        assert_eq!(err.status_code, 503);
        assert_eq!(err.error, "http_503");
        assert_eq!(err.message(), "service busy");

        let result = s
            .token_result_from_http_response(HttpResponse {
                status_code: 502,
                body: "<html>bad gateway</html>".into(),
                headers: BTreeMap::new(),
            })
            .unwrap();
        let TokenResult::Error(err) = result else {
            panic!("expected error");
        };
        assert_eq!(err.status_code, 502);
        assert_eq!(err.error, "http_502");
        assert_eq!(err.response_body.as_deref(), Some("<html>bad gateway</html>"));
    }

    #[test]
    fn unparseable_body_is_client_error() {
        let s = strategy(false);
        let err = s
            .token_result_from_http_response(HttpResponse {
                status_code: 200,
                body: "<html>".into(),
                headers: BTreeMap::new(),
            })
            .unwrap_err();
        assert_eq!(err.code(), client_error::MALFORMED_TOKEN_RESPONSE);
    }

    #[test]
    fn account_environment_is_cache_identifier() {
        let s = strategy(false);
        let response = TokenResponse {
            access_token: "at".into(),
            token_type: None,
            refresh_token: None,
            id_token: Some(id_token(serde_json::json!({
                "iss": "https://login.microsoftonline.com/tid/v2.0",
                "oid": "oid-1",
                "tid": "tid"
            }))),
            client_info: Some(client_info("uid", "utid")),
            expires_in: Some(3600),
            ext_expires_in: None,
            scope: None,
            foci: None,
        };
        let account = s.create_account(&s.config().token_endpoint, &response).unwrap();
        assert_eq!(account.environment, "login.windows.net");
        assert_eq!(account.home_account_id, "uid.utid");

        let missing = TokenResponse {
            id_token: None,
            ..response
        };
        let err = s.create_account(&s.config().token_endpoint, &missing).unwrap_err();
        assert_eq!(err.code(), client_error::INVALID_ID_TOKEN);
    }

    #[tokio::test]
    async fn request_token_posts_form_to_request_endpoint() {
        let s = strategy(false);
        let transport = FakeTransport {
            response: HttpResponse {
                status_code: 200,
                body: r#"{"access_token":"at","expires_in":60}"#.into(),
                headers: BTreeMap::new(),
            },
            ..Default::default()
        };
        let mut request = s.create_refresh_token_request();
        request.refresh_token = Some(common::Secret::new("rt".to_string()));

        let result = s.request_token(&transport, &request).await.unwrap();
        assert!(result.is_success());

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].0, request.token_endpoint);
        assert!(seen[0].1.contains(&("grant_type".to_string(), "refresh_token".to_string())));
    }
}
