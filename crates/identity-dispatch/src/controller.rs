//! Token controller
//!
//! The protocol logic behind each command. The interactive flow builds a
//! PKCE-bound request, waits on the orchestrator for the redirect, redeems the
//! code and caches the tokens. The silent flow serves a cached access token
//! when one is still good, otherwise redeems the refresh token.
//!
//! Protocol failures (an authorization error, a token error response) are not
//! errors here: they come back inside an unsuccessful `AcquireTokenResult` so
//! the dispatcher can classify them.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use identity_auth::constants::{OIDC_SCOPES, client_error, ui_required};
use identity_auth::correlation::{current_correlation_id, current_correlation_uuid};
use identity_auth::error::{Error, is_bad_token};
use identity_auth::token::now_millis;
use identity_auth::{
    AcquireTokenResult, Account, ApplicationMetadata, AuthenticationResult, AuthorizationResult, BoxFuture,
    CacheLookup, CachedCredential, OAuth2Strategy, TokenCache, TokenResponse, TokenResult, TokenTransport,
};
use tracing::{debug, info, warn};

use crate::command::{InteractiveParameters, SilentParameters, TokenOperation};
use crate::orchestrator::AuthorizationOrchestrator;

/// Runs the interactive and silent flows against one strategy.
pub struct TokenController {
    strategy: Arc<dyn OAuth2Strategy>,
    transport: Arc<dyn TokenTransport>,
    cache: Arc<dyn TokenCache>,
    application_uid: i32,
    interactive_timeout: Option<Duration>,
}

impl TokenController {
    pub fn new(
        strategy: Arc<dyn OAuth2Strategy>,
        transport: Arc<dyn TokenTransport>,
        cache: Arc<dyn TokenCache>,
        application_uid: i32,
    ) -> Self {
        Self {
            strategy,
            transport,
            cache,
            application_uid,
            interactive_timeout: None,
        }
    }

    /// Give up on the redirect after `timeout`. Without one the wait is unbounded.
    pub fn with_interactive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.interactive_timeout = timeout;
        self
    }

    async fn interactive(
        &self,
        parameters: &InteractiveParameters,
        orchestrator: Arc<AuthorizationOrchestrator>,
    ) -> anyhow::Result<AcquireTokenResult> {
        let request = self
            .strategy
            .create_authorization_request_builder(parameters.account.as_ref())
            .client_id(&parameters.client_id)
            .redirect_uri(&parameters.redirect_uri)
            .scope(request_scope(&parameters.scopes))
            .login_hint(parameters.login_hint.clone())
            .prompt(parameters.prompt.clone())
            .extra_query_params(parameters.extra_query_params.clone())
            .extra_scopes_to_consent(parameters.extra_scopes_to_consent.clone())
            .build()?;
        debug!(
            client_id = %request.client_id,
            scope = %request.full_scope(),
            "authorization request built"
        );

        let pending = orchestrator.request_authorization(request.clone(), self.strategy.clone())?;
        let authorization = match self.interactive_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "no redirect before the interactive timeout");
                    orchestrator.dispose();
                    return Err(Error::client(
                        client_error::AUTHORIZATION_TIMED_OUT,
                        format!("no redirect within {}s", timeout.as_secs()),
                    )
                    .into());
                }
            },
            None => pending.await?,
        };

        let AuthorizationResult::Success(response) = &authorization else {
            return Ok(AcquireTokenResult::failure(Some(authorization), None));
        };

        let token_request = self.strategy.create_token_request(&request, response)?;
        let token_result = self
            .strategy
            .request_token(self.transport.as_ref(), &token_request)
            .await?;
        let TokenResult::Success(token_response) = &token_result else {
            return Ok(AcquireTokenResult::failure(Some(authorization), Some(token_result)));
        };

        let account = self
            .strategy
            .create_account(&token_request.token_endpoint, token_response)?;
        let result = self
            .save_and_build(&parameters.client_id, account, token_response, &parameters.scopes)
            .await?;
        info!("interactive token acquisition succeeded");
        Ok(AcquireTokenResult::success(result, Some(authorization), Some(token_result)))
    }

    async fn silent(&self, parameters: &SilentParameters) -> anyhow::Result<AcquireTokenResult> {
        let cached = match self.cache.lookup(&parameters.client_id, &parameters.account).await? {
            CacheLookup::Found(cached) => cached,
            CacheLookup::NotFound => {
                return Err(Error::ui_required(
                    ui_required::NO_ACCOUNT_FOUND,
                    None,
                    "no cached credentials for the account",
                )
                .into());
            }
            CacheLookup::UiRequired => {
                return Err(Error::ui_required(
                    ui_required::NO_TOKENS_FOUND,
                    None,
                    "no tokens cached for the account",
                )
                .into());
            }
        };

        if !parameters.force_refresh && cached.has_valid_access_token(&parameters.scopes, now_millis()) {
            debug!("serving access token from cache");
            return Ok(AcquireTokenResult::success(from_cache(cached), None, None));
        }

        let Some(refresh_token) = cached.refresh_token.clone().filter(|t| !t.expose().is_empty()) else {
            return Err(Error::ui_required(
                ui_required::NO_TOKENS_FOUND,
                None,
                "no refresh token cached for the account",
            )
            .into());
        };

        let mut token_request = self.strategy.create_refresh_token_request();
        token_request.client_id = Some(parameters.client_id.clone());
        token_request.refresh_token = Some(refresh_token);
        token_request.scope = Some(request_scope(&parameters.scopes));
        token_request.correlation_id = current_correlation_uuid();

        let token_result = self
            .strategy
            .request_token(self.transport.as_ref(), &token_request)
            .await?;
        let token_response = match &token_result {
            TokenResult::Success(response) => response,
            TokenResult::Error(response) => {
                if is_bad_token(&response.error, response.suberror.as_deref()) {
                    warn!("refresh token rejected, clearing cached tokens");
                    self.cache.invalidate(&parameters.client_id, &parameters.account).await?;
                }
                return Ok(AcquireTokenResult::failure(None, Some(token_result)));
            }
        };

        let account = if token_response.id_token.is_some() && token_response.client_info.is_some() {
            self.strategy
                .create_account(&token_request.token_endpoint, token_response)?
        } else {
            cached.account.clone()
        };
        let result = self
            .save_and_build(&parameters.client_id, account, token_response, &parameters.scopes)
            .await?;
        info!("silent token acquisition succeeded");
        Ok(AcquireTokenResult::success(result, None, Some(token_result)))
    }

    async fn save_and_build(
        &self,
        client_id: &str,
        account: Account,
        response: &TokenResponse,
        requested_scopes: &[String],
    ) -> identity_auth::Result<AuthenticationResult> {
        let expires_on = response.expires_on(now_millis());
        let mut scopes = response.scopes();
        if scopes.is_empty() {
            scopes = requested_scopes.to_vec();
        }

        let credential = CachedCredential {
            account: account.clone(),
            access_token: Some(Secret::new(response.access_token.clone())),
            refresh_token: response.refresh_token.clone().map(Secret::new),
            id_token: response.id_token.clone(),
            expires_on,
            scopes: scopes.clone(),
            tenant_id: account.realm.clone(),
        };
        let metadata = ApplicationMetadata::new(
            client_id,
            account.environment.clone(),
            response.foci.clone(),
            self.application_uid,
        );
        self.cache.save(client_id, credential, Some(metadata)).await?;

        Ok(AuthenticationResult {
            access_token: Secret::new(response.access_token.clone()),
            id_token: response.id_token.clone(),
            tenant_id: account.realm.clone(),
            account,
            expires_on,
            scopes,
            correlation_id: current_correlation_id(),
            from_cache: false,
        })
    }
}

impl TokenOperation for TokenController {
    fn acquire_interactive<'a>(
        &'a self,
        parameters: &'a InteractiveParameters,
        orchestrator: Arc<AuthorizationOrchestrator>,
    ) -> BoxFuture<'a, anyhow::Result<AcquireTokenResult>> {
        Box::pin(self.interactive(parameters, orchestrator))
    }

    fn acquire_silent<'a>(&'a self, parameters: &'a SilentParameters) -> BoxFuture<'a, anyhow::Result<AcquireTokenResult>> {
        Box::pin(self.silent(parameters))
    }
}

/// Requested scopes plus the OIDC scopes, deduplicated.
fn request_scope(scopes: &[String]) -> String {
    let mut all: Vec<&str> = Vec::new();
    for scope in scopes.iter().map(String::as_str).chain(OIDC_SCOPES.iter().copied()) {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            all.push(scope);
        }
    }
    all.join(" ")
}

fn from_cache(cached: CachedCredential) -> AuthenticationResult {
    AuthenticationResult {
        access_token: cached.access_token.unwrap_or_else(|| Secret::new(String::new())),
        id_token: cached.id_token,
        account: cached.account,
        expires_on: cached.expires_on,
        scopes: cached.scopes,
        tenant_id: cached.tenant_id,
        correlation_id: current_correlation_id(),
        from_cache: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingUserAgent, selector, strategy};
    use identity_auth::{BROWSER_FLOW, CredentialStore, HttpResponse, RedirectPayload};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use url::Url;

    struct ScriptedTransport {
        responses: Mutex<Vec<HttpResponse>>,
        calls: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<(u16, String)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .rev()
                        .map(|(status_code, body)| HttpResponse {
                            status_code,
                            body,
                            headers: BTreeMap::new(),
                        })
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<(String, String)>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TokenTransport for ScriptedTransport {
        fn post<'a>(
            &'a self,
            _endpoint: &'a Url,
            form: &'a [(String, String)],
            _headers: &'a [(String, String)],
        ) -> BoxFuture<'a, identity_auth::Result<HttpResponse>> {
            self.calls.lock().unwrap().push(form.to_vec());
            let next = self.responses.lock().unwrap().pop();
            Box::pin(async move {
                next.ok_or_else(|| identity_auth::Error::unknown("no scripted response", None))
            })
        }
    }

    fn encode(value: serde_json::Value) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn token_body(refresh: &str) -> String {
        serde_json::json!({
            "access_token": "at_new",
            "refresh_token": refresh,
            "expires_in": 3600,
            "scope": "user.read openid profile offline_access",
            "id_token": format!(
                "{}.{}.",
                encode(serde_json::json!({"alg": "none"})),
                encode(serde_json::json!({
                    "iss": "https://login.microsoftonline.com/tid/v2.0",
                    "oid": "oid-1",
                    "tid": "tid",
                    "preferred_username": "alice@contoso.com"
                }))
            ),
            "client_info": encode(serde_json::json!({"uid": "uid", "utid": "tid"})),
            "foci": "1"
        })
        .to_string()
    }

    async fn store(dir: &tempfile::TempDir) -> Arc<CredentialStore> {
        Arc::new(CredentialStore::load(dir.path().join("cache.json")).await.unwrap())
    }

    fn account() -> Account {
        Account {
            home_account_id: "uid.tid".into(),
            environment: "login.windows.net".into(),
            realm: Some("tid".into()),
            local_account_id: Some("oid-1".into()),
            username: Some("alice@contoso.com".into()),
            name: None,
        }
    }

    fn silent_parameters(force_refresh: bool) -> SilentParameters {
        SilentParameters {
            client_id: "client-123".into(),
            scopes: vec!["user.read".into()],
            account: account(),
            force_refresh,
        }
    }

    #[test]
    fn request_scope_appends_oidc_scopes_once() {
        assert_eq!(
            request_scope(&["user.read".into(), "OpenId".into()]),
            "user.read OpenId profile offline_access"
        );
    }

    #[tokio::test]
    async fn interactive_flow_redeems_code_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir).await;
        let transport = ScriptedTransport::new(vec![(200, token_body("rt_1"))]);
        let agent = Arc::new(RecordingUserAgent::default());
        let orchestrator = Arc::new(AuthorizationOrchestrator::new(selector(), agent.clone()));
        let controller = TokenController::new(strategy(), transport.clone(), cache.clone(), 1000);

        let parameters = InteractiveParameters {
            client_id: "client-123".into(),
            redirect_uri: "msauth://app/cb".into(),
            scopes: vec!["user.read".into()],
            ..Default::default()
        };

        let completer = {
            let orchestrator = orchestrator.clone();
            let agent = agent.clone();
            tokio::spawn(async move {
                let (token, state) = loop {
                    if let Some(launch) = agent.launched().first() {
                        let params: std::collections::HashMap<String, String> =
                            launch.url.query_pairs().into_owned().collect();
                        break (launch.completion_token, params["state"].clone());
                    }
                    tokio::task::yield_now().await;
                };
                let (code, payload) =
                    RedirectPayload::from_redirect_url(&format!("msauth://app/cb?code=the-code&state={state}"));
                orchestrator.complete_authorization(BROWSER_FLOW, token, code, payload);
            })
        };

        let result = controller.interactive(&parameters, orchestrator).await.unwrap();
        completer.await.unwrap();

        assert!(result.succeeded());
        let local = result.local_result().unwrap();
        assert_eq!(local.access_token.expose(), "at_new");
        assert_eq!(local.account.environment, "login.windows.net");

        let form = &transport.calls()[0];
        assert!(form.contains(&("code".to_string(), "the-code".to_string())));
        assert!(form.iter().any(|(k, _)| k == "code_verifier"));

        let cached = cache.get("client-123", &account()).await.unwrap();
        assert_eq!(cached.refresh_token.as_ref().map(|t| t.expose().as_str()), Some("rt_1"));
        assert_eq!(cache.app_metadata().await[0].foci.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn interactive_cancel_is_unsuccessful_result() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TokenController::new(strategy(), ScriptedTransport::new(vec![]), store(&dir).await, 0);
        let orchestrator = Arc::new(AuthorizationOrchestrator::new(selector(), Arc::new(RecordingUserAgent::default())));

        let canceller = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(token) = orchestrator.completion_token() {
                        let (code, payload) = RedirectPayload::cancelled();
                        if orchestrator.complete_authorization(BROWSER_FLOW, token, code, payload) {
                            break;
                        }
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let parameters = InteractiveParameters {
            client_id: "client-123".into(),
            redirect_uri: "msauth://app/cb".into(),
            scopes: vec!["user.read".into()],
            ..Default::default()
        };
        let result = controller.interactive(&parameters, orchestrator).await.unwrap();
        canceller.await.unwrap();

        assert!(!result.succeeded());
        assert_eq!(result.authorization_result(), Some(&AuthorizationResult::Cancel));
    }

    #[tokio::test(start_paused = true)]
    async fn interactive_timeout_disposes() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TokenController::new(strategy(), ScriptedTransport::new(vec![]), store(&dir).await, 0)
            .with_interactive_timeout(Some(Duration::from_secs(30)));
        let orchestrator = Arc::new(AuthorizationOrchestrator::new(selector(), Arc::new(RecordingUserAgent::default())));

        let parameters = InteractiveParameters {
            client_id: "client-123".into(),
            redirect_uri: "msauth://app/cb".into(),
            scopes: vec!["user.read".into()],
            ..Default::default()
        };
        let err = controller
            .interactive(&parameters, orchestrator.clone())
            .await
            .unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert_eq!(err.code(), client_error::AUTHORIZATION_TIMED_OUT);
        assert_eq!(orchestrator.state(), crate::orchestrator::OrchestratorState::Disposed);
    }

    #[tokio::test]
    async fn silent_unknown_account_requires_ui() {
        let dir = tempfile::tempdir().unwrap();
        let controller = TokenController::new(strategy(), ScriptedTransport::new(vec![]), store(&dir).await, 0);
        let err = controller.silent(&silent_parameters(false)).await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert_eq!(err.kind(), "ui_required");
        assert_eq!(err.code(), ui_required::NO_ACCOUNT_FOUND);
    }

    #[tokio::test]
    async fn silent_serves_valid_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir).await;
        cache
            .save(
                "client-123",
                CachedCredential {
                    account: account(),
                    access_token: Some(Secret::new("at_cached".into())),
                    refresh_token: Some(Secret::new("rt_cached".into())),
                    id_token: None,
                    expires_on: now_millis() + 3_600_000,
                    scopes: vec!["user.read".into()],
                    tenant_id: None,
                },
                None,
            )
            .await
            .unwrap();
        let transport = ScriptedTransport::new(vec![(200, token_body("rt_2"))]);
        let controller = TokenController::new(strategy(), transport.clone(), cache, 0);

        let result = controller.silent(&silent_parameters(false)).await.unwrap();
        let local = result.local_result().unwrap();
        assert!(local.from_cache);
        assert_eq!(local.access_token.expose(), "at_cached");
        assert!(transport.calls().is_empty());

        let refreshed = controller.silent(&silent_parameters(true)).await.unwrap();
        assert!(!refreshed.local_result().unwrap().from_cache);
        let form = &transport.calls()[0];
        assert!(form.contains(&("refresh_token".to_string(), "rt_cached".to_string())));
        assert!(form.contains(&("grant_type".to_string(), "refresh_token".to_string())));
    }

    #[tokio::test]
    async fn silent_bad_token_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir).await;
        cache
            .save(
                "client-123",
                CachedCredential {
                    account: account(),
                    access_token: None,
                    refresh_token: Some(Secret::new("rt_revoked".into())),
                    id_token: None,
                    expires_on: 0,
                    scopes: vec![],
                    tenant_id: None,
                },
                None,
            )
            .await
            .unwrap();
        let transport = ScriptedTransport::new(vec![(
            400,
            r#"{"error":"invalid_grant","suberror":"bad_token"}"#.into(),
        )]);
        let controller = TokenController::new(strategy(), transport.clone(), cache.clone(), 0);

        let result = controller.silent(&silent_parameters(false)).await.unwrap();
        assert!(!result.succeeded());
        assert!(matches!(
            cache.lookup("client-123", &account()).await.unwrap(),
            CacheLookup::UiRequired
        ));

        let err = controller.silent(&silent_parameters(false)).await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert_eq!(err.kind(), "ui_required");
        assert_eq!(err.code(), ui_required::NO_TOKENS_FOUND);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn silent_expired_access_token_without_refresh_token_needs_ui() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir).await;
        cache
            .save(
                "client-123",
                CachedCredential {
                    account: account(),
                    access_token: Some(Secret::new("at_stale".into())),
                    refresh_token: None,
                    id_token: None,
                    expires_on: 0,
                    scopes: vec!["user.read".into()],
                    tenant_id: None,
                },
                None,
            )
            .await
            .unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let controller = TokenController::new(strategy(), transport.clone(), cache, 0);

        let err = controller.silent(&silent_parameters(false)).await.unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert_eq!(err.kind(), "ui_required");
        assert_eq!(err.code(), ui_required::NO_TOKENS_FOUND);
        assert!(transport.calls().is_empty());
    }
}
