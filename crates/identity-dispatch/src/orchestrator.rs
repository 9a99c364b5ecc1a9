//! Authorization flow orchestration
//!
//! One orchestrator owns one authorization-code flow:
//!
//! `Idle → Dispatched → AwaitingRedirect → {Completed, Disposed}`
//!
//! `request_authorization` launches the user agent and hands back an
//! `AuthorizationFuture`. The redirect arrives later, from whatever thread the
//! user agent reports on, through `complete_authorization`, which classifies
//! it with the strategy and resolves the future. The future resolves at most
//! once: the sender is taken out of the shared state before it is used, so a
//! second completion finds nothing to resolve.
//!
//! The state lives behind a `std::sync::Mutex` because completion and
//! disposal are called from synchronous user-agent callbacks. No lock is held
//! across a user-agent call.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use identity_auth::constants::client_error;
use identity_auth::correlation::current_correlation_id;
use identity_auth::{
    AuthorizationRequest, AuthorizationResult, BROWSER_FLOW, Error, OAuth2Strategy, RedirectPayload, Result,
    ResultCode,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentHandle, AgentSelector, LaunchPayload, UserAgent};

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Dispatched,
    AwaitingRedirect,
    Completed,
    Disposed,
}

impl OrchestratorState {
    pub fn label(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Dispatched => "dispatched",
            OrchestratorState::AwaitingRedirect => "awaiting_redirect",
            OrchestratorState::Completed => "completed",
            OrchestratorState::Disposed => "disposed",
        }
    }
}

struct Pending {
    request: AuthorizationRequest,
    strategy: Arc<dyn OAuth2Strategy>,
    sender: oneshot::Sender<Result<AuthorizationResult>>,
}

struct Inner {
    state: OrchestratorState,
    pending: Option<Pending>,
    handle: Option<AgentHandle>,
    completion_token: Option<Uuid>,
}

/// Resolves once with the outcome of the flow.
///
/// If the orchestrator is disposed before a redirect arrives, resolves to
/// client error `authorization_abandoned`.
#[derive(Debug)]
pub struct AuthorizationFuture {
    receiver: oneshot::Receiver<Result<AuthorizationResult>>,
}

impl Future for AuthorizationFuture {
    type Output = Result<AuthorizationResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Error::client(
                    client_error::AUTHORIZATION_ABANDONED,
                    "authorization flow was disposed before a redirect arrived",
                ))
            })
        })
    }
}

/// Owns one in-flight authorization-code flow.
pub struct AuthorizationOrchestrator {
    selector: Arc<dyn AgentSelector>,
    user_agent: Arc<dyn UserAgent>,
    inner: Mutex<Inner>,
}

impl AuthorizationOrchestrator {
    pub fn new(selector: Arc<dyn AgentSelector>, user_agent: Arc<dyn UserAgent>) -> Self {
        Self {
            selector,
            user_agent,
            inner: Mutex::new(Inner {
                state: OrchestratorState::Idle,
                pending: None,
                handle: None,
                completion_token: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> OrchestratorState {
        self.lock().state
    }

    /// Token of the current launch, if one happened.
    pub fn completion_token(&self) -> Option<Uuid> {
        self.lock().completion_token
    }

    fn ensure_idle(state: OrchestratorState) -> Result<()> {
        match state {
            OrchestratorState::Idle => Ok(()),
            OrchestratorState::Disposed => Err(Error::client(
                client_error::ORCHESTRATOR_DISPOSED,
                "authorization requested on a disposed orchestrator",
            )),
            other => Err(Error::client(
                client_error::AUTHORIZATION_FAILED,
                format!("authorization already started (state {})", other.label()),
            )),
        }
    }

    /// Launch the user agent for `request`.
    pub fn request_authorization(
        &self,
        request: AuthorizationRequest,
        strategy: Arc<dyn OAuth2Strategy>,
    ) -> Result<AuthorizationFuture> {
        Self::ensure_idle(self.lock().state)?;
        let agent = self.selector.select()?;

        let (sender, receiver) = oneshot::channel();
        let completion_token = Uuid::new_v4();
        let payload = {
            let mut inner = self.lock();
            // The selector ran unlocked; the flow may have moved on meanwhile.
            Self::ensure_idle(inner.state)?;

            info!(agent = %agent.name, "launching user agent");
            let payload = LaunchPayload {
                request_code: BROWSER_FLOW,
                url: request.to_url(),
                redirect_uri: request.redirect_uri.clone(),
                headers: request.request_headers.clone(),
                completion_token,
                agent,
                correlation_id: current_correlation_id(),
            };
            debug!(url = %payload.url, "authorization url");

            inner.state = OrchestratorState::Dispatched;
            inner.completion_token = Some(completion_token);
            inner.pending = Some(Pending {
                request,
                strategy,
                sender,
            });
            payload
        };

        let launched = self.user_agent.launch(payload);

        let mut inner = self.lock();
        match launched {
            Ok(handle) => {
                if inner.state == OrchestratorState::Dispatched {
                    inner.state = OrchestratorState::AwaitingRedirect;
                    inner.handle = Some(handle);
                } else {
                    // Completed or disposed while launching.
                    drop(inner);
                    self.user_agent.release(handle);
                }
                Ok(AuthorizationFuture { receiver })
            }
            Err(e) => {
                warn!(error = %e, "user agent failed to launch");
                inner.pending = None;
                inner.state = OrchestratorState::Disposed;
                Err(e)
            }
        }
    }

    /// Resolve the flow with a user-agent completion.
    ///
    /// Returns whether this call resolved the flow. Mismatched request codes,
    /// completion tokens from another launch, and completions after the first
    /// are logged and ignored.
    pub fn complete_authorization(
        &self,
        request_code: i32,
        completion_token: Uuid,
        result_code: ResultCode,
        payload: RedirectPayload,
    ) -> bool {
        if request_code != BROWSER_FLOW {
            warn!(request_code, "completion for an unknown request code ignored");
            return false;
        }

        let (pending, handle) = {
            let mut inner = self.lock();
            if inner.completion_token != Some(completion_token) {
                warn!(%completion_token, "completion token does not belong to this flow, ignored");
                return false;
            }
            let Some(pending) = inner.pending.take() else {
                info!(state = inner.state.label(), "authorization already resolved, completion ignored");
                return false;
            };
            inner.state = OrchestratorState::Completed;
            (pending, inner.handle.take())
        };

        if let Some(handle) = handle {
            self.user_agent.release(handle);
        }

        let outcome = pending
            .strategy
            .create_authorization_result(result_code, &payload, &pending.request);
        match &outcome {
            Ok(result) => info!(result = result.label(), "authorization completed"),
            Err(e) => warn!(error = %e, "authorization completion rejected"),
        }
        if pending.sender.send(outcome).is_err() {
            debug!("authorization awaiter already gone");
        }
        true
    }

    /// Release user-agent resources. Safe to call repeatedly; an awaiting
    /// flow resolves to `authorization_abandoned`.
    pub fn dispose(&self) {
        let (pending, handle) = {
            let mut inner = self.lock();
            if inner.state == OrchestratorState::Disposed {
                debug!("orchestrator already disposed");
                return;
            }
            inner.state = OrchestratorState::Disposed;
            (inner.pending.take(), inner.handle.take())
        };

        if let Some(handle) = handle {
            self.user_agent.release(handle);
        }
        if pending.is_some() {
            info!("authorization abandoned by disposal");
        }
    }
}

impl Drop for AuthorizationOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}
