//! Commands and the caller's completion contract
//!
//! A command is parameters plus a callback plus the reply context the callback
//! runs on. The callback methods take `self: Box<Self>`, so the delivery code
//! cannot call more than one of them.

use std::sync::Arc;

use identity_auth::{AcquireTokenResult, Account, AuthenticationResult, BoxFuture, Error};
use tokio::sync::oneshot;
use tracing::warn;

use crate::orchestrator::AuthorizationOrchestrator;
use crate::reply::ReplyContext;

/// Parameters of an interactive token request.
#[derive(Debug, Clone, Default)]
pub struct InteractiveParameters {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub login_hint: Option<String>,
    pub prompt: Option<String>,
    pub extra_query_params: Vec<(String, String)>,
    pub extra_scopes_to_consent: Vec<String>,
    /// Account to pre-select on the sign-in page.
    pub account: Option<Account>,
}

/// Parameters of a silent token request.
#[derive(Debug, Clone)]
pub struct SilentParameters {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub account: Account,
    /// Skip the cached access token and redeem the refresh token.
    pub force_refresh: bool,
}

/// The caller's completion contract. Exactly one method runs per command.
pub trait AuthenticationCallback: Send + 'static {
    fn on_success(self: Box<Self>, result: AuthenticationResult);
    fn on_cancel(self: Box<Self>);
    fn on_error(self: Box<Self>, error: Error);
}

/// What a command produced.
#[derive(Debug)]
pub enum CommandOutcome {
    Success(AuthenticationResult),
    Cancel,
    Error(Error),
}

impl CommandOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Success(_) => "success",
            CommandOutcome::Cancel => "cancel",
            CommandOutcome::Error(_) => "error",
        }
    }

    /// Hand the outcome to the matching callback method.
    pub fn deliver(self, callback: Box<dyn AuthenticationCallback>) {
        match self {
            CommandOutcome::Success(result) => callback.on_success(result),
            CommandOutcome::Cancel => callback.on_cancel(),
            CommandOutcome::Error(error) => callback.on_error(error),
        }
    }
}

struct OutcomeSender(oneshot::Sender<CommandOutcome>);

impl OutcomeSender {
    fn send(self, outcome: CommandOutcome) {
        if self.0.send(outcome).is_err() {
            warn!("outcome receiver dropped before delivery");
        }
    }
}

impl AuthenticationCallback for OutcomeSender {
    fn on_success(self: Box<Self>, result: AuthenticationResult) {
        self.send(CommandOutcome::Success(result));
    }

    fn on_cancel(self: Box<Self>) {
        self.send(CommandOutcome::Cancel);
    }

    fn on_error(self: Box<Self>, error: Error) {
        self.send(CommandOutcome::Error(error));
    }
}

/// A callback that forwards the outcome into a oneshot channel.
pub fn outcome_channel() -> (Box<dyn AuthenticationCallback>, oneshot::Receiver<CommandOutcome>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(OutcomeSender(tx)), rx)
}

/// A unit of work for one of the dispatcher's lanes.
pub struct Command<P> {
    pub parameters: P,
    pub callback: Box<dyn AuthenticationCallback>,
    pub reply: Arc<dyn ReplyContext>,
}

impl<P> Command<P> {
    pub fn new(parameters: P, callback: Box<dyn AuthenticationCallback>, reply: Arc<dyn ReplyContext>) -> Self {
        Self {
            parameters,
            callback,
            reply,
        }
    }
}

pub type InteractiveCommand = Command<InteractiveParameters>;
pub type SilentCommand = Command<SilentParameters>;

/// The protocol logic a dispatched command runs.
///
/// Failures are returned as `anyhow::Error` and normalized by the dispatcher;
/// an unsuccessful `AcquireTokenResult` is classified the same way.
pub trait TokenOperation: Send + Sync {
    fn acquire_interactive<'a>(
        &'a self,
        parameters: &'a InteractiveParameters,
        orchestrator: Arc<AuthorizationOrchestrator>,
    ) -> BoxFuture<'a, anyhow::Result<AcquireTokenResult>>;

    fn acquire_silent<'a>(&'a self, parameters: &'a SilentParameters) -> BoxFuture<'a, anyhow::Result<AcquireTokenResult>>;
}
