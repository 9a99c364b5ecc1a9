//! Command dispatcher
//!
//! Two lanes:
//! - interactive: one worker task fed by an unbounded channel. Commands run
//!   one at a time in submission order; a second submission waits behind the
//!   first and nothing is pre-empted.
//! - silent: one spawned task per command, unbounded, no ordering.
//!
//! Every submission gets a fresh `CorrelationContext`, bound (together with a
//! `command` span) before the first log line of that command. The protocol
//! logic runs in its own task so a panic surfaces as a `JoinError` and is
//! mapped to `Error::Unknown` instead of taking the lane down. The outcome is
//! posted to the caller's reply context, never delivered on a lane.
//!
//! The registered interactive session is the only state shared with
//! `complete_interactive`, which may be called from any thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use identity_auth::{
    AcquireTokenResult, BROWSER_FLOW, CorrelationContext, Error, RedirectPayload, ResultCode,
    current_correlation_id, error_from_acquire_token_result, error_from_failure, error_from_panic,
};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::agent::{AgentSelector, UserAgent};
use crate::command::{
    Command, CommandOutcome, InteractiveCommand, InteractiveParameters, SilentCommand, SilentParameters,
    TokenOperation,
};
use crate::metrics;
use crate::orchestrator::AuthorizationOrchestrator;
use crate::session::{InteractiveSession, SessionId};

const INTERACTIVE: &str = "interactive";
const SILENT: &str = "silent";

struct Job<P> {
    command: Command<P>,
    context: CorrelationContext,
}

struct Shared {
    operation: Arc<dyn TokenOperation>,
    selector: Arc<dyn AgentSelector>,
    user_agent: Arc<dyn UserAgent>,
    session: Mutex<Option<InteractiveSession>>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<InteractiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, session: InteractiveSession) {
        let mut slot = self.session();
        if let Some(stale) = slot.as_ref() {
            warn!(session = %stale.id(), "replacing a stale interactive session");
        }
        debug!(session = %session.id(), "interactive session registered");
        *slot = Some(session);
    }

    fn unregister(&self, id: SessionId) {
        let mut slot = self.session();
        if slot.as_ref().is_some_and(|s| s.id() == id) {
            if let Some(session) = slot.take() {
                debug!(
                    session = %session.id(),
                    elapsed_secs = session.elapsed_secs(),
                    "interactive session unregistered"
                );
            }
        }
    }
}

/// Schedules commands and routes user-agent completions.
///
/// Must be created inside a tokio runtime. Cloning shares the lanes; the
/// interactive lane stops once every clone is dropped.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    interactive_tx: mpsc::UnboundedSender<Job<InteractiveParameters>>,
}

impl Dispatcher {
    pub fn new(
        operation: Arc<dyn TokenOperation>,
        selector: Arc<dyn AgentSelector>,
        user_agent: Arc<dyn UserAgent>,
    ) -> Self {
        let shared = Arc::new(Shared {
            operation,
            selector,
            user_agent,
            session: Mutex::new(None),
        });
        let (interactive_tx, interactive_rx) = mpsc::unbounded_channel();
        tokio::spawn(interactive_lane(shared.clone(), interactive_rx));
        info!("dispatcher started");
        Self { shared, interactive_tx }
    }

    /// Queue an interactive command behind any in flight.
    pub fn submit_interactive(&self, command: InteractiveCommand) {
        let context = CorrelationContext::generate();
        let span = command_span(INTERACTIVE, &context);
        span.in_scope(|| {
            context
                .clone()
                .sync_scope(|| log_interactive_parameters(&command.parameters))
        });

        if let Err(mpsc::error::SendError(job)) = self.interactive_tx.send(Job { command, context }) {
            let Job { command, context } = job;
            let outcome = span.in_scope(|| {
                context.sync_scope(|| {
                    CommandOutcome::Error(
                        Error::unknown("interactive lane is not running", None)
                            .with_correlation_id(current_correlation_id()),
                    )
                })
            });
            post(command, outcome);
        }
    }

    /// Run a silent command concurrently with everything else.
    pub fn submit_silent(&self, command: SilentCommand) {
        let context = CorrelationContext::generate();
        let span = command_span(SILENT, &context);
        span.in_scope(|| {
            context
                .clone()
                .sync_scope(|| log_silent_parameters(&command.parameters))
        });
        tokio::spawn(run_silent(self.shared.operation.clone(), Job { command, context }, span));
    }

    /// Route a user-agent completion to the registered interactive command.
    ///
    /// `completion_token` is the one handed to the user agent at launch; a
    /// token from an earlier flow never resolves the current one. Returns
    /// whether it resolved a flow. Without a registered command the call is
    /// logged and ignored.
    pub fn complete_interactive(
        &self,
        request_code: i32,
        completion_token: Uuid,
        result_code: ResultCode,
        payload: RedirectPayload,
    ) -> bool {
        let registered = {
            let slot = self.shared.session();
            slot.as_ref().map(|session| {
                (
                    session.id(),
                    session.correlation_id().to_string(),
                    session.orchestrator().clone(),
                )
            })
        };

        let Some((session_id, correlation_id, orchestrator)) = registered else {
            warn!(request_code, "no interactive command registered, completion ignored");
            metrics::record_orphan_completion();
            return false;
        };

        let span = info_span!("completion", session = %session_id, correlation_id = %correlation_id);
        span.in_scope(|| {
            CorrelationContext::from_id(correlation_id)
                .sync_scope(|| orchestrator.complete_authorization(request_code, completion_token, result_code, payload))
        })
    }

    /// Complete the registered flow with the final redirect URL.
    pub fn complete_with_redirect(&self, completion_token: Uuid, redirect_url: &str) -> bool {
        let (result_code, payload) = RedirectPayload::from_redirect_url(redirect_url);
        self.complete_interactive(BROWSER_FLOW, completion_token, result_code, payload)
    }

    /// Complete the registered flow as cancelled by the user.
    pub fn complete_cancelled(&self, completion_token: Uuid) -> bool {
        let (result_code, payload) = RedirectPayload::cancelled();
        self.complete_interactive(BROWSER_FLOW, completion_token, result_code, payload)
    }

    /// Session of the interactive command currently running, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        self.shared.session().as_ref().map(InteractiveSession::id)
    }
}

fn command_span(lane: &'static str, context: &CorrelationContext) -> Span {
    info_span!("command", lane, correlation_id = %context.correlation_id())
}

fn log_interactive_parameters(parameters: &InteractiveParameters) {
    info!("interactive command submitted");
    debug!(
        client_id = %parameters.client_id,
        redirect_uri = %parameters.redirect_uri,
        scopes = ?parameters.scopes,
        login_hint = ?parameters.login_hint,
        prompt = ?parameters.prompt,
        extra_scopes_to_consent = ?parameters.extra_scopes_to_consent,
        has_account = parameters.account.is_some(),
        "interactive parameters"
    );
}

fn log_silent_parameters(parameters: &SilentParameters) {
    info!(force_refresh = parameters.force_refresh, "silent command submitted");
    debug!(
        client_id = %parameters.client_id,
        scopes = ?parameters.scopes,
        account = %parameters.account.home_account_id,
        "silent parameters"
    );
}

async fn interactive_lane(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Job<InteractiveParameters>>) {
    while let Some(job) = rx.recv().await {
        run_interactive(&shared, job).await;
    }
    debug!("interactive lane stopped");
}

async fn run_interactive(shared: &Arc<Shared>, job: Job<InteractiveParameters>) {
    let Job { command, context } = job;
    let Command {
        parameters,
        callback,
        reply,
    } = command;
    let span = command_span(INTERACTIVE, &context);
    let started = Instant::now();

    let orchestrator = Arc::new(AuthorizationOrchestrator::new(
        shared.selector.clone(),
        shared.user_agent.clone(),
    ));
    let session = InteractiveSession::new(context.correlation_id(), orchestrator.clone());
    let session_id = session.id();
    span.in_scope(|| shared.register(session));

    let operation = shared.operation.clone();
    let flow_orchestrator = orchestrator.clone();
    let joined = tokio::spawn(
        context
            .clone()
            .scope(async move { operation.acquire_interactive(&parameters, flow_orchestrator).await })
            .instrument(span.clone()),
    )
    .await;

    let outcome = span.in_scope(|| context.sync_scope(|| outcome_from(joined)));
    span.in_scope(|| {
        shared.unregister(session_id);
        orchestrator.dispose();
    });
    finish(INTERACTIVE, started, &span, outcome, Command::new((), callback, reply));
}

async fn run_silent(operation: Arc<dyn TokenOperation>, job: Job<SilentParameters>, span: Span) {
    let Job { command, context } = job;
    let Command {
        parameters,
        callback,
        reply,
    } = command;
    let started = Instant::now();

    let joined = tokio::spawn(
        context
            .clone()
            .scope(async move { operation.acquire_silent(&parameters).await })
            .instrument(span.clone()),
    )
    .await;

    let outcome = span.in_scope(|| context.sync_scope(|| outcome_from(joined)));
    finish(SILENT, started, &span, outcome, Command::new((), callback, reply));
}

/// Normalize whatever the protocol task produced into one outcome.
fn outcome_from(joined: std::result::Result<anyhow::Result<AcquireTokenResult>, JoinError>) -> CommandOutcome {
    let result = match joined {
        Ok(Ok(result)) => result,
        Ok(Err(failure)) => return CommandOutcome::Error(error_from_failure(failure)),
        Err(join_error) => {
            let error = match join_error.try_into_panic() {
                Ok(payload) => error_from_panic(payload),
                Err(join_error) => error_from_failure(anyhow::Error::new(join_error)),
            };
            return CommandOutcome::Error(error);
        }
    };

    if !result.succeeded() {
        return match error_from_acquire_token_result(&result) {
            Error::UserCancel { .. } => CommandOutcome::Cancel,
            error => CommandOutcome::Error(error),
        };
    }

    match result.into_local_result() {
        Some(local) => CommandOutcome::Success(local),
        None => CommandOutcome::Error(
            Error::unknown("successful result carries no tokens", None).with_correlation_id(current_correlation_id()),
        ),
    }
}

fn finish(lane: &'static str, started: Instant, span: &Span, outcome: CommandOutcome, command: Command<()>) {
    let elapsed = started.elapsed();
    metrics::record_command(lane, outcome.label(), elapsed.as_secs_f64());
    span.in_scope(|| match &outcome {
        CommandOutcome::Error(error) => warn!(
            kind = error.kind(),
            code = error.code(),
            error = %error,
            duration_ms = elapsed.as_millis() as u64,
            "command failed"
        ),
        other => info!(
            outcome = other.label(),
            duration_ms = elapsed.as_millis() as u64,
            "command completed"
        ),
    });
    post(command, outcome);
}

fn post<P>(command: Command<P>, outcome: CommandOutcome) {
    let Command { callback, reply, .. } = command;
    reply.post(Box::new(move || outcome.deliver(callback)));
}
