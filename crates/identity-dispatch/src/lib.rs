//! Command runtime for the identity core
//!
//! Schedules token commands and waits on the user agent:
//! 1. Caller submits an `InteractiveCommand` or `SilentCommand` to the
//!    `Dispatcher`, with a callback and the `ReplyContext` to run it on
//! 2. Interactive commands run one at a time; each gets an
//!    `AuthorizationOrchestrator` registered as the current session
//! 3. The orchestrator launches a `UserAgent` and suspends the command until
//!    `Dispatcher::complete_interactive()` routes the redirect back
//! 4. `TokenController` redeems the code (or the refresh token, for silent
//!    commands) and updates the cache
//! 5. The outcome is normalized and posted to the caller's reply context
//!
//! Silent commands skip steps 2-3 and run concurrently.

pub mod agent;
pub mod command;
pub mod controller;
pub mod dispatcher;
pub mod metrics;
pub mod orchestrator;
pub mod reply;
pub mod session;

#[cfg(test)]
mod test_support;

pub use agent::{AgentDescriptor, AgentHandle, AgentSelector, LaunchPayload, StaticAgentSelector, UserAgent};
pub use command::{
    AuthenticationCallback, Command, CommandOutcome, InteractiveCommand, InteractiveParameters, SilentCommand,
    SilentParameters, TokenOperation, outcome_channel,
};
pub use controller::TokenController;
pub use dispatcher::Dispatcher;
pub use orchestrator::{AuthorizationFuture, AuthorizationOrchestrator, OrchestratorState};
pub use reply::{ReplyContext, ReplyLoop, ReplySender, ReplyTask};
pub use session::{InteractiveSession, SessionId};
