//! User agent collaborators
//!
//! The runtime never renders anything itself. An `AgentSelector` picks the
//! user agent (system browser, embedded web view, console) and a `UserAgent`
//! launches it with a `LaunchPayload`. The redirect comes back later through
//! `Dispatcher::complete_interactive`, usually on a different thread.

use std::collections::BTreeMap;

use identity_auth::constants::client_error;
use identity_auth::{Error, Result};
use url::Url;
use uuid::Uuid;

/// A user agent able to run an authorization flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    pub name: String,
    pub version: Option<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// Picks the user agent for the next interactive flow.
pub trait AgentSelector: Send + Sync {
    /// Fails with client error `no_agent_available` when nothing can run the flow.
    fn select(&self) -> Result<AgentDescriptor>;
}

/// Selector over a fixed preference list; the first entry wins.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentSelector {
    agents: Vec<AgentDescriptor>,
}

impl StaticAgentSelector {
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        Self { agents }
    }
}

impl AgentSelector for StaticAgentSelector {
    fn select(&self) -> Result<AgentDescriptor> {
        self.agents.first().cloned().ok_or_else(|| {
            Error::client(
                client_error::NO_AGENT_AVAILABLE,
                "no user agent is available to run the authorization flow",
            )
        })
    }
}

/// Everything a user agent needs to run one flow.
#[derive(Debug, Clone)]
pub struct LaunchPayload {
    /// Echoed back on completion.
    pub request_code: i32,
    pub url: Url,
    pub redirect_uri: String,
    pub headers: BTreeMap<String, String>,
    /// Single-use token identifying this launch.
    pub completion_token: Uuid,
    pub agent: AgentDescriptor,
    pub correlation_id: Option<String>,
}

/// Resources a launched user agent holds until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub completion_token: Uuid,
    pub agent: String,
}

/// An external user agent.
pub trait UserAgent: Send + Sync {
    fn launch(&self, payload: LaunchPayload) -> Result<AgentHandle>;

    /// Release whatever `launch` bound. Called at most once per handle.
    fn release(&self, handle: AgentHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_agent_wins() {
        let selector = StaticAgentSelector::new(vec![AgentDescriptor::new("browser"), AgentDescriptor::new("webview")]);
        assert_eq!(selector.select().unwrap().name, "browser");
    }

    #[test]
    fn empty_selector_has_no_agent() {
        let err = StaticAgentSelector::default().select().unwrap_err();
        assert_eq!(err.code(), client_error::NO_AGENT_AVAILABLE);
        assert_eq!(err.kind(), "client");
    }
}
