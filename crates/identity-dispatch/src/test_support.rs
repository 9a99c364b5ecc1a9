//! Fakes shared by the runtime's unit tests.

use std::sync::{Arc, Mutex};

use identity_auth::constants::client_error;
use identity_auth::{
    AuthorizationRequest, Error, MicrosoftStsStrategy, OAuth2Strategy, Result, StaticCloudRegistry, StrategyConfig,
};
use url::Url;

use crate::agent::{AgentDescriptor, AgentHandle, AgentSelector, LaunchPayload, StaticAgentSelector, UserAgent};

pub fn strategy() -> Arc<dyn OAuth2Strategy> {
    let config = StrategyConfig::new(Url::parse("https://login.microsoftonline.com/common").unwrap()).unwrap();
    Arc::new(MicrosoftStsStrategy::new(config, Arc::new(StaticCloudRegistry::well_known())))
}

pub fn selector() -> Arc<dyn AgentSelector> {
    Arc::new(StaticAgentSelector::new(vec![AgentDescriptor::new("test-browser")]))
}

pub fn authorization_request(strategy: &Arc<dyn OAuth2Strategy>) -> AuthorizationRequest {
    strategy
        .create_authorization_request_builder(None)
        .client_id("client-123")
        .redirect_uri("msauth://app/cb")
        .scope("user.read")
        .build()
        .unwrap()
}

/// Records launches and releases.
#[derive(Default)]
pub struct RecordingUserAgent {
    fail: bool,
    launched: Mutex<Vec<LaunchPayload>>,
    released: Mutex<Vec<AgentHandle>>,
}

impl RecordingUserAgent {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn launched(&self) -> Vec<LaunchPayload> {
        self.launched.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<AgentHandle> {
        self.released.lock().unwrap().clone()
    }
}

impl UserAgent for RecordingUserAgent {
    fn launch(&self, payload: LaunchPayload) -> Result<AgentHandle> {
        if self.fail {
            return Err(Error::client(client_error::AUTHENTICATION_EXCEPTION, "browser crashed"));
        }
        let handle = AgentHandle {
            completion_token: payload.completion_token,
            agent: payload.agent.name.clone(),
        };
        self.launched.lock().unwrap().push(payload);
        Ok(handle)
    }

    fn release(&self, handle: AgentHandle) {
        self.released.lock().unwrap().push(handle);
    }
}
