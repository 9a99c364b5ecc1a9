//! Console user agent
//!
//! `launch` only forwards the payload to the main loop, which prints the
//! authorization URL and reads the final redirect URL from stdin. An empty
//! line cancels the flow.

use identity_auth::constants::client_error;
use identity_auth::{Error, Result};
use identity_dispatch::{AgentHandle, Dispatcher, LaunchPayload, UserAgent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const AGENT_NAME: &str = "console";

pub struct ConsoleUserAgent {
    launches: mpsc::UnboundedSender<LaunchPayload>,
}

impl ConsoleUserAgent {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LaunchPayload>) {
        let (launches, rx) = mpsc::unbounded_channel();
        (Self { launches }, rx)
    }
}

impl UserAgent for ConsoleUserAgent {
    fn launch(&self, payload: LaunchPayload) -> Result<AgentHandle> {
        let handle = AgentHandle {
            completion_token: payload.completion_token,
            agent: payload.agent.name.clone(),
        };
        self.launches.send(payload).map_err(|_| {
            Error::client(
                client_error::NO_AGENT_AVAILABLE,
                "console is no longer reading redirects",
            )
        })?;
        Ok(handle)
    }

    fn release(&self, handle: AgentHandle) {
        debug!(agent = %handle.agent, completion_token = %handle.completion_token, "console agent released");
    }
}

/// What the user typed after signing in.
#[derive(Debug, PartialEq, Eq)]
pub enum RedirectInput {
    Redirect(String),
    Cancel,
}

impl RedirectInput {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => RedirectInput::Cancel,
            url => RedirectInput::Redirect(url.to_string()),
        }
    }
}

/// Prompt for one launch and route the answer back to the dispatcher.
pub async fn prompt_for_redirect(dispatcher: Dispatcher, launch: LaunchPayload) -> anyhow::Result<()> {
    info!(agent = %launch.agent.name, "waiting for redirect on stdin");
    eprintln!("Open this URL in a browser and sign in:\n\n  {}\n", launch.url);
    eprintln!("Paste the URL you were redirected to (empty line cancels):");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    let routed = match RedirectInput::parse(&line) {
        RedirectInput::Redirect(url) => dispatcher.complete_with_redirect(launch.completion_token, &url),
        RedirectInput::Cancel => dispatcher.complete_cancelled(launch.completion_token),
    };
    if !routed {
        warn!("redirect arrived after the flow ended");
    }
    Ok(())
}
