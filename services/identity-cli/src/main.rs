//! Identity CLI
//!
//! Acquires tokens from the command line:
//! - `identity-cli interactive [--login-hint HINT] [--prompt PROMPT]` runs the
//!   authorization code flow with the console as user agent
//! - `identity-cli silent [--account ID] [--force-refresh]` serves a cached
//!   token or redeems the cached refresh token
//!
//! Logs are JSON on stderr; the result summary is JSON on stdout. Tokens are
//! never printed.

mod config;
mod console;

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use identity_auth::{
    Account, AuthenticationResult, BROWSER_FLOW, CredentialStore, MicrosoftStsStrategy, OAuth2Strategy,
    RedirectPayload, ReqwestTransport,
};
use identity_dispatch::{
    AgentDescriptor, Command, CommandOutcome, Dispatcher, InteractiveParameters, ReplyContext, ReplyLoop,
    SilentParameters, StaticAgentSelector, TokenController, outcome_channel,
};

use crate::config::Config;
use crate::console::{AGENT_NAME, ConsoleUserAgent, prompt_for_redirect};

/// Exit code when the user cancels sign-in.
const EXIT_CANCELLED: i32 = 2;

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Interactive {
        login_hint: Option<String>,
        prompt: Option<String>,
    },
    Silent {
        account: Option<String>,
        force_refresh: bool,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config: Option<String>,
    mode: Mode,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut mode_name = None;
    let mut login_hint = None;
    let mut prompt = None;
    let mut account = None;
    let mut force_refresh = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--config" => config = Some(value("--config")?),
            "--login-hint" => login_hint = Some(value("--login-hint")?),
            "--prompt" => prompt = Some(value("--prompt")?),
            "--account" => account = Some(value("--account")?),
            "--force-refresh" => force_refresh = true,
            "interactive" | "silent" if mode_name.is_none() => mode_name = Some(arg.clone()),
            other => bail!("unexpected argument: {other}"),
        }
    }

    let mode = match mode_name.as_deref() {
        Some("interactive") => {
            if account.is_some() || force_refresh {
                bail!("--account and --force-refresh only apply to silent");
            }
            Mode::Interactive { login_hint, prompt }
        }
        Some("silent") => {
            if login_hint.is_some() || prompt.is_some() {
                bail!("--login-hint and --prompt only apply to interactive");
            }
            Mode::Silent { account, force_refresh }
        }
        _ => bail!("usage: identity-cli [--config PATH] <interactive|silent> [options]"),
    };

    Ok(Cli { config, mode })
}

/// Pick the cached account to refresh: by home account id or username when
/// given, otherwise the first one.
async fn select_account(store: &CredentialStore, client_id: &str, wanted: Option<&str>) -> Result<Account> {
    let accounts = store.accounts(client_id).await;
    let found = match wanted {
        Some(id) => accounts.into_iter().find(|a| {
            a.home_account_id.eq_ignore_ascii_case(id)
                || a.username.as_deref().is_some_and(|u| u.eq_ignore_ascii_case(id))
        }),
        None => accounts.into_iter().next(),
    };
    found.context("no matching cached account, sign in with `identity-cli interactive` first")
}

fn summary(result: &AuthenticationResult) -> serde_json::Value {
    serde_json::json!({
        "home_account_id": result.account.home_account_id,
        "username": result.account.username,
        "environment": result.account.environment,
        "tenant_id": result.tenant_id,
        "scopes": result.scopes,
        "expires_on": result.expires_on,
        "from_cache": result.from_cache,
        "correlation_id": result.correlation_id,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("starting identity-cli");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        authority = %config.client.authority,
        cache = %config.cache.path.display(),
        multiple_clouds_supported = config.strategy.multiple_clouds_supported,
        clouds = config.clouds.len(),
        "configuration loaded"
    );

    let store = Arc::new(
        CredentialStore::load(config.cache.path.clone())
            .await
            .context("failed to open credential cache")?,
    );
    let strategy: Arc<dyn OAuth2Strategy> = Arc::new(MicrosoftStsStrategy::new(
        config.strategy_config()?,
        Arc::new(config.cloud_registry()),
    ));
    let transport = Arc::new(ReqwestTransport::new(reqwest::Client::new()));
    let controller = TokenController::new(strategy, transport, store.clone(), config.client.application_uid)
        .with_interactive_timeout(config.interactive.timeout());

    let (console, mut launches) = ConsoleUserAgent::new();
    let dispatcher = Dispatcher::new(
        Arc::new(controller),
        Arc::new(StaticAgentSelector::new(vec![AgentDescriptor::new(AGENT_NAME)])),
        Arc::new(console),
    );

    let (reply, reply_loop) = ReplyLoop::new();
    let reply: Arc<dyn ReplyContext> = Arc::new(reply);
    let (callback, mut outcome) = outcome_channel();

    match cli.mode {
        Mode::Interactive { login_hint, prompt } => {
            let parameters = InteractiveParameters {
                client_id: config.client.client_id.clone(),
                redirect_uri: config.client.redirect_uri.clone(),
                scopes: config.client.scopes.clone(),
                login_hint,
                prompt,
                ..Default::default()
            };
            dispatcher.submit_interactive(Command::new(parameters, callback, reply));
        }
        Mode::Silent { account, force_refresh } => {
            let account = select_account(&store, &config.client.client_id, account.as_deref()).await?;
            let parameters = SilentParameters {
                client_id: config.client.client_id.clone(),
                scopes: config.client.scopes.clone(),
                account,
                force_refresh,
            };
            dispatcher.submit_silent(Command::new(parameters, callback, reply));
        }
    }
    tokio::spawn(reply_loop.run());

    let outcome = loop {
        tokio::select! {
            outcome = &mut outcome => break outcome.context("command ended without an outcome")?,
            Some(launch) = launches.recv() => {
                let dispatcher = dispatcher.clone();
                let completion_token = launch.completion_token;
                tokio::spawn(async move {
                    if let Err(e) = prompt_for_redirect(dispatcher.clone(), launch).await {
                        error!(error = %e, "reading redirect failed");
                        let (code, payload) = RedirectPayload::exception(e.to_string());
                        dispatcher.complete_interactive(BROWSER_FLOW, completion_token, code, payload);
                    }
                });
            }
        }
    };

    match outcome {
        CommandOutcome::Success(result) => {
            info!(from_cache = result.from_cache, "token acquired");
            println!("{}", serde_json::to_string_pretty(&summary(&result))?);
            Ok(())
        }
        CommandOutcome::Cancel => {
            warn!("sign-in cancelled");
            std::process::exit(EXIT_CANCELLED);
        }
        CommandOutcome::Error(err) => {
            error!(
                kind = err.kind(),
                code = err.code(),
                correlation_id = err.correlation_id().unwrap_or_default(),
                "token acquisition failed"
            );
            Err(err.into())
        }
    }
}
