//! Usage: Process entry (mode dispatch, credential acquisition, task batch, exit status).

use crate::app::cli::Cli;
use crate::domain::digest::RssFeed;
use crate::domain::graph::GraphClient;
use crate::domain::tasks::{RunMode, TaskReport, TaskRunner};
use crate::gateway::oauth::app_grant::acquire_service_token;
use crate::gateway::oauth::callback_server::bind_bootstrap_listener;
use crate::gateway::oauth::delegated_grant::{
    resolve_delegated_token, run_interactive_bootstrap, BootstrapPhase, DelegatedOutcome,
};
use crate::gateway::oauth::token_exchange::HttpTokenEndpoint;
use crate::infra::config::AppConfig;
use crate::infra::mirror_sync::RcloneCli;
use crate::infra::token_store::TokenStore;
use crate::shared::error::{AppError, AppResult};
use std::process::ExitCode;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_http_client() -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("tenant-keepalive/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: failed to build http client: {e}").into())
}

async fn run_tasks(
    config: &AppConfig,
    client: &reqwest::Client,
    access_token: &str,
    mode: RunMode,
    skip_mirror: bool,
) -> TaskReport {
    let graph = GraphClient::new(client.clone(), config.graph_base_url.as_str(), access_token);
    let mirror = RcloneCli::new(config.mirror.binary.as_str());
    let news = RssFeed::new(client.clone(), config.news_feed_url.as_str());
    TaskRunner::new(config, &graph, &mirror, &news)
        .run(mode, skip_mirror)
        .await
}

async fn run_service(
    config: &AppConfig,
    client: &reqwest::Client,
    endpoint: &HttpTokenEndpoint,
    skip_mirror: bool,
) -> AppResult<()> {
    let access_token = acquire_service_token(endpoint).await?;
    run_tasks(config, client, &access_token, RunMode::ServiceIdentity, skip_mirror).await;
    Ok(())
}

async fn run_delegated(
    config: &AppConfig,
    client: &reqwest::Client,
    endpoint: &HttpTokenEndpoint,
    cli: &Cli,
) -> AppResult<()> {
    let store = TokenStore::new(config.token_file.clone());
    match resolve_delegated_token(config, &store, endpoint).await? {
        DelegatedOutcome::Token(access_token) => {
            run_tasks(config, client, &access_token, RunMode::DelegatedIdentity, cli.skip_rclone)
                .await;
        }
        DelegatedOutcome::RefreshFailed => {
            tracing::error!("stored refresh token was rejected; no tasks run this time");
        }
        DelegatedOutcome::InteractiveRequired => {
            let bound = bind_bootstrap_listener(&config.redirect_uri).await?;
            let skip_mirror = cli.skip_rclone;
            let phase = run_interactive_bootstrap(
                config,
                &store,
                endpoint,
                bound,
                !cli.no_browser,
                |access_token: String| async move {
                    let report = run_tasks(
                        config,
                        client,
                        &access_token,
                        RunMode::DelegatedIdentity,
                        skip_mirror,
                    )
                    .await;
                    format!("Sign-in complete. {}. You can close this window.", report.summary())
                },
            )
            .await?;
            if phase != BootstrapPhase::Completed {
                tracing::warn!(phase = ?phase, "interactive sign-in did not complete");
            }
        }
    }
    Ok(())
}

/// One invocation. Only fatal errors (and startup failures) come back as `Err`.
pub async fn run(cli: &Cli, config: &AppConfig) -> AppResult<()> {
    let Some(mode) = cli.run_mode() else {
        tracing::error!("choose --app or --user");
        return Ok(());
    };

    let client = build_http_client()?;
    let endpoint = HttpTokenEndpoint::new(
        client.clone(),
        config.token_endpoint(),
        config.client_id.as_str(),
        config.client_secret.as_str(),
    );
    tracing::info!(mode = ?mode, skip_rclone = cli.skip_rclone, "keep-alive run starting");

    match mode {
        RunMode::ServiceIdentity => run_service(config, &client, &endpoint, cli.skip_rclone).await,
        RunMode::DelegatedIdentity => run_delegated(config, &client, &endpoint, cli).await,
    }
}

pub(crate) fn exit_code_for(result: &AppResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.is_fatal() {
                tracing::error!(code = err.code(), "fatal: {}", err.message());
            } else {
                tracing::error!(code = err.code(), "run aborted: {}", err.message());
            }
            ExitCode::FAILURE
        }
    }
}

/// What the process should do once flags are parsed.
pub(crate) enum Startup {
    NoMode,
    Ready(Box<AppConfig>),
    ConfigInvalid(AppError),
}

/// Mode flags are checked before configuration, so a bare invocation never
/// depends on the environment.
pub(crate) fn startup(cli: &Cli, get: impl FnMut(&str) -> Option<String>) -> Startup {
    if cli.run_mode().is_none() {
        return Startup::NoMode;
    }
    match AppConfig::from_env_get(get) {
        Ok(config) => Startup::Ready(Box::new(config)),
        Err(err) => Startup::ConfigInvalid(err),
    }
}

/// Full process lifecycle: `.env`, flags, configuration, logging, runtime.
pub fn main_entry() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    let cli = <Cli as clap::Parser>::parse();

    let config = match startup(&cli, |key| std::env::var(key).ok()) {
        Startup::Ready(config) => config,
        Startup::NoMode => {
            let _guard = crate::app::logging::init(None);
            tracing::error!("choose --app or --user");
            return ExitCode::SUCCESS;
        }
        Startup::ConfigInvalid(err) => {
            let _guard = crate::app::logging::init(None);
            tracing::error!(code = err.code(), "configuration invalid: {}", err.message());
            return ExitCode::FAILURE;
        }
    };
    let _guard = crate::app::logging::init(config.log_file.as_deref());
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), ".env loaded");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(&cli, &config));
    exit_code_for(&result)
}
