//! Usage: Public test helpers for integration tests.

use crate::domain::digest::{NewsSource, RssFeed, HEADLINE_LIMIT};
use crate::domain::graph::{GraphApi, GraphClient, Mailbox, OutgoingMail};
use crate::domain::tasks::{RunMode, StepStatus, TaskRunner};
use crate::gateway::oauth::app_grant::acquire_service_token;
use crate::gateway::oauth::callback_server::{bind_bootstrap_listener, BoundBootstrapListener};
use crate::gateway::oauth::delegated_grant::{
    resolve_delegated_token, run_interactive_bootstrap, BootstrapPhase, DelegatedOutcome,
};
use crate::gateway::oauth::token_exchange::{HttpTokenEndpoint, TokenSet};
use crate::infra::config::AppConfig;
use crate::infra::mirror_sync::RcloneCli;
use crate::infra::token_store::TokenStore;
use crate::shared::error::{AppError, AppResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

fn http_client() -> AppResult<reqwest::Client> {
    crate::app::entry::build_http_client()
}

fn token_endpoint(config: &AppConfig) -> AppResult<HttpTokenEndpoint> {
    Ok(HttpTokenEndpoint::new(
        http_client()?,
        config.token_endpoint(),
        config.client_id.as_str(),
        config.client_secret.as_str(),
    ))
}

fn mailbox(owner: Option<&str>) -> Mailbox {
    match owner {
        Some(id) => Mailbox::User(id.to_string()),
        None => Mailbox::Me,
    }
}

pub fn config_from_pairs(pairs: &[(&str, &str)]) -> AppResult<AppConfig> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_env_get(|key| map.get(key).cloned())
}

pub fn token_store_save_json(path: &Path, value: Value) -> AppResult<()> {
    TokenStore::new(path.to_path_buf()).save(&TokenSet::from_value(value)?)
}

pub fn token_store_load_json(path: &Path) -> AppResult<Option<Value>> {
    let loaded = TokenStore::new(path.to_path_buf()).load()?;
    loaded
        .map(|set| {
            serde_json::to_value(set).map_err(|e| {
                AppError::new("SYSTEM_ERROR", format!("failed to serialize json: {e}"))
            })
        })
        .transpose()
}

pub async fn service_token(config: &AppConfig) -> AppResult<String> {
    acquire_service_token(&token_endpoint(config)?).await
}

/// `{"outcome": "token" | "refresh_failed" | "interactive_required", "access_token"?}`
pub async fn resolve_delegated_json(config: &AppConfig) -> AppResult<Value> {
    let store = TokenStore::new(config.token_file.clone());
    let outcome = resolve_delegated_token(config, &store, &token_endpoint(config)?).await?;
    Ok(match outcome {
        DelegatedOutcome::Token(access_token) => {
            json!({"outcome": "token", "access_token": access_token})
        }
        DelegatedOutcome::RefreshFailed => json!({"outcome": "refresh_failed"}),
        DelegatedOutcome::InteractiveRequired => json!({"outcome": "interactive_required"}),
    })
}

pub async fn graph_list_principals(base_url: &str, token: &str) -> AppResult<Vec<String>> {
    let graph = GraphClient::new(http_client()?, base_url, token);
    Ok(graph
        .list_users()
        .await?
        .into_iter()
        .map(|user| user.principal_name)
        .collect())
}

/// `sender` of `None` sends as the signed-in user.
pub async fn graph_send_mail_status(
    base_url: &str,
    token: &str,
    sender: Option<&str>,
    recipient: &str,
) -> AppResult<u16> {
    let graph = GraphClient::new(http_client()?, base_url, token);
    let mail = OutgoingMail {
        subject: "integration".to_string(),
        body: "integration body".to_string(),
        recipient: recipient.to_string(),
    };
    Ok(graph.send_mail(&mailbox(sender), &mail).await?.as_u16())
}

pub async fn graph_put_drive_status(
    base_url: &str,
    token: &str,
    owner: Option<&str>,
    path: &str,
    content: &[u8],
) -> AppResult<u16> {
    let graph = GraphClient::new(http_client()?, base_url, token);
    Ok(graph
        .put_drive_content(&mailbox(owner), path, content.to_vec())
        .await?
        .as_u16())
}

pub async fn feed_headlines(url: &str) -> AppResult<Vec<String>> {
    RssFeed::new(http_client()?, url)
        .headlines(HEADLINE_LIMIT)
        .await
}

/// Runs the task batch against the configured Graph base URL and mirror
/// binary; returns per-step `{"step", "status"}` records plus counts.
pub async fn run_tasks_json(
    config: &AppConfig,
    access_token: &str,
    service_identity: bool,
    skip_mirror: bool,
) -> AppResult<Value> {
    let client = http_client()?;
    let graph = GraphClient::new(client.clone(), config.graph_base_url.as_str(), access_token);
    let mirror = RcloneCli::new(config.mirror.binary.as_str());
    let news = RssFeed::new(client, config.news_feed_url.as_str());
    let mode = if service_identity {
        RunMode::ServiceIdentity
    } else {
        RunMode::DelegatedIdentity
    };
    let report = TaskRunner::new(config, &graph, &mirror, &news)
        .run(mode, skip_mirror)
        .await;

    let steps: Vec<Value> = report
        .records()
        .iter()
        .map(|record| {
            let status = match &record.status {
                StepStatus::Succeeded => "succeeded",
                StepStatus::Failed(_) => "failed",
                StepStatus::Skipped(_) => "skipped",
                StepStatus::Unchecked => "unchecked",
            };
            json!({"step": record.step.as_str(), "status": status})
        })
        .collect();
    Ok(json!({
        "steps": steps,
        "ok": report.succeeded(),
        "failed": report.failed(),
        "skipped": report.skipped(),
    }))
}

pub struct BootstrapListener(BoundBootstrapListener);

impl BootstrapListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }

    pub fn callback_path(&self) -> String {
        self.0.callback_path().to_string()
    }
}

pub async fn bind_bootstrap(redirect_uri: &str) -> AppResult<BootstrapListener> {
    Ok(BootstrapListener(bind_bootstrap_listener(redirect_uri).await?))
}

/// Serves the sign-in listener (no browser launch) until one callback
/// completes. Returns whether it completed and the access tokens handed to
/// the completion hook.
pub async fn run_bootstrap(
    config: &AppConfig,
    listener: BootstrapListener,
    completion_message: &str,
) -> AppResult<(bool, Vec<String>)> {
    let store = TokenStore::new(config.token_file.clone());
    let endpoint = token_endpoint(config)?;
    let mut tokens: Vec<String> = Vec::new();
    let phase = run_interactive_bootstrap(
        config,
        &store,
        &endpoint,
        listener.0,
        false,
        |access_token: String| {
            tokens.push(access_token);
            let message = completion_message.to_string();
            async move { message }
        },
    )
    .await?;
    Ok((phase == BootstrapPhase::Completed, tokens))
}
