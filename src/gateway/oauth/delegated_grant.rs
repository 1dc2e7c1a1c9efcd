//! Usage: Delegated (signed-in user) token lifecycle.
//!
//! A stored refresh token is exchanged silently. Without one, the interactive
//! bootstrap runs: browser consent, code exchange, persist, then the
//! completion callback (the delegated task batch) before the browser gets its
//! answer.

use crate::blocking;
use crate::gateway::oauth::browser::open_browser;
use crate::gateway::oauth::callback_server::{
    self, BoundBootstrapListener, CallbackReply, CallbackRequest, ListenerEvent,
};
use crate::gateway::oauth::endpoints::{build_authorize_url, build_oauth_state, delegated_scope};
use crate::gateway::oauth::token_exchange::{Grant, TokenEndpoint, TokenSet};
use crate::infra::config::AppConfig;
use crate::infra::token_store::TokenStore;
use crate::shared::error::{AppError, AppResult, CODE_AUTH_TOKEN_EXCHANGE_FAILED};
use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DelegatedState {
    Refreshable { refresh_token: String },
    Unauthenticated,
}

impl DelegatedState {
    pub(crate) fn from_stored(stored: Option<&TokenSet>) -> Self {
        match stored.and_then(TokenSet::refresh_token) {
            Some(refresh_token) => Self::Refreshable {
                refresh_token: refresh_token.to_string(),
            },
            None => Self::Unauthenticated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DelegatedOutcome {
    Token(String),
    /// Refresh was attempted and rejected; no token this run.
    RefreshFailed,
    InteractiveRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BootstrapPhase {
    AwaitingRedirect,
    AwaitingCallback,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BootstrapEvent {
    Redirected,
    CallbackFailed,
    CallbackSucceeded,
}

impl BootstrapPhase {
    pub(crate) fn advance(self, event: BootstrapEvent) -> Self {
        match (self, event) {
            (Self::Completed, _) => Self::Completed,
            (_, BootstrapEvent::CallbackSucceeded) => Self::Completed,
            (_, BootstrapEvent::Redirected) | (_, BootstrapEvent::CallbackFailed) => {
                Self::AwaitingCallback
            }
        }
    }
}

async fn load_stored(store: &TokenStore) -> AppResult<Option<TokenSet>> {
    let store = store.clone();
    blocking::run("token_store_load", move || store.load()).await
}

async fn persist(store: &TokenStore, token_set: TokenSet) -> AppResult<()> {
    let store = store.clone();
    blocking::run("token_store_save", move || store.save(&token_set)).await
}

/// Resolve a delegated token without user interaction, if possible.
pub(crate) async fn resolve_delegated_token(
    config: &AppConfig,
    store: &TokenStore,
    endpoint: &impl TokenEndpoint,
) -> AppResult<DelegatedOutcome> {
    let stored = load_stored(store).await?;
    let refresh_token = match DelegatedState::from_stored(stored.as_ref()) {
        DelegatedState::Refreshable { refresh_token } => refresh_token,
        DelegatedState::Unauthenticated => {
            tracing::info!(
                path = %store.path().display(),
                "no stored refresh token; interactive sign-in required"
            );
            return Ok(DelegatedOutcome::InteractiveRequired);
        }
    };

    let grant = Grant::RefreshToken {
        refresh_token,
        redirect_uri: config.redirect_uri.clone(),
    };
    let token_set = match endpoint.exchange(&grant).await {
        Ok(token_set) => token_set,
        Err(err) => {
            tracing::error!("refresh token exchange failed: {}", err);
            return Ok(DelegatedOutcome::RefreshFailed);
        }
    };
    let access_token = token_set
        .access_token()
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::new(
                CODE_AUTH_TOKEN_EXCHANGE_FAILED,
                "refresh response missing access_token",
            )
        })?;
    let expires_in = token_set.get("expires_in").and_then(serde_json::Value::as_i64);
    persist(store, token_set).await?;
    tracing::info!(expires_in = ?expires_in, "refresh token exchange succeeded");
    Ok(DelegatedOutcome::Token(access_token))
}

/// Exchange an authorization code and persist the resulting token set.
pub(crate) async fn exchange_authorization_code(
    config: &AppConfig,
    store: &TokenStore,
    endpoint: &impl TokenEndpoint,
    code: &str,
) -> AppResult<String> {
    let grant = Grant::AuthorizationCode {
        code: code.to_string(),
        redirect_uri: config.redirect_uri.clone(),
        scope: delegated_scope(),
    };
    let token_set = endpoint.exchange(&grant).await?;
    let access_token = token_set
        .access_token()
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::new(
                CODE_AUTH_TOKEN_EXCHANGE_FAILED,
                "authorization code response missing access_token",
            )
        })?;
    persist(store, token_set).await?;
    Ok(access_token)
}

/// Handle one callback: exchange, persist, then run the completion hook.
pub(crate) async fn complete_callback<F, Fut>(
    config: &AppConfig,
    store: &TokenStore,
    endpoint: &impl TokenEndpoint,
    request: &callback_server::OAuthCallbackPayload,
    on_token: &mut F,
) -> CallbackReply
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = String>,
{
    if let Some(err_code) = request.error.as_deref() {
        let description = request
            .error_description
            .as_deref()
            .unwrap_or("sign-in was not completed");
        tracing::error!(error = err_code, "identity provider returned an error: {}", description);
        return CallbackReply::failure(format!("{err_code}: {description}"));
    }
    let Some(code) = request.code.as_deref() else {
        return CallbackReply::failure("callback carried no authorization code");
    };

    match exchange_authorization_code(config, store, endpoint, code).await {
        Ok(access_token) => {
            tracing::info!("authorization code exchanged; running delegated tasks");
            CallbackReply::success(on_token(access_token).await)
        }
        Err(err) => {
            tracing::error!("authorization code exchange failed: {}", err);
            CallbackReply::failure("could not obtain a token; check the log and retry")
        }
    }
}

async fn next_event(server: &mut callback_server::RunningBootstrapServer) -> Option<ListenerEvent> {
    tokio::select! {
        event = server.events.recv() => event,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interactive sign-in interrupted");
            None
        }
    }
}

/// Serve the bootstrap listener until one callback completes (or Ctrl-C).
pub(crate) async fn run_interactive_bootstrap<F, Fut>(
    config: &AppConfig,
    store: &TokenStore,
    endpoint: &impl TokenEndpoint,
    bound: BoundBootstrapListener,
    launch_browser: bool,
    mut on_token: F,
) -> AppResult<BootstrapPhase>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = String>,
{
    let state = build_oauth_state();
    let authorize_url = build_authorize_url(config, &state)?;
    let home_url = format!("http://{}/", bound.local_addr());
    let mut server = callback_server::spawn_bootstrap_server(bound, authorize_url, state);
    tracing::info!(url = %home_url, "open this address in a browser to sign in");
    if launch_browser {
        if let Err(err) = open_browser(&home_url) {
            tracing::warn!("{}", err);
        }
    }

    let mut phase = BootstrapPhase::AwaitingRedirect;
    while let Some(event) = next_event(&mut server).await {
        match event {
            ListenerEvent::Redirected => {
                phase = phase.advance(BootstrapEvent::Redirected);
            }
            ListenerEvent::Callback(CallbackRequest { payload, reply }) => {
                let outcome = complete_callback(config, store, endpoint, &payload, &mut on_token).await;
                let event = if outcome.ok {
                    BootstrapEvent::CallbackSucceeded
                } else {
                    BootstrapEvent::CallbackFailed
                };
                phase = phase.advance(event);
                let _ = reply.send(outcome);
            }
        }
        if phase == BootstrapPhase::Completed {
            break;
        }
    }

    server.shutdown().await;
    Ok(phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::oauth::callback_server::OAuthCallbackPayload;
    use crate::gateway::oauth::testing::FakeTokenEndpoint;
    use crate::infra::config::tests::minimal_config;
    use serde_json::json;

    fn store_in(dir: &tempfile::TempDir) -> TokenStore {
        TokenStore::new(dir.path().join("token.json"))
    }

    fn token_set(value: serde_json::Value) -> TokenSet {
        TokenSet::from_value(value).expect("token set")
    }

    #[test]
    fn stored_set_without_refresh_token_is_unauthenticated() {
        assert_eq!(DelegatedState::from_stored(None), DelegatedState::Unauthenticated);
        let set = token_set(json!({"access_token": "a"}));
        assert_eq!(
            DelegatedState::from_stored(Some(&set)),
            DelegatedState::Unauthenticated
        );
        let set = token_set(json!({"access_token": "a", "refresh_token": "r"}));
        assert_eq!(
            DelegatedState::from_stored(Some(&set)),
            DelegatedState::Refreshable {
                refresh_token: "r".to_string()
            }
        );
    }

    #[test]
    fn bootstrap_phase_transitions() {
        use BootstrapEvent::*;
        use BootstrapPhase::*;
        assert_eq!(AwaitingRedirect.advance(Redirected), AwaitingCallback);
        assert_eq!(AwaitingCallback.advance(CallbackFailed), AwaitingCallback);
        assert_eq!(AwaitingRedirect.advance(CallbackSucceeded), Completed);
        assert_eq!(AwaitingCallback.advance(CallbackSucceeded), Completed);
        assert_eq!(Completed.advance(Redirected), Completed);
    }

    #[tokio::test]
    async fn refresh_replaces_stored_token_set_wholesale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        store
            .save(&token_set(json!({
                "access_token": "access-a",
                "refresh_token": "refresh-a",
                "id_token": "id-a"
            })))
            .expect("save a");

        let refreshed = json!({"access_token": "access-b", "refresh_token": "refresh-b"});
        let endpoint = FakeTokenEndpoint::succeeding(refreshed.clone());
        let outcome = resolve_delegated_token(&minimal_config(), &store, &endpoint)
            .await
            .expect("outcome");

        assert_eq!(outcome, DelegatedOutcome::Token("access-b".to_string()));
        assert_eq!(
            endpoint.grants(),
            vec![Grant::RefreshToken {
                refresh_token: "refresh-a".to_string(),
                redirect_uri: "http://localhost:8000/callback".to_string(),
            }]
        );
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded, token_set(refreshed));
        assert!(loaded.get("id_token").is_none());
    }

    #[tokio::test]
    async fn no_stored_credential_never_attempts_exchange() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let endpoint = FakeTokenEndpoint::succeeding(json!({"access_token": "x"}));

        let outcome = resolve_delegated_token(&minimal_config(), &store, &endpoint)
            .await
            .expect("outcome");

        assert_eq!(outcome, DelegatedOutcome::InteractiveRequired);
        assert!(endpoint.grants().is_empty());
    }

    #[tokio::test]
    async fn stored_set_lacking_refresh_token_routes_to_interactive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let original = token_set(json!({"access_token": "only-access"}));
        store.save(&original).expect("save");
        let endpoint = FakeTokenEndpoint::succeeding(json!({"access_token": "x"}));

        let outcome = resolve_delegated_token(&minimal_config(), &store, &endpoint)
            .await
            .expect("outcome");

        assert_eq!(outcome, DelegatedOutcome::InteractiveRequired);
        assert!(endpoint.grants().is_empty());
        assert_eq!(store.load().expect("load"), Some(original));
    }

    #[tokio::test]
    async fn failed_refresh_is_recoverable_and_keeps_stored_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let original = token_set(json!({"access_token": "a", "refresh_token": "r"}));
        store.save(&original).expect("save");
        let endpoint = FakeTokenEndpoint::failing("token endpoint returned status=400 code=invalid_grant");

        let outcome = resolve_delegated_token(&minimal_config(), &store, &endpoint)
            .await
            .expect("outcome");

        assert_eq!(outcome, DelegatedOutcome::RefreshFailed);
        assert_eq!(store.load().expect("load"), Some(original));
    }

    #[tokio::test]
    async fn successful_callback_persists_and_runs_completion_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let endpoint = FakeTokenEndpoint::succeeding(json!({
            "access_token": "user-access",
            "refresh_token": "user-refresh"
        }));
        let payload = OAuthCallbackPayload {
            code: Some("auth-code".to_string()),
            state: Some("s".to_string()),
            error: None,
            error_description: None,
        };
        let mut seen: Vec<String> = Vec::new();
        let mut on_token = |token: String| {
            seen.push(token);
            async { "all tasks finished".to_string() }
        };

        let reply =
            complete_callback(&minimal_config(), &store, &endpoint, &payload, &mut on_token).await;

        assert_eq!(reply, CallbackReply::success("all tasks finished"));
        assert_eq!(seen, vec!["user-access".to_string()]);
        assert_eq!(endpoint.grants().len(), 1);
        assert_eq!(endpoint.grants()[0].grant_type(), "authorization_code");
        let stored = store.load().expect("load").expect("present");
        assert_eq!(stored.refresh_token(), Some("user-refresh"));
    }

    #[tokio::test]
    async fn provider_error_callback_skips_exchange_and_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let endpoint = FakeTokenEndpoint::succeeding(json!({"access_token": "x"}));
        let payload = OAuthCallbackPayload {
            code: None,
            state: Some("s".to_string()),
            error: Some("access_denied".to_string()),
            error_description: Some("user cancelled".to_string()),
        };
        let mut calls = 0;
        let mut on_token = |_token: String| {
            calls += 1;
            async { String::new() }
        };

        let reply =
            complete_callback(&minimal_config(), &store, &endpoint, &payload, &mut on_token).await;

        assert!(!reply.ok);
        assert!(reply.message.contains("access_denied"));
        assert_eq!(calls, 0);
        assert!(endpoint.grants().is_empty());
        assert!(store.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn failed_code_exchange_does_not_run_completion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(&dir);
        let endpoint = FakeTokenEndpoint::failing("token endpoint returned status=400");
        let payload = OAuthCallbackPayload {
            code: Some("stale".to_string()),
            state: Some("s".to_string()),
            error: None,
            error_description: None,
        };
        let mut calls = 0;
        let mut on_token = |_token: String| {
            calls += 1;
            async { String::new() }
        };

        let reply =
            complete_callback(&minimal_config(), &store, &endpoint, &payload, &mut on_token).await;

        assert!(!reply.ok);
        assert_eq!(calls, 0);
        assert!(store.load().expect("load").is_none());
    }
}
