//! Usage: Short-lived local listener for the authorization-code bootstrap.
//!
//! Routes: `/` redirects the browser to the provider's authorize endpoint, the
//! redirect-URI path receives the authorization code. The listener does not
//! exchange codes itself; every callback is forwarded to the bootstrap driver,
//! which replies once it has finished.

use crate::shared::error::AppResult;
use crate::shared::security::constant_time_eq;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const EVENT_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OAuthCallbackPayload {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackReply {
    pub(crate) ok: bool,
    pub(crate) message: String,
}

impl CallbackReply {
    pub(crate) fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CallbackRequest {
    pub(crate) payload: OAuthCallbackPayload,
    pub(crate) reply: oneshot::Sender<CallbackReply>,
}

#[derive(Debug)]
pub(crate) enum ListenerEvent {
    Redirected,
    Callback(CallbackRequest),
}

#[derive(Debug)]
pub(crate) struct BoundBootstrapListener {
    listeners: Vec<TcpListener>,
    local_addr: SocketAddr,
    callback_path: String,
}

impl BoundBootstrapListener {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn callback_path(&self) -> &str {
        &self.callback_path
    }
}

pub(crate) struct RunningBootstrapServer {
    pub(crate) events: mpsc::Receiver<ListenerEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningBootstrapServer {
    /// Closes the event queue and answers whatever is still queued, so no
    /// handler is left waiting on a reply while the server drains.
    pub(crate) async fn shutdown(mut self) {
        self.events.close();
        let mut late_callbacks = 0usize;
        while let Ok(event) = self.events.try_recv() {
            if let ListenerEvent::Callback(request) = event {
                late_callbacks += 1;
                let _ = request
                    .reply
                    .send(CallbackReply::failure("sign-in already completed"));
            }
        }
        if late_callbacks > 0 {
            tracing::warn!(late_callbacks, "answered callbacks queued after sign-in ended");
        }

        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!("oauth callback listener task ended abnormally: {}", err);
            }
        }
    }
}

struct ListenerState {
    authorize_url: String,
    expected_state: String,
    events: mpsc::Sender<ListenerEvent>,
}

fn bind_host(host: &str) -> &str {
    match host {
        "127.0.0.1" => "127.0.0.1",
        "[::1]" | "::1" => "::1",
        _ => "0.0.0.0",
    }
}

/// Bind the listener on the host/port named by the redirect URI.
pub(crate) async fn bind_bootstrap_listener(redirect_uri: &str) -> AppResult<BoundBootstrapListener> {
    let url = Url::parse(redirect_uri)
        .map_err(|e| format!("CONFIG_INVALID: invalid redirect uri: {e}"))?;
    let host = url
        .host_str()
        .ok_or_else(|| "CONFIG_INVALID: redirect uri has no host".to_string())?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| "CONFIG_INVALID: redirect uri has no port".to_string())?;
    let callback_path = url.path().to_string();
    if callback_path == "/" {
        return Err("CONFIG_INVALID: redirect uri path must not be `/`"
            .to_string()
            .into());
    }

    let listeners = if host == "localhost" {
        bind_loopback_pair(port)
            .await
            .map_err(|e| format!("SYSTEM_ERROR: oauth callback bind failed: {e}"))?
    } else {
        let bind_host = bind_host(host);
        let listener = TcpListener::bind((bind_host, port)).await.map_err(|e| {
            format!("SYSTEM_ERROR: oauth callback bind {bind_host}:{port} failed: {e}")
        })?;
        vec![listener]
    };
    let local_addr = listeners
        .first()
        .ok_or_else(|| "SYSTEM_ERROR: oauth callback bind produced no listener".to_string())?
        .local_addr()
        .map_err(|e| format!("SYSTEM_ERROR: oauth callback local_addr failed: {e}"))?;

    Ok(BoundBootstrapListener {
        listeners,
        local_addr,
        callback_path,
    })
}

/// Browsers may resolve `localhost` to either family, so both loopback
/// addresses are bound on one port. One family failing is tolerated.
async fn bind_loopback_pair(port: u16) -> Result<Vec<TcpListener>, String> {
    let mut bind_errors: Vec<String> = Vec::new();
    let mut listeners = Vec::with_capacity(2);

    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listeners.push(listener),
        Err(err) => bind_errors.push(format!("127.0.0.1:{port} ({err})")),
    }
    // A dynamic port is pinned by the IPv4 listener.
    let v6_port = match listeners.first() {
        Some(v4) if port == 0 => v4
            .local_addr()
            .map_err(|e| format!("127.0.0.1:0 (local_addr failed: {e})"))?
            .port(),
        _ => port,
    };
    match TcpListener::bind(("::1", v6_port)).await {
        Ok(listener) => listeners.push(listener),
        Err(err) => bind_errors.push(format!("::1:{v6_port} ({err})")),
    }

    if listeners.is_empty() {
        return Err(bind_errors.join("; "));
    }
    if !bind_errors.is_empty() {
        tracing::debug!(errors = %bind_errors.join("; "), "loopback bind partially failed");
    }
    Ok(listeners)
}

pub(crate) fn spawn_bootstrap_server(
    bound: BoundBootstrapListener,
    authorize_url: String,
    expected_state: String,
) -> RunningBootstrapServer {
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let state = Arc::new(ListenerState {
        authorize_url,
        expected_state,
        events: events_tx,
    });
    let router = Router::new()
        .route("/", get(home))
        .route(bound.callback_path.as_str(), get(callback))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = bound
        .listeners
        .into_iter()
        .map(|listener| {
            let router = router.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let bind_addr = listener.local_addr().ok();
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                });
                if let Err(err) = serve.await {
                    tracing::error!(bind_addr = ?bind_addr, "oauth callback listener failed: {}", err);
                }
            })
        })
        .collect();

    RunningBootstrapServer {
        events: events_rx,
        shutdown: shutdown_tx,
        tasks,
    }
}

async fn home(State(state): State<Arc<ListenerState>>) -> Response {
    let _ = state.events.send(ListenerEvent::Redirected).await;
    Redirect::to(&state.authorize_url).into_response()
}

async fn callback(State(state): State<Arc<ListenerState>>, RawQuery(query): RawQuery) -> Response {
    let payload = match parse_callback_query(query.as_deref().unwrap_or_default())
        .and_then(|payload| validate_state(&payload, &state.expected_state).map(|_| payload))
    {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!("rejected oauth callback: {}", err);
            return render(StatusCode::BAD_REQUEST, &CallbackReply::failure(err.to_string()));
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = CallbackRequest {
        payload,
        reply: reply_tx,
    };
    if state.events.send(ListenerEvent::Callback(request)).await.is_err() {
        return render(
            StatusCode::SERVICE_UNAVAILABLE,
            &CallbackReply::failure("sign-in session is no longer active"),
        );
    }

    match reply_rx.await {
        Ok(reply) if reply.ok => render(StatusCode::OK, &reply),
        Ok(reply) => render(StatusCode::BAD_GATEWAY, &reply),
        Err(_) => render(
            StatusCode::SERVICE_UNAVAILABLE,
            &CallbackReply::failure("sign-in session ended before completing"),
        ),
    }
}

fn render(status: StatusCode, reply: &CallbackReply) -> Response {
    let title = if reply.ok {
        "Signed in"
    } else {
        "Sign-in failed"
    };
    let body = format!(
        "<html><body><h1>{title}</h1><p>{}</p></body></html>",
        escape_html(&reply.message)
    );
    (status, Html(body)).into_response()
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub(crate) fn parse_callback_query(query: &str) -> AppResult<OAuthCallbackPayload> {
    let url = Url::parse(&format!("http://127.0.0.1/callback?{query}"))
        .map_err(|e| format!("SEC_INVALID_INPUT: invalid oauth callback query: {e}"))?;

    let mut code: Option<String> = None;
    let mut state: Option<String> = None;
    let mut error: Option<String> = None;
    let mut error_description: Option<String> = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            "error_description" => error_description = Some(value.to_string()),
            _ => {}
        }
    }

    if code.is_none() && error.is_none() {
        return Err("SEC_INVALID_INPUT: oauth callback missing code/error"
            .to_string()
            .into());
    }

    Ok(OAuthCallbackPayload {
        code,
        state,
        error,
        error_description,
    })
}

fn validate_state(payload: &OAuthCallbackPayload, expected_state: &str) -> AppResult<()> {
    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| "SEC_INVALID_INPUT: oauth callback missing state".to_string())?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err("SEC_INVALID_INPUT: oauth callback state mismatch"
            .to_string()
            .into());
    }
    Ok(())
}
