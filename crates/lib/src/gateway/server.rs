//! Gateway HTTP server: webhook intake, health and status.

use crate::agent::AgentInvoker;
use crate::channels::{ChatSink, WebhookSink};
use crate::config::Config;
use crate::dispatch::{
    DispatchController, DispatchError, DispatchSettings, Disposition, SignatureHeaders,
};
use crate::exec::ProcessInvoker;
use crate::session::{self, SessionRegistry};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the request timestamp (milliseconds) used in the signature.
pub const TIMESTAMP_HEADER: &str = "timestamp";
/// Header carrying the base64 HMAC signature.
pub const SIGNATURE_HEADER: &str = "sign";
/// Path the chat provider POSTs events to.
pub const WEBHOOK_PATH: &str = "/webhook/dingtalk";

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub controller: Arc<DispatchController>,
}

impl GatewayState {
    /// Build state with the given agent and sink implementations and a fresh session registry.
    pub fn new(config: Config, invoker: Arc<dyn AgentInvoker>, sink: Arc<dyn ChatSink>) -> Self {
        let controller = DispatchController::new(
            DispatchSettings::from_config(&config),
            Arc::new(SessionRegistry::new()),
            invoker,
            sink,
        );
        Self {
            config: Arc::new(config),
            controller: Arc::new(controller),
        }
    }

    /// Build state backed by the configured agent process and the robot webhook sink.
    pub fn from_config(config: Config) -> Self {
        let invoker = Arc::new(ProcessInvoker::from_config(&config.agent));
        let sink = Arc::new(WebhookSink::new(Duration::from_secs(config.sink.timeout_secs)));
        Self::new(config, invoker, sink)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.controller.registry()
    }
}

/// Router with all gateway routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(dingtalk_webhook))
        .route("/health", get(health_http))
        .route("/status", get(status_http))
        .with_state(state)
}

/// Run the gateway server; binds to config.server.bind:config.server.port.
/// Starts the session sweeper and blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let ttl = config.session_ttl();
    if ttl > config.sessions.ttl() {
        log::warn!(
            "sessions.ttlSecs ({}s) is shorter than an agent run; using {}s",
            config.sessions.ttl_secs,
            ttl.as_secs()
        );
    }
    log::info!(
        "agent command: {} {:?} (timeout {}s)",
        config.agent.command,
        config.agent.args,
        config.agent.timeout_secs
    );
    if config.webhook_url().is_none() {
        log::warn!("no outbound webhook configured; replies use the per-message session webhook only");
    }
    if config.sign_secret().is_none() {
        log::warn!("no signing secret configured; inbound signatures are not checked");
    }

    let state = GatewayState::from_config(config);
    let sweeper = session::spawn_sweeper(state.registry().clone(), ttl);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited");
    sweeper.abort();
    served?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received; in-flight agent runs are abandoned");
}

/// A present header is always `Some`, even when empty or not valid UTF-8, so it still
/// reaches signature verification.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
}

/// POST /webhook/dingtalk: verify the signature headers, then decode, parse and filter the body,
/// acknowledge, and run the agent pipeline in the background.
async fn dingtalk_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let sig_headers = SignatureHeaders {
        timestamp: header_value(&headers, TIMESTAMP_HEADER),
        signature: header_value(&headers, SIGNATURE_HEADER),
    };
    if let Err(e) = state.controller.authenticate(&sig_headers) {
        return error_response(e);
    }
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("webhook: unparseable body: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("malformed payload: {}", e) })),
            );
        }
    };

    match state.controller.classify(&payload) {
        Ok(disposition) => {
            let status = disposition.status();
            if let Disposition::Accepted(msg) = disposition {
                // Detached; the response below does not wait for it.
                let _ = state.controller.spawn(msg);
            }
            (StatusCode::OK, Json(json!({ "status": status })))
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: DispatchError) -> (StatusCode, Json<serde_json::Value>) {
    match e {
        DispatchError::AuthRejected => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        ),
        e @ DispatchError::Malformed(_) => {
            log::warn!("webhook: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

/// GET /health returns a liveness JSON (for probes).
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
}

/// GET /status returns the in-flight session count and which optional settings are present.
async fn status_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.registry().len(),
        "config": {
            "hasWebhookUrl": state.config.webhook_url().is_some(),
            "hasSignKey": state.config.sign_secret().is_some(),
        },
    }))
}
