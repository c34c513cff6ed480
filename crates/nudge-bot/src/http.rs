use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nudge_channel::Channel;
use nudge_core::error::{NudgeError, Result};
use nudge_core::types::Activity;
use url::Url;

use crate::bot::ChatBot;
use crate::llm::Completion;

pub struct AppState<C, L> {
    pub bot: ChatBot<C, L>,
    /// Replaces `localhost` in inbound service URLs.
    pub playground_host: String,
}

pub fn router<C, L>(state: Arc<AppState<C, L>>) -> Router
where
    C: Channel + 'static,
    L: Completion + 'static,
{
    Router::new()
        .route(
            "/api/messages",
            post(messages::<C, L>).options(preflight).head(probe),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<C, L, F>(port: u16, state: Arc<AppState<C, L>>, shutdown: F) -> Result<()>
where
    C: Channel + 'static,
    L: Completion + 'static,
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| NudgeError::Config(format!("failed to bind port {port}: {e}")))?;
    tracing::info!(port, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| NudgeError::Channel(format!("http server error: {e}")))?;

    Ok(())
}

async fn messages<C, L>(
    State(state): State<Arc<AppState<C, L>>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode
where
    C: Channel + 'static,
    L: Completion + 'static,
{
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.contains("application/json") {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE;
    }

    let mut body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("rejecting unparseable activity: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    rewrite_inbound_service_url(&mut body, &state.playground_host);

    tracing::info!(
        channel = body["channelId"].as_str().unwrap_or_default(),
        activity_type = body["type"].as_str().unwrap_or_default(),
        text = body["text"].as_str().unwrap_or_default(),
        "INBOUND"
    );

    let activity: Activity = match serde_json::from_value(body) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!("rejecting malformed activity: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    state.bot.on_turn(activity).await;
    StatusCode::CREATED
}

async fn preflight() -> Response {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Authorization, Content-Type"),
        ],
    )
        .into_response()
}

async fn probe() -> StatusCode {
    StatusCode::OK
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Rewrite `serviceUrl` in a raw inbound activity if it points at loopback.
pub fn rewrite_inbound_service_url(body: &mut serde_json::Value, host_override: &str) {
    let Some(original) = body.get("serviceUrl").and_then(|v| v.as_str()) else {
        return;
    };
    let rewritten = rewrite_service_url(original, host_override);
    if rewritten != original {
        tracing::info!("[NET] Rewriting serviceUrl {original} -> {rewritten}");
        body["serviceUrl"] = serde_json::Value::String(rewritten);
    }
}

/// Point a `localhost` / `127.0.0.1` service URL at `host_override`, keeping
/// scheme, port, path and query, so a containerised bot can reach an
/// Emulator running on the host. Other URLs come back unchanged.
pub fn rewrite_service_url(service_url: &str, host_override: &str) -> String {
    let Ok(mut url) = Url::parse(service_url) else {
        return service_url.to_string();
    };
    if !matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) {
        return service_url.to_string();
    }
    if url.set_host(Some(host_override)).is_err() {
        return service_url.to_string();
    }
    url.to_string()
}
