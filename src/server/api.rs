//! HTTP API surface.
//!
//! - POST /chat: SSE relay of a streaming chat completion
//! - GET /health: liveness, no dependency checks
//! - OPTIONS preflight answered by the CORS layer
//!
//! Once streaming headers are out, every outcome (validation failures
//! included) travels as an SSE `error` event inside the 200 response; only
//! admission rejections use an HTTP status code.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::server::middleware::{self, RequestId};
use crate::server::relay;
use crate::server::sse::{self, ChatEvent};
use crate::upstream::client::CompletionClient;

/// What the outbound transport can do, declared once at startup instead of
/// probed per request.
#[derive(Debug, Clone, Copy)]
pub struct TransportCapabilities {
    /// Whether response bytes reach the client as they are written. Hyper
    /// flushes each chunk of a streaming body, so this holds for the stock
    /// transport.
    pub incremental_flush: bool,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            incremental_flush: true,
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: RateLimiter,
    pub upstream: Arc<dyn CompletionClient>,
    pub transport: TransportCapabilities,
}

/// Inbound chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/// Build the axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(middleware::REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(middleware::REQUEST_ID_HEADER)]);

    Router::new()
        .route("/chat", post(chat))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_context))
                .layer(axum::middleware::from_fn(middleware::security_headers))
                .layer(cors),
        )
        .with_state(state)
}

fn validate_prompt(prompt: &str, max_length: usize) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("prompt cannot be empty".to_string());
    }
    if prompt.len() > max_length {
        return Err(format!(
            "prompt exceeds maximum length of {max_length} characters"
        ));
    }
    Ok(())
}

fn with_stream_headers(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// A 200 `text/event-stream` response carrying exactly one error event, for
/// faults detected after the request was admitted but before the relay runs.
fn single_error_response(event: ChatEvent) -> Response {
    with_stream_headers(Sse::new(sse::single_event(event)).into_response())
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Bytes,
) -> Response {
    if !state.transport.incremental_flush {
        error!(request_id, "Streaming unsupported by transport");
        return single_error_response(ChatEvent::error(
            &request_id,
            "Streaming unsupported by client",
        ));
    }

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            error!(request_id, %err, "Invalid request payload");
            return single_error_response(ChatEvent::error(
                &request_id,
                "Invalid request payload",
            ));
        }
    };

    if let Err(message) = validate_prompt(&request.prompt, state.config.limits.max_prompt_length)
    {
        error!(request_id, message, "Request validation failed");
        return single_error_response(ChatEvent::error(&request_id, message));
    }

    info!(
        request_id,
        prompt_length = request.prompt.len(),
        "Processing chat request"
    );

    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();

    tokio::spawn(relay::run(
        state.upstream.clone(),
        request.prompt,
        request_id,
        tx,
        cancel.child_token(),
    ));

    // The guard travels with the response body: a client disconnect drops it,
    // which cancels the relay.
    let stream = sse::event_stream(rx, cancel.drop_guard());
    with_stream_headers(
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(
                state.config.server.sse_keep_alive_secs,
            )))
            .into_response(),
    )
}

async fn health() -> &'static str {
    "OK"
}
