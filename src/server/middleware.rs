//! Request-scoped middleware: correlation ids, request logging, security
//! headers, and rate-limit admission.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::api::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation identifier for one inbound request. Created at request entry,
/// read-only thereafter.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Attach a correlation id (caller-supplied or freshly generated), log the
/// request on the way in and out, and echo the id on the response.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    info!(request_id = %id, %method, path, "Started request");

    let mut response = next.run(req).await;

    info!(
        request_id = %id,
        %method,
        path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Completed request"
    );

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Standard security headers on every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Token-bucket admission gate. Denied requests are rejected with a
/// structured 429 before any upstream resource is allocated.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.limiter.try_consume() {
        let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone());
        warn!(request_id = request_id.as_deref().unwrap_or(""), "Rate limit exceeded");

        let mut err = ApiError::too_many_requests("Rate limit exceeded");
        if let Some(id) = request_id {
            err = err.with_request_id(id);
        }
        return err.into_response();
    }
    next.run(req).await
}
