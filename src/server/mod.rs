//! HTTP server: routes, middleware, and the streaming relay core.
//!
//! - [`api`]: request/response types, router, and route handlers
//! - [`middleware`]: correlation ids, request logging, security headers, admission
//! - [`relay`]: the streaming state machine driving one upstream completion
//! - [`sse`]: chat event model and SSE framing

pub mod api;
pub mod middleware;
pub mod relay;
pub mod sse;
