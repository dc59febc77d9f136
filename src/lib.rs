//! ai-stream-relay: SSE relay for streaming LLM chat completions.
//!
//! Bridges a browser client to an OpenAI-compatible completion provider over
//! Server-Sent Events: each inbound request becomes one incrementally flushed
//! event stream, admission is gated by a token-bucket rate limiter, and a
//! client disconnect is propagated to the upstream call.

pub mod config;
pub mod error;
pub mod limiter;
pub mod server;
pub mod upstream;
