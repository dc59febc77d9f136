//! Capability traits for the upstream completion provider.
//!
//! The relay only ever talks to these traits; the production adapter lives in
//! [`super::openrouter`] and tests substitute scripted doubles that inject
//! fragments, delays, and errors deterministically.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the upstream provider boundary.
///
/// None of these leak to the client verbatim; the relay converts them into a
/// generic terminal event and logs the detail with the request id.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed upstream stream: {0}")]
    Protocol(String),

    #[error("completion cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Whether this error was caused by the request being cancelled rather
    /// than by the provider failing. The relay reports these as a client
    /// disconnect, never as an upstream fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Opens completion streams for prompts.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn open_stream(&self, prompt: &str)
        -> Result<Box<dyn CompletionStream>, UpstreamError>;
}

/// One open completion stream.
///
/// `next_fragment` yields `Ok(Some(text))` per content delta (possibly empty;
/// the relay suppresses empty ones) and `Ok(None)` at end of stream. `close`
/// releases the underlying connection and is idempotent; implementations also
/// release on drop so aborted tasks cannot leak the stream.
#[async_trait]
pub trait CompletionStream: Send {
    async fn next_fragment(&mut self) -> Result<Option<String>, UpstreamError>;

    fn close(&mut self);
}
