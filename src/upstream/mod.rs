//! Upstream completion provider capability.
//!
//! - [`client`]: the `CompletionClient` / `CompletionStream` traits and the
//!   upstream error taxonomy
//! - [`openrouter`]: reqwest adapter over an OpenAI-compatible streaming API

pub mod client;
pub mod openrouter;
