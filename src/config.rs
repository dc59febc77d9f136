//! Runtime configuration for ai-stream-relay.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The upstream API credential is never stored in the file; it is read from the
//! environment (a `.env` file is honored when present).

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Environment variable holding the upstream API credential.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "ai-stream-relay", about = "SSE streaming relay for LLM chat completions")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Admission and validation limits.
    pub limits: LimitsConfig,

    /// Upstream completion provider settings.
    pub upstream: UpstreamConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Interval between SSE keep-alive comments on idle streams, in seconds.
    pub sse_keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            sse_keep_alive_secs: 15,
        }
    }
}

/// Admission-control and request-validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Sustained request rate admitted per second (also the burst capacity).
    pub requests_per_second: f64,

    /// Maximum accepted prompt length in characters.
    pub max_prompt_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            max_prompt_length: 4000,
        }
    }
}

/// Upstream completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,

    /// Model identifier sent with every completion request.
    pub model: String,

    /// TCP connect timeout for upstream requests, in seconds.
    ///
    /// Only connection establishment is bounded; an open stream may stay
    /// silent as long as the provider keeps it alive.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Read the upstream API credential from the environment.
    pub fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(API_KEY_ENV).map_err(|_| anyhow::anyhow!("{API_KEY_ENV} is not set"))
    }
}
