//! OpenRouter adapter: streaming chat completions over an OpenAI-compatible API.
//!
//! Opens `POST {base_url}/chat/completions` with `stream: true` and decodes
//! the response body as an SSE event stream, one content delta per event,
//! terminated by a literal `[DONE]` frame.

use async_trait::async_trait;
use bytes::Bytes;
use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::upstream::client::{CompletionClient, CompletionStream, UpstreamError};

/// Streaming chat completion request (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// One streamed completion chunk (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible streaming completion API.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(config: &UpstreamConfig, api_key: String) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn open_stream(
        &self,
        prompt: &str,
    ) -> Result<Box<dyn CompletionStream>, UpstreamError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let events = response.bytes_stream().boxed().eventsource();
        Ok(Box::new(OpenRouterStream {
            inner: Some(events),
        }))
    }
}

type SseEvents = EventStream<BoxStream<'static, reqwest::Result<Bytes>>>;

/// One open OpenRouter completion stream.
struct OpenRouterStream {
    // Taken on close; the connection is released when the stream drops.
    inner: Option<SseEvents>,
}

#[async_trait]
impl CompletionStream for OpenRouterStream {
    async fn next_fragment(&mut self) -> Result<Option<String>, UpstreamError> {
        let Some(events) = self.inner.as_mut() else {
            return Ok(None);
        };

        match events.next().await {
            None => Ok(None),
            Some(Ok(event)) => {
                if event.data.trim() == "[DONE]" {
                    return Ok(None);
                }
                let chunk: ChatCompletionChunk = serde_json::from_str(&event.data)
                    .map_err(|e| UpstreamError::Protocol(format!("bad chunk: {e}")))?;
                let content = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .unwrap_or_default();
                Ok(Some(content))
            }
            Some(Err(EventStreamError::Transport(e))) => Err(UpstreamError::Request(e)),
            Some(Err(e)) => Err(UpstreamError::Protocol(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.inner.take();
    }
}
