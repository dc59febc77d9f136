//! SSE event model and framing for chat responses.
//!
//! Every outcome of a chat request (connection proof, content fragments,
//! errors, completion) travels as one `data:`-framed JSON event on a single
//! ordered stream. Each event is serialized independently and flushed as its
//! own SSE frame.

use std::convert::Infallible;

use axum::response::sse::Event;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::DropGuard;

/// Discriminator carried in every chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Content,
    Error,
    Done,
}

/// One chat SSE event.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
    pub content: String,
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

impl ChatEvent {
    /// Proof that the byte-stream channel is open, sent before any upstream
    /// latency is incurred.
    pub fn connected(request_id: &str) -> Self {
        Self {
            content: String::new(),
            request_id: request_id.to_string(),
            kind: EventKind::Connected,
        }
    }

    pub fn content(request_id: &str, text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            request_id: request_id.to_string(),
            kind: EventKind::Content,
        }
    }

    pub fn error(request_id: &str, message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            request_id: request_id.to_string(),
            kind: EventKind::Error,
        }
    }

    pub fn done(request_id: &str) -> Self {
        Self {
            content: String::new(),
            request_id: request_id.to_string(),
            kind: EventKind::Done,
        }
    }
}

fn to_sse_event(event: &ChatEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().data(data)
}

/// Convert the relay's event receiver into an SSE stream.
///
/// The drop guard rides along with the stream: when the client goes away and
/// the response body is dropped, the guard cancels the relay's token.
pub fn event_stream(
    rx: mpsc::Receiver<ChatEvent>,
    guard: DropGuard,
) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok(to_sse_event(&event))
    })
}

/// A stream carrying exactly one event, for failures detected at the boundary.
pub fn single_event(event: ChatEvent) -> impl futures::Stream<Item = Result<Event, Infallible>> {
    tokio_stream::once(Ok(to_sse_event(&event)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ChatEvent::content("req-1", "hello");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["type"], "content");
    }

    #[test]
    fn test_kind_tags_are_lowercase() {
        for (event, tag) in [
            (ChatEvent::connected("r"), "connected"),
            (ChatEvent::content("r", "x"), "content"),
            (ChatEvent::error("r", "boom"), "error"),
            (ChatEvent::done("r"), "done"),
        ] {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], tag);
        }
    }

    #[test]
    fn test_terminal_events_have_empty_content() {
        assert_eq!(ChatEvent::connected("r").content, "");
        assert_eq!(ChatEvent::done("r").content, "");
    }
}
