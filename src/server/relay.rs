//! Streaming relay: drives one upstream completion stream to completion while
//! emitting a well-ordered SSE event sequence.
//!
//! Lifecycle per request: a `connected` event first, zero or more `content`
//! events, then exactly one terminal event (`done` or `error`). The upstream
//! stream is released exactly once on every exit path.
//!
//! The receive loop runs as a sub-task that owns the stream and reports its
//! verdict over a one-shot channel; the parent races that verdict against the
//! request's cancellation token. The select is biased toward cancellation, so
//! a disconnect observed together with upstream termination resolves to
//! "Client disconnected" rather than `done`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::server::sse::ChatEvent;
use crate::upstream::client::{CompletionClient, CompletionStream, UpstreamError};

/// Generic message for upstream failures; the cause is logged, never leaked.
pub const STREAM_FAILED_MSG: &str = "Failed to create chat completion stream";

/// Terminal message when the client goes away mid-stream.
pub const DISCONNECTED_MSG: &str = "Client disconnected";

/// Verdict reported by the pump sub-task.
enum PumpOutcome {
    /// Upstream signalled a clean end of stream.
    EndOfStream,
    /// Upstream receive failed.
    Failed(UpstreamError),
    /// The outbound channel closed under us: the client is gone.
    ReceiverGone,
}

/// Relay one validated prompt to the upstream provider, emitting chat events
/// on `events` until a terminal state is reached.
pub async fn run(
    client: Arc<dyn CompletionClient>,
    prompt: String,
    request_id: String,
    events: mpsc::Sender<ChatEvent>,
    cancel: CancellationToken,
) {
    // The open outbound channel is the proof the client needs that streaming
    // works; send it before paying any upstream latency.
    if events
        .send(ChatEvent::connected(&request_id))
        .await
        .is_err()
    {
        return;
    }

    let mut stream = match client.open_stream(&prompt).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(request_id, %err, "Error creating chat completion stream");
            let _ = events
                .send(ChatEvent::error(&request_id, STREAM_FAILED_MSG))
                .await;
            return;
        }
    };

    let (verdict_tx, verdict_rx) = oneshot::channel();
    let pump_events = events.clone();
    let pump_request_id = request_id.clone();
    let pump = tokio::spawn(async move {
        let outcome = loop {
            match stream.next_fragment().await {
                Ok(Some(text)) => {
                    // Empty deltas are a routine artifact of the upstream
                    // protocol; they must not produce noise events.
                    if text.is_empty() {
                        continue;
                    }
                    if pump_events
                        .send(ChatEvent::content(&pump_request_id, text))
                        .await
                        .is_err()
                    {
                        break PumpOutcome::ReceiverGone;
                    }
                }
                Ok(None) => break PumpOutcome::EndOfStream,
                Err(err) => break PumpOutcome::Failed(err),
            }
        };
        // Release before reporting, so the terminal event never precedes it.
        stream.close();
        let _ = verdict_tx.send(outcome);
    });

    tokio::select! {
        // Poll the cancellation watcher first: when both become ready in the
        // same poll, the disconnect wins over upstream termination.
        biased;

        _ = cancel.cancelled() => {
            info!(request_id, "Client disconnected");
            // Stop the pump before emitting the terminal event so nothing can
            // follow it; aborting drops the stream, which releases it.
            pump.abort();
            let _ = pump.await;
            let _ = events
                .send(ChatEvent::error(&request_id, DISCONNECTED_MSG))
                .await;
        }

        verdict = verdict_rx => match verdict {
            Ok(PumpOutcome::EndOfStream) => {
                info!(request_id, "Completion finished");
                let _ = events.send(ChatEvent::done(&request_id)).await;
            }
            Ok(PumpOutcome::ReceiverGone) => {
                info!(request_id, "Client disconnected");
                let _ = events
                    .send(ChatEvent::error(&request_id, DISCONNECTED_MSG))
                    .await;
            }
            Ok(PumpOutcome::Failed(err)) if err.is_cancellation() => {
                // The disconnect surfaced through the upstream call before our
                // watcher fired; report it once, as a disconnect.
                info!(request_id, "Client disconnected");
                let _ = events
                    .send(ChatEvent::error(&request_id, DISCONNECTED_MSG))
                    .await;
            }
            Ok(PumpOutcome::Failed(err)) => {
                error!(request_id, %err, "Failed to receive chat completion");
                let _ = events
                    .send(ChatEvent::error(&request_id, STREAM_FAILED_MSG))
                    .await;
            }
            Err(_) => {
                error!(request_id, "Completion pump exited without a verdict");
                let _ = events
                    .send(ChatEvent::error(&request_id, STREAM_FAILED_MSG))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sse::EventKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted stream: replays fragments, delays, and errors in order, then
    /// signals end of stream. Counts releases.
    struct ScriptedStream {
        steps: VecDeque<Step>,
        closed: bool,
        close_count: Arc<AtomicUsize>,
    }

    enum Step {
        Fragment(&'static str),
        Delay(Duration),
        Fail(UpstreamError),
    }

    impl ScriptedStream {
        fn new(steps: Vec<Step>, close_count: Arc<AtomicUsize>) -> Self {
            Self {
                steps: steps.into(),
                closed: false,
                close_count,
            }
        }
    }

    #[async_trait]
    impl CompletionStream for ScriptedStream {
        async fn next_fragment(&mut self) -> Result<Option<String>, UpstreamError> {
            loop {
                match self.steps.pop_front() {
                    Some(Step::Fragment(text)) => return Ok(Some(text.to_string())),
                    Some(Step::Delay(d)) => tokio::time::sleep(d).await,
                    Some(Step::Fail(err)) => return Err(err),
                    None => return Ok(None),
                }
            }
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.close_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Hands out one scripted stream, or fails to open.
    struct ScriptedClient {
        stream: Mutex<Option<Box<dyn CompletionStream>>>,
        open_error: Option<&'static str>,
    }

    impl ScriptedClient {
        fn with_stream(stream: ScriptedStream) -> Self {
            Self {
                stream: Mutex::new(Some(Box::new(stream))),
                open_error: None,
            }
        }

        fn failing(reason: &'static str) -> Self {
            Self {
                stream: Mutex::new(None),
                open_error: Some(reason),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn open_stream(
            &self,
            _prompt: &str,
        ) -> Result<Box<dyn CompletionStream>, UpstreamError> {
            if let Some(reason) = self.open_error {
                return Err(UpstreamError::Status {
                    status: 502,
                    body: reason.to_string(),
                });
            }
            Ok(self.stream.lock().unwrap().take().expect("stream already taken"))
        }
    }

    async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_fragments_relayed_in_order_with_empty_suppressed() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let stream = ScriptedStream::new(
            vec![
                Step::Fragment("a"),
                Step::Fragment(""),
                Step::Fragment("b"),
            ],
            close_count.clone(),
        );
        let client = Arc::new(ScriptedClient::with_stream(stream));
        let (tx, rx) = mpsc::channel(32);

        run(
            client,
            "hi".to_string(),
            "req-1".to_string(),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = collect(rx).await;
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connected,
                EventKind::Content,
                EventKind::Content,
                EventKind::Done
            ]
        );
        assert_eq!(events[1].content, "a");
        assert_eq!(events[2].content, "b");
        assert_eq!(events[3].content, "");
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_emits_single_generic_error() {
        let client = Arc::new(ScriptedClient::failing("bad gateway"));
        let (tx, rx) = mpsc::channel(32);

        run(
            client,
            "hi".to_string(),
            "req-2".to_string(),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Connected);
        assert_eq!(events[1].kind, EventKind::Error);
        assert_eq!(events[1].content, STREAM_FAILED_MSG);
    }

    #[tokio::test]
    async fn test_cancellation_mid_stream() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let stream = ScriptedStream::new(
            vec![
                Step::Fragment("a"),
                // Long enough that only cancellation can end the test.
                Step::Delay(Duration::from_secs(3600)),
                Step::Fragment("never"),
            ],
            close_count.clone(),
        );
        let client = Arc::new(ScriptedClient::with_stream(stream));
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run(
            client,
            "hi".to_string(),
            "req-3".to_string(),
            tx,
            cancel.clone(),
        ));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);
        let content = rx.recv().await.unwrap();
        assert_eq!(content.content, "a");

        cancel.cancel();

        let terminal = rx.recv().await.unwrap();
        assert_eq!(terminal.kind, EventKind::Error);
        assert_eq!(terminal.content, DISCONNECTED_MSG);

        // Nothing after the terminal event, and the stream was released once.
        assert!(rx.recv().await.is_none());
        relay.await.unwrap();
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receive_error_emits_single_generic_error() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let stream = ScriptedStream::new(
            vec![
                Step::Fragment("a"),
                Step::Fail(UpstreamError::Protocol("bad chunk".to_string())),
            ],
            close_count.clone(),
        );
        let client = Arc::new(ScriptedClient::with_stream(stream));
        let (tx, rx) = mpsc::channel(32);

        run(
            client,
            "hi".to_string(),
            "req-4".to_string(),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = collect(rx).await;
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Connected, EventKind::Content, EventKind::Error]
        );
        assert_eq!(events[2].content, STREAM_FAILED_MSG);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_derived_upstream_error_reported_once_as_disconnect() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let stream = ScriptedStream::new(
            vec![Step::Fail(UpstreamError::Cancelled)],
            close_count.clone(),
        );
        let client = Arc::new(ScriptedClient::with_stream(stream));
        let (tx, rx) = mpsc::channel(32);

        run(
            client,
            "hi".to_string(),
            "req-5".to_string(),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Error);
        assert_eq!(events[1].content, DISCONNECTED_MSG);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_close_has_no_further_effect() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let mut stream = ScriptedStream::new(vec![], close_count.clone());
        stream.close();
        stream.close();
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }
}
