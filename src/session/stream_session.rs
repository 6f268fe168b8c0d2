//! Stream Session
//!
//! Owns one logical exchange: dispatches the request, enforces the timeout,
//! feeds streamed fragments through the aggregator, runs tool rounds and
//! reports exactly one terminal outcome.
//!
//! ```text
//! Idle -> Dispatched -> Streaming | AwaitingResponse -> Completed | Cancelled | Failed
//!              ^                |
//!              +-- tool round --+
//! ```

use crate::api::completion::{CompletionResponse, RequestPayload, ToolCall, Usage};
use crate::api::streaming::{parse_sse_data, SseData};
use crate::client::transport::{FragmentStream, Transport, TransportRequest, TransportResponse};
use crate::error::{GlmError, Result};
use crate::session::aggregator::DeltaAggregator;
use crate::session::cancel::{CancelHandle, CancelReason};
use crate::session::events::{ChatCallbacks, ResponseMeta, SessionOutcome};
use crate::tools::ToolRegistry;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dispatched,
    Streaming,
    AwaitingResponse,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Where and how a session sends its requests
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub headers: HeaderMap,

    /// Time allowed for one round, from dispatch to the end of the response
    pub timeout: Duration,

    pub max_tool_rounds: usize,
}

/// What one streamed response left behind
#[derive(Debug, Default)]
struct StreamSummary {
    calls: Vec<ToolCall>,
    id: Option<String>,
    model: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

/// A single request lifecycle, possibly spanning several tool rounds
pub struct StreamSession {
    payload: RequestPayload,
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    tools: Option<Arc<dyn ToolRegistry>>,
    cancel: CancelHandle,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        payload: RequestPayload,
        settings: SessionSettings,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            payload,
            settings,
            transport,
            tools: None,
            cancel: CancelHandle::new(),
            state: SessionState::Idle,
        }
    }

    /// Execute tool calls through `registry` instead of handing them back
    pub fn with_tools(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    /// Handle that cancels this session; usable before `run` is called
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The request as it will be sent next
    pub fn payload(&self) -> &RequestPayload {
        &self.payload
    }

    /// Drive the exchange to its terminal state
    pub async fn run<C>(mut self, callbacks: &mut C) -> SessionOutcome
    where
        C: ChatCallbacks + ?Sized,
    {
        callbacks.on_cancel_available(self.cancel.clone());

        let mut text = String::new();
        let mut rounds = 0;

        loop {
            let deadline = Instant::now() + self.settings.timeout;
            let response = match self.dispatch(rounds, deadline).await {
                Ok(response) => response,
                Err(e) => return self.fail_or_cancel(callbacks, e, text),
            };

            let (status, summary) = match response {
                TransportResponse::Body { status, text: body } => {
                    if self.state != SessionState::AwaitingResponse {
                        self.transition(SessionState::AwaitingResponse);
                    }
                    match parse_body(&body) {
                        Ok(parsed) => {
                            text.push_str(&parsed.extract_message());
                            (status, body_summary(parsed))
                        }
                        Err(e) => return self.fail_or_cancel(callbacks, e, text),
                    }
                }
                TransportResponse::Stream { status, fragments } => {
                    self.transition(SessionState::Streaming);
                    match self.consume_stream(fragments, deadline, &mut text, callbacks).await {
                        Ok(summary) => (status, summary),
                        Err(e) => return self.fail_or_cancel(callbacks, e, text),
                    }
                }
            };

            let registry = match self.tools.clone() {
                Some(registry) if self.payload.stream && !summary.calls.is_empty() => registry,
                _ => return self.complete(callbacks, text, status, summary, rounds),
            };

            if rounds >= self.settings.max_tool_rounds {
                let limit = self.settings.max_tool_rounds;
                return self.fail_or_cancel(callbacks, GlmError::ToolRoundLimit(limit), text);
            }

            debug!(calls = summary.calls.len(), "running tool round");
            let round = match self.cancel.run_until(registry.run(&summary.calls), None).await {
                Ok(Ok(round)) => round,
                Ok(Err(e)) => return self.fail_or_cancel(callbacks, e, text),
                Err(reason) => return self.cancelled(callbacks, reason, text),
            };

            self.payload = self.payload.with_tool_round(&round);
            rounds += 1;
        }
    }

    async fn dispatch(&mut self, round: usize, deadline: Instant) -> Result<TransportResponse> {
        self.transition(SessionState::Dispatched);
        if !self.payload.stream {
            self.transition(SessionState::AwaitingResponse);
        }

        debug!(
            round,
            messages = self.payload.messages.len(),
            model = %self.payload.model,
            "dispatching chat request"
        );

        let request = TransportRequest {
            url: &self.settings.url,
            headers: &self.settings.headers,
            payload: &self.payload,
        };

        self.cancel
            .run_until(self.transport.send(request, &self.cancel), Some(deadline))
            .await
            .map_err(GlmError::Cancelled)?
    }

    async fn consume_stream<C>(
        &self,
        mut fragments: FragmentStream,
        deadline: Instant,
        text: &mut String,
        callbacks: &mut C,
    ) -> Result<StreamSummary>
    where
        C: ChatCallbacks + ?Sized,
    {
        let mut aggregator = DeltaAggregator::new();
        let mut summary = StreamSummary::default();

        loop {
            let next = self
                .cancel
                .run_until(fragments.next(), Some(deadline))
                .await
                .map_err(GlmError::Cancelled)?;
            let Some(data) = next else { break };

            let chunk = match parse_sse_data(&data?)? {
                SseData::Done => break,
                SseData::Chunk(chunk) => chunk,
            };

            if summary.id.is_none() {
                summary.id = chunk.id.clone();
            }
            if chunk.model.is_some() {
                summary.model = chunk.model.clone();
            }
            if chunk.usage.is_some() {
                summary.usage = chunk.usage.clone();
            }
            if let Some(reason) = chunk.finish_reason() {
                summary.finish_reason = Some(reason.to_string());
            }

            let Some(delta) = chunk.first_delta() else {
                continue;
            };
            if let Some(piece) = aggregator.push_delta(delta)? {
                text.push_str(&piece);
                callbacks.on_text_delta(&piece);
            }
        }

        summary.calls = aggregator.finish();
        Ok(summary)
    }

    fn complete<C>(
        &mut self,
        callbacks: &mut C,
        text: String,
        status: u16,
        summary: StreamSummary,
        rounds: usize,
    ) -> SessionOutcome
    where
        C: ChatCallbacks + ?Sized,
    {
        if let Some(reason) = self.cancel.reason() {
            return self.cancelled(callbacks, reason, text);
        }

        let meta = ResponseMeta {
            status,
            id: summary.id,
            model: summary.model,
            finish_reason: summary.finish_reason,
            usage: summary.usage,
            rounds,
            tool_calls: summary.calls,
            received_at: Utc::now(),
        };

        self.transition(SessionState::Completed);
        callbacks.on_finish(&text, &meta);
        SessionOutcome::Completed { text, meta }
    }

    fn fail_or_cancel<C>(&mut self, callbacks: &mut C, error: GlmError, text: String) -> SessionOutcome
    where
        C: ChatCallbacks + ?Sized,
    {
        if let Some(reason) = error.cancel_reason().or_else(|| self.cancel.reason()) {
            return self.cancelled(callbacks, reason, text);
        }

        warn!(error = %error, "chat request failed");
        self.transition(SessionState::Failed);
        callbacks.on_error(&error);
        SessionOutcome::Failed(error)
    }

    fn cancelled<C>(
        &mut self,
        callbacks: &mut C,
        reason: CancelReason,
        partial_text: String,
    ) -> SessionOutcome
    where
        C: ChatCallbacks + ?Sized,
    {
        info!(%reason, "chat request stopped");
        self.transition(SessionState::Cancelled);
        callbacks.on_cancelled(reason, &partial_text);
        SessionOutcome::Cancelled {
            reason,
            partial_text,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

fn parse_body(body: &str) -> Result<CompletionResponse> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(500).collect();
        GlmError::Response(format!("Failed to parse response: {}. Body: {}", e, preview))
    })
}

fn body_summary(parsed: CompletionResponse) -> StreamSummary {
    let finish_reason = parsed.finish_reason().map(str::to_string);
    let calls = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.tool_calls)
        .unwrap_or_default();

    StreamSummary {
        calls,
        id: parsed.id,
        model: parsed.model,
        finish_reason,
        usage: parsed.usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::completion::{MessageContent, Role, WireMessage};
    use crate::api::payload::build_payload;
    use crate::config::ModelConfig;
    use crate::error::FragmentViolation;
    use crate::tools::{FunctionDefinition, FunctionRegistry};
    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    enum Script {
        Body(String),
        Stream(Vec<String>),
        StreamThenHang(Vec<String>),
        Hang,
        Fail(GlmError),
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<RequestPayload>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<RequestPayload> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: TransportRequest<'_>,
            _cancel: &CancelHandle,
        ) -> Result<TransportResponse> {
            self.requests.lock().push(request.payload.clone());
            let script = self.scripts.lock().pop_front();

            match script {
                Some(Script::Body(text)) => Ok(TransportResponse::Body { status: 200, text }),
                Some(Script::Stream(events)) => Ok(TransportResponse::Stream {
                    status: 200,
                    fragments: Box::pin(stream::iter(events.into_iter().map(Ok))),
                }),
                Some(Script::StreamThenHang(events)) => Ok(TransportResponse::Stream {
                    status: 200,
                    fragments: Box::pin(
                        stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
                    ),
                }),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Fail(e)) => Err(e),
                None => Err(GlmError::Transport("no script left".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        handle: Option<CancelHandle>,
        cancel_immediately: bool,
        cancel_after_deltas: Option<usize>,
        deltas: Vec<String>,
        finished: Vec<(String, ResponseMeta)>,
        errors: Vec<String>,
        cancelled: Vec<(CancelReason, String)>,
    }

    impl ChatCallbacks for Recorder {
        fn on_cancel_available(&mut self, handle: CancelHandle) {
            if self.cancel_immediately {
                handle.cancel();
            }
            self.handle = Some(handle);
        }

        fn on_text_delta(&mut self, delta: &str) {
            self.deltas.push(delta.to_string());
            if self.cancel_after_deltas == Some(self.deltas.len()) {
                if let Some(handle) = &self.handle {
                    handle.cancel();
                }
            }
        }

        fn on_finish(&mut self, text: &str, meta: &ResponseMeta) {
            self.finished.push((text.to_string(), meta.clone()));
        }

        fn on_error(&mut self, error: &GlmError) {
            self.errors.push(error.to_string());
        }

        fn on_cancelled(&mut self, reason: CancelReason, partial_text: &str) {
            self.cancelled.push((reason, partial_text.to_string()));
        }
    }

    fn text_event(content: &str) -> String {
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]}).to_string()
    }

    fn tool_event(index: u32, id: Option<&str>, name: Option<&str>, arguments: &str) -> String {
        let mut call = serde_json::json!({
            "index": index,
            "function": {"arguments": arguments}
        });
        if let Some(id) = id {
            call["id"] = id.into();
            call["type"] = "function".into();
        }
        if let Some(name) = name {
            call["function"]["name"] = name.into();
        }
        serde_json::json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}}]}).to_string()
    }

    fn finish_event(reason: &str) -> String {
        serde_json::json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
            .to_string()
    }

    fn session(transport: Arc<ScriptedTransport>, stream: bool) -> StreamSession {
        let payload = build_payload(
            vec![WireMessage::text(Role::User, "what is x?")],
            &ModelConfig::default().resolve(),
            stream,
            Vec::new(),
        );
        StreamSession::new(
            payload,
            SessionSettings {
                url: "http://localhost/chat/completions".to_string(),
                headers: HeaderMap::new(),
                timeout: Duration::from_secs(1),
                max_tool_rounds: 4,
            },
            transport,
        )
    }

    fn lookup_registry() -> Arc<FunctionRegistry> {
        Arc::new(FunctionRegistry::new().register(
            FunctionDefinition {
                name: "lookup".to_string(),
                description: None,
                parameters: None,
            },
            |args| async move { Ok(format!("{} is 42", args["q"].as_str().unwrap_or("?"))) },
        ))
    }

    #[tokio::test]
    async fn test_streamed_text_completes() {
        let transport = ScriptedTransport::new(vec![Script::Stream(vec![
            text_event("Hel"),
            text_event("lo"),
            finish_event("stop"),
            "[DONE]".to_string(),
        ])]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, true).run(&mut recorder).await;

        assert_eq!(outcome.text(), Some("Hello"));
        assert_eq!(recorder.deltas, vec!["Hel", "lo"]);
        assert_eq!(recorder.finished.len(), 1);
        assert_eq!(recorder.finished[0].0, "Hello");
        assert_eq!(recorder.finished[0].1.finish_reason.as_deref(), Some("stop"));
        assert!(recorder.errors.is_empty());
        assert!(recorder.cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_tool_round_is_spliced_and_redispatched() {
        let transport = ScriptedTransport::new(vec![
            Script::Stream(vec![
                text_event("Checking. "),
                tool_event(0, Some("c1"), Some("lookup"), "{\"q\":"),
                tool_event(0, None, None, "\"x\"}"),
                finish_event("tool_calls"),
            ]),
            Script::Stream(vec![text_event("x is 42.")]),
        ]);
        let mut recorder = Recorder::default();

        let outcome = session(transport.clone(), true)
            .with_tools(lookup_registry())
            .run(&mut recorder)
            .await;

        assert_eq!(outcome.text(), Some("Checking. x is 42."));
        let (_, meta) = &recorder.finished[0];
        assert_eq!(meta.rounds, 1);
        assert!(meta.tool_calls.is_empty());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);

        let second = &requests[1].messages;
        assert_eq!(second.len(), 3);
        let announced = second[1].tool_calls.as_ref().unwrap();
        assert_eq!(announced[0].id, "c1");
        assert_eq!(announced[0].function.name, "lookup");
        assert_eq!(announced[0].function.arguments, "{\"q\":\"x\"}");
        assert_eq!(second[2].role, Role::Tool);
        assert_eq!(second[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(
            second[2].content,
            MessageContent::Text("x is 42".to_string())
        );
    }

    #[tokio::test]
    async fn test_tool_calls_handed_back_without_registry() {
        let transport = ScriptedTransport::new(vec![Script::Stream(vec![
            tool_event(0, Some("c1"), Some("lookup"), "{}"),
        ])]);
        let mut recorder = Recorder::default();

        let outcome = session(transport.clone(), true).run(&mut recorder).await;

        let SessionOutcome::Completed { meta, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(meta.tool_calls.len(), 1);
        assert_eq!(meta.tool_calls[0].id, "c1");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let tool_stream = || Script::Stream(vec![tool_event(0, Some("c1"), Some("lookup"), "{}")]);
        let transport = ScriptedTransport::new(vec![tool_stream(), tool_stream(), tool_stream()]);
        let mut recorder = Recorder::default();

        let mut session = session(transport, true).with_tools(lookup_registry());
        session.settings.max_tool_rounds = 1;
        let outcome = session.run(&mut recorder).await;

        assert!(matches!(outcome.error(), Some(GlmError::ToolRoundLimit(1))));
        assert_eq!(recorder.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_dangling_fragment_fails_once() {
        let transport = ScriptedTransport::new(vec![Script::Stream(vec![
            text_event("partial"),
            tool_event(0, None, None, "{}"),
            text_event("never shown"),
        ])]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, true).run(&mut recorder).await;

        assert!(matches!(
            outcome.error(),
            Some(GlmError::DanglingFragment {
                index: 0,
                violation: FragmentViolation::ContinuationWithoutOpener
            })
        ));
        assert_eq!(recorder.deltas, vec!["partial"]);
        assert_eq!(recorder.errors.len(), 1);
        assert!(recorder.finished.is_empty());
        assert!(recorder.cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let transport = ScriptedTransport::new(vec![Script::Stream(vec![text_event("hi")])]);
        let mut recorder = Recorder {
            cancel_immediately: true,
            ..Default::default()
        };

        let outcome = session(transport.clone(), true).run(&mut recorder).await;

        assert_eq!(outcome.cancel_reason(), Some(CancelReason::Caller));
        assert!(recorder.deltas.is_empty());
        assert_eq!(recorder.cancelled, vec![(CancelReason::Caller, String::new())]);
        assert!(recorder.errors.is_empty());
        assert!(recorder.finished.is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_deltas() {
        let transport = ScriptedTransport::new(vec![Script::StreamThenHang(vec![
            text_event("a"),
            text_event("b"),
            text_event("c"),
        ])]);
        let mut recorder = Recorder {
            cancel_after_deltas: Some(1),
            ..Default::default()
        };

        let outcome = session(transport, true).run(&mut recorder).await;

        assert_eq!(outcome.cancel_reason(), Some(CancelReason::Caller));
        assert_eq!(recorder.deltas, vec!["a"]);
        assert_eq!(recorder.cancelled, vec![(CancelReason::Caller, "a".to_string())]);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_no_response() {
        let transport = ScriptedTransport::new(vec![Script::Hang]);
        let mut recorder = Recorder::default();

        let started = Instant::now();
        let outcome = session(transport, true).run(&mut recorder).await;

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(outcome.cancel_reason(), Some(CancelReason::Timeout));
        assert_eq!(recorder.cancelled, vec![(CancelReason::Timeout, String::new())]);
        assert!(recorder.errors.is_empty());
        assert!(recorder.deltas.is_empty());
        assert_eq!(recorder.handle.as_ref().and_then(|h| h.reason()), Some(CancelReason::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_stalled_stream() {
        let transport = ScriptedTransport::new(vec![Script::StreamThenHang(vec![text_event("a")])]);
        let mut recorder = Recorder::default();

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            session(transport, true).run(&mut recorder),
        )
        .await
        .expect("stalled stream must be bounded by the request timeout");

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.cancel_reason(), Some(CancelReason::Timeout));
        assert_eq!(recorder.deltas, vec!["a"]);
        assert_eq!(recorder.cancelled, vec![(CancelReason::Timeout, "a".to_string())]);
        assert!(recorder.errors.is_empty());
        assert!(recorder.finished.is_empty());
    }

    #[tokio::test]
    async fn test_non_streamed_response() {
        let transport = ScriptedTransport::new(vec![Script::Body(
            r#"{"id":"r1","model":"glm-4","choices":[{"message":{"content":"Hi there"},"finish_reason":"stop"}]}"#
                .to_string(),
        )]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, false).run(&mut recorder).await;

        assert_eq!(outcome.text(), Some("Hi there"));
        assert!(recorder.deltas.is_empty());
        let (text, meta) = &recorder.finished[0];
        assert_eq!(text, "Hi there");
        assert_eq!(meta.status, 200);
        assert_eq!(meta.id.as_deref(), Some("r1"));
        assert_eq!(meta.model.as_deref(), Some("glm-4"));
    }

    #[tokio::test]
    async fn test_non_streamed_missing_content() {
        let transport = ScriptedTransport::new(vec![Script::Body(r#"{"choices":[]}"#.to_string())]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, false).run(&mut recorder).await;

        assert_eq!(outcome.text(), Some(""));
        assert_eq!(recorder.finished.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_body_fails() {
        let transport = ScriptedTransport::new(vec![Script::Body("<html>bad gateway</html>".to_string())]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, false).run(&mut recorder).await;

        assert!(matches!(outcome.error(), Some(GlmError::Response(_))));
        assert_eq!(recorder.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_reported_once() {
        let transport = ScriptedTransport::new(vec![Script::Fail(GlmError::Http {
            status: 500,
            body: "boom".to_string(),
        })]);
        let mut recorder = Recorder::default();

        let outcome = session(transport, true).run(&mut recorder).await;

        assert!(matches!(outcome.error(), Some(GlmError::Http { status: 500, .. })));
        assert_eq!(recorder.errors, vec!["Request failed with status 500: boom".to_string()]);
        assert!(recorder.finished.is_empty());
        assert!(recorder.cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_state_starts_idle() {
        let transport = ScriptedTransport::new(Vec::new());
        let session = session(transport, true);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.state().is_terminal());
        assert!(!session.cancel_handle().is_cancelled());
    }
}
