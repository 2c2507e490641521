//! End-to-end tests of the tool-calling polyfill over a scripted backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;

use edge_llm::session::FragmentStream;
use edge_llm::streaming::StreamDriver;
use edge_llm::{
    BackendMessage, FinishReason, GenerateOptions, LlmError, LlmProvider, LlmResponse, Message,
    PolyfillProvider, ResponseFormat, SessionConfig, SessionFactory, StreamCallback, StreamEvent,
    TextSession, TokenUsage, ToolDefinition,
};

// ---------------------------------------------------------------------------
// Scripted backend

struct MockSession {
    script: Vec<String>,
    /// Yield an error after this many fragments instead of finishing
    fail_after: Option<usize>,
    interrupted: Arc<AtomicBool>,
}

#[async_trait]
impl TextSession for MockSession {
    async fn generate_once(&mut self, _messages: &[BackendMessage]) -> Result<String, LlmError> {
        Ok(self.script.concat())
    }

    async fn generate_streaming(
        &mut self,
        _messages: &[BackendMessage],
    ) -> Result<FragmentStream, LlmError> {
        let fail_after = self.fail_after;
        let items: Vec<Result<String, LlmError>> = self
            .script
            .iter()
            .take(fail_after.unwrap_or(usize::MAX))
            .cloned()
            .map(Ok)
            .chain(
                fail_after
                    .map(|_| Err(LlmError::Generation("backend crashed".to_string())))
                    .into_iter(),
            )
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

struct MockFactory {
    script: Vec<String>,
    fail_after: Option<usize>,
    interrupted: Arc<AtomicBool>,
}

impl MockFactory {
    fn scripted(fragments: &[&str]) -> Self {
        Self {
            script: fragments.iter().map(|s| s.to_string()).collect(),
            fail_after: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    type Session = MockSession;

    async fn create(&self, _config: &SessionConfig) -> Result<MockSession, LlmError> {
        Ok(MockSession {
            script: self.script.clone(),
            fail_after: self.fail_after,
            interrupted: Arc::clone(&self.interrupted),
        })
    }
}

fn provider(factory: MockFactory) -> PolyfillProvider<MockFactory> {
    PolyfillProvider::new("mock", factory, SessionConfig::default())
}

fn weather_tool() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: "get_weather".to_string(),
        description: "Look up current weather".to_string(),
        parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    }]
}

fn collecting_callback() -> (StreamCallback, Arc<Mutex<Vec<StreamEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: StreamCallback = Box::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

fn text_deltas(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_input_deltas(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolInputDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Streaming path

#[tokio::test]
async fn fenced_call_split_across_fragments_streams_arguments() {
    let provider = provider(MockFactory::scripted(&[
        "Let me check.\n",
        "```tool_call\n",
        "{\"name\":\"get_weather\",\"arg",
        "uments\":{\"city\":\"SF\"}}",
        "\n```",
    ]));
    let (callback, events) = collecting_callback();

    let response = provider
        .chat_streaming(
            &[Message::user("weather in SF?")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
            callback,
            None,
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(events[0], StreamEvent::StreamStart { .. }));
    assert_eq!(text_deltas(&events), "Let me check.\n");
    assert_eq!(tool_input_deltas(&events), "{\"city\":\"SF\"}");

    // Text span closes before any tool-input event.
    let text_end = events
        .iter()
        .position(|e| matches!(e, StreamEvent::TextEnd { .. }))
        .unwrap();
    let input_start = events
        .iter()
        .position(|e| matches!(e, StreamEvent::ToolInputStart { .. }))
        .unwrap();
    assert!(text_end < input_start);

    let call = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::ToolCall {
                tool_name,
                arguments,
                ..
            } => Some((tool_name.clone(), arguments.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(call.0, "get_weather");
    let args: serde_json::Value = serde_json::from_str(&call.1).unwrap();
    assert_eq!(args, json!({"city": "SF"}));

    match events.last().unwrap() {
        StreamEvent::Finish { reason, .. } => assert_eq!(*reason, FinishReason::ToolCalls),
        other => panic!("expected finish, got {:?}", other),
    }

    // The accumulated response mirrors the events.
    match response {
        LlmResponse::Mixed {
            text, tool_calls, ..
        } => {
            assert_eq!(text.as_deref(), Some("Let me check.\n"));
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].name, "get_weather");
        }
        other => panic!("expected mixed response, got {:?}", other),
    }
}

#[tokio::test]
async fn plain_text_without_tools_passes_fence_markers_through() {
    let provider = provider(MockFactory::scripted(&[
        "look at this:\n```tool_call\n",
        "{\"name\":\"x\"}\n```\ndone",
    ]));
    let (callback, events) = collecting_callback();

    let response = provider
        .chat_streaming(
            &[Message::user("hi")],
            None,
            &GenerateOptions::default(),
            callback,
            None,
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .all(|e| !matches!(e, StreamEvent::ToolInputStart { .. } | StreamEvent::ToolCall { .. })));
    assert_eq!(
        text_deltas(&events),
        "look at this:\n```tool_call\n{\"name\":\"x\"}\n```\ndone"
    );
    assert!(matches!(response, LlmResponse::Text { .. }));
}

#[tokio::test]
async fn json_mode_ignores_tools_and_warns() {
    let provider = provider(MockFactory::scripted(&[
        "{\"code\":\"```tool_call\\n{}\\n```\",\"value\":42}",
    ]));
    let (callback, events) = collecting_callback();

    let response = provider
        .chat_streaming(
            &[Message::user("give me json")],
            Some(&weather_tool()),
            &GenerateOptions {
                response_format: ResponseFormat::Json,
            },
            callback,
            None,
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    match &events[0] {
        StreamEvent::StreamStart { warnings } => {
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("JSON response mode"));
        }
        other => panic!("expected stream start, got {:?}", other),
    }
    assert_eq!(
        response.text(),
        Some("{\"code\":\"```tool_call\\n{}\\n```\",\"value\":42}")
    );
    assert!(response.tool_calls().is_empty());
}

#[tokio::test]
async fn interrupt_stops_backend_and_finishes_with_other() {
    let factory = MockFactory::scripted(&["one ", "two ", "three ", "four"]);
    let interrupted = Arc::clone(&factory.interrupted);
    let provider = provider(factory);
    let (callback, events) = collecting_callback();

    let seen = AtomicUsize::new(0);
    let interrupt_check = move || seen.fetch_add(1, Ordering::SeqCst) >= 1;

    provider
        .chat_streaming(
            &[Message::user("count")],
            None,
            &GenerateOptions::default(),
            callback,
            Some(&interrupt_check),
        )
        .await
        .unwrap();

    assert!(interrupted.load(Ordering::SeqCst));
    let events = events.lock().unwrap();
    match events.last().unwrap() {
        StreamEvent::Finish { reason, .. } => assert_eq!(*reason, FinishReason::Other),
        other => panic!("expected finish, got {:?}", other),
    }
    // Not every scripted fragment arrived.
    assert!(text_deltas(&events).len() < "one two three four".len());
}

#[tokio::test]
async fn mid_stream_backend_error_surfaces_as_error_event_and_err() {
    let mut factory = MockFactory::scripted(&["partial ", "output"]);
    factory.fail_after = Some(1);
    let provider = provider(factory);
    let (callback, events) = collecting_callback();

    let result = provider
        .chat_streaming(
            &[Message::user("hi")],
            None,
            &GenerateOptions::default(),
            callback,
            None,
        )
        .await;

    assert!(matches!(result, Err(LlmError::Generation(_))));
    let events = events.lock().unwrap();
    assert!(matches!(events.last().unwrap(), StreamEvent::Error(_)));
    // No finish event on the error path.
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamEvent::Finish { .. })));
}

#[tokio::test]
async fn unclosed_fence_at_stream_end_is_salvaged() {
    let provider = provider(MockFactory::scripted(&[
        "```tool_call\n",
        "{\"name\":\"get_weather\",\"arguments\":{\"city\":\"SF\"}}",
    ]));
    let (callback, _events) = collecting_callback();

    let response = provider
        .chat_streaming(
            &[Message::user("weather?")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
            callback,
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.tool_calls().len(), 1);
    assert_eq!(response.tool_calls()[0].name, "get_weather");
}

// ---------------------------------------------------------------------------
// Non-streaming path

#[tokio::test]
async fn chat_recovers_call_from_fenced_response() {
    let provider = provider(MockFactory::scripted(&[
        "```tool_call\n{\"name\":\"get_weather\",\"arguments\":{\"city\":\"SF\"}}\n```",
    ]));

    let response = provider
        .chat(
            &[Message::user("weather?")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
        )
        .await
        .unwrap();

    match response {
        LlmResponse::ToolCalls { calls, usage } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "get_weather");
            assert_eq!(calls[0].arguments, json!({"city": "SF"}));
            assert!(usage.is_some());
        }
        other => panic!("expected tool calls, got {:?}", other),
    }
}

#[tokio::test]
async fn chat_reports_leading_text_verbatim_like_streaming() {
    let script = [
        "Let me check.\n```tool_call\n",
        "{\"name\":\"get_weather\",\"arguments\":{\"city\":\"SF\"}}\n```\n",
    ];

    let chat_response = provider(MockFactory::scripted(&script))
        .chat(
            &[Message::user("weather?")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
        )
        .await
        .unwrap();

    let (callback, _events) = collecting_callback();
    let stream_response = provider(MockFactory::scripted(&script))
        .chat_streaming(
            &[Message::user("weather?")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
            callback,
            None,
        )
        .await
        .unwrap();

    // Both paths keep the surrounding text byte-identical.
    assert_eq!(chat_response.text(), Some("Let me check.\n"));
    assert_eq!(chat_response.text(), stream_response.text());
    assert_eq!(chat_response.tool_calls().len(), 1);
    assert_eq!(stream_response.tool_calls().len(), 1);
}

#[tokio::test]
async fn chat_repairs_trailing_brace_payload() {
    let provider = provider(MockFactory::scripted(&[
        "```tool_call\n{\"name\":\"x\",\"arguments\":{}}}\n```",
    ]));

    let response = provider
        .chat(
            &[Message::user("go")],
            Some(&weather_tool()),
            &GenerateOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.tool_calls().len(), 1);
    assert_eq!(response.tool_calls()[0].name, "x");
    assert_eq!(response.tool_calls()[0].arguments, json!({}));
}

#[tokio::test]
async fn chat_in_json_mode_never_parses_payload_lookalikes() {
    let input = "{\"code\":\"```tool_call\\n{}\\n```\",\"value\":42}";
    let provider = provider(MockFactory::scripted(&[input]));

    let response = provider
        .chat(
            &[Message::user("json please")],
            Some(&weather_tool()),
            &GenerateOptions {
                response_format: ResponseFormat::Json,
            },
        )
        .await
        .unwrap();

    assert_eq!(response.text(), Some(input));
    assert!(response.tool_calls().is_empty());
}

#[tokio::test]
async fn chat_rejects_file_attachments() {
    let provider = provider(MockFactory::scripted(&["unused"]));
    let messages = vec![Message {
        role: edge_llm::Role::User,
        content: edge_llm::MessageContent::Parts(vec![edge_llm::ContentPart::File {
            media_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        }]),
        tool_call_id: None,
    }];

    let err = provider
        .chat(&messages, None, &GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::UnsupportedContent(_)));
}

// ---------------------------------------------------------------------------
// Split invariance

fn drive_split(text: &str, splits: &[usize]) -> (String, Vec<edge_llm::ToolCall>) {
    let mut driver = StreamDriver::new(&GenerateOptions::default(), true);
    let mut events = Vec::new();
    let mut emit = |e: StreamEvent| events.push(e);
    driver.start(Vec::new(), &mut emit);

    let mut rest = text;
    for &at in splits {
        let at = at.min(rest.len());
        // Split points land on char boundaries only.
        if !rest.is_char_boundary(at) {
            continue;
        }
        let (head, tail) = rest.split_at(at);
        driver.push_fragment(head, &mut emit);
        rest = tail;
    }
    driver.push_fragment(rest, &mut emit);
    driver.finish(TokenUsage::default(), &mut emit);

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    (text, driver.resolved_calls().to_vec())
}

proptest! {
    /// Marker-free text comes out byte-identical no matter how the backend
    /// fragments it.
    #[test]
    fn marker_free_text_is_identity(
        text in "[a-zA-Z0-9 .,!?\n]{0,200}",
        splits in proptest::collection::vec(0usize..50, 0..8),
    ) {
        let (out, calls) = drive_split(&text, &splits);
        prop_assert_eq!(out, text);
        prop_assert!(calls.is_empty());
    }

    /// A well-formed fenced call resolves identically regardless of how the
    /// stream is fragmented.
    #[test]
    fn fenced_call_resolution_is_split_invariant(
        splits in proptest::collection::vec(1usize..30, 0..10),
    ) {
        let text = "Thinking.\n```tool_call\n{\"name\":\"get_weather\",\"arguments\":{\"city\":\"SF\"}}\n```\n";
        let (out, calls) = drive_split(text, &splits);
        prop_assert_eq!(calls.len(), 1);
        prop_assert_eq!(calls[0].name.as_str(), "get_weather");
        prop_assert_eq!(&calls[0].arguments, &serde_json::json!({"city": "SF"}));
        prop_assert!(out.starts_with("Thinking.\n"));
    }
}
