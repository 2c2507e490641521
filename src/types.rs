//! Shared types for the chat interface and the streaming event protocol

use serde::{Deserialize, Serialize};

/// Role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Content of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| {
                if let ContentPart::Text { text } = p {
                    Some(text.as_str())
                } else {
                    None
                }
            }),
        }
    }
}

/// Part of a multi-part message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Binary attachment (images, documents). Text-only backends reject
    /// these in the adapter before any generation is attempted.
    #[serde(rename = "file")]
    File { media_type: String, data: Vec<u8> },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool call recovered from model output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Definition of a tool offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Why a generation ended
///
/// Derived from the generation result; never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Model finished normally with plain text
    Stop,
    /// At least one tool call was resolved during the generation
    ToolCalls,
    /// Aborted, interrupted, or otherwise not a normal completion
    Other,
}

/// Output shape requested from the model
///
/// In `Json` mode the entire response is the payload: the fence scanner is
/// bypassed so marker-like substrings inside JSON strings can never trigger
/// tool-call detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// Per-call generation options
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub response_format: ResponseFormat,
}

/// Response from a generation call
#[derive(Debug, Clone)]
pub enum LlmResponse {
    /// Plain text response
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    /// Tool call requested by the model
    ToolCalls {
        calls: Vec<ToolCall>,
        usage: Option<TokenUsage>,
    },
    /// Leading free text followed by a tool call
    Mixed {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
        usage: Option<TokenUsage>,
    },
}

impl LlmResponse {
    pub fn text(&self) -> Option<&str> {
        match self {
            LlmResponse::Text { text, .. } => Some(text),
            LlmResponse::Mixed { text, .. } => text.as_deref(),
            LlmResponse::ToolCalls { .. } => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            LlmResponse::ToolCalls { calls, .. } => calls,
            LlmResponse::Mixed { tool_calls, .. } => tool_calls,
            LlmResponse::Text { .. } => &[],
        }
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        match self {
            LlmResponse::Text { usage, .. } => usage.as_ref(),
            LlmResponse::ToolCalls { usage, .. } => usage.as_ref(),
            LlmResponse::Mixed { usage, .. } => usage.as_ref(),
        }
    }

    /// Derive the finish reason from the response shape
    pub fn finish_reason(&self) -> FinishReason {
        if self.tool_calls().is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        }
    }
}

// ============================================================================
// Streaming Types
// ============================================================================

/// Events emitted during streaming generation
///
/// Per call, events follow a strict order: one `StreamStart`, then
/// interleaved text spans (`TextStart`/`TextDelta`/`TextEnd`) and tool-input
/// lifecycles (`ToolInputStart`/`ToolInputDelta`/`ToolInputEnd` followed by
/// `ToolCall`), then exactly one `Finish`. Nothing is emitted after `Finish`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Generation accepted; carries non-fatal warnings (e.g. ignored options)
    StreamStart { warnings: Vec<String> },
    /// A text span opened
    TextStart { id: String },
    /// Text chunk belonging to an open span
    TextDelta { id: String, text: String },
    /// The open text span closed
    TextEnd { id: String },
    /// A tool call was detected and its name is known
    ToolInputStart { id: String, tool_name: String },
    /// Newly streamed slice of the tool's argument object
    ToolInputDelta { id: String, text: String },
    /// Argument streaming finished for this tool call
    ToolInputEnd { id: String },
    /// Fully parsed tool call; `arguments` is re-serialized JSON
    ToolCall {
        id: String,
        tool_name: String,
        arguments: String,
    },
    /// Terminal event; exactly one per generation
    Finish {
        reason: FinishReason,
        usage: TokenUsage,
    },
    /// Error during streaming (the call also returns `Err`)
    Error(String),
}

/// Callback type for streaming events
///
/// Called for each event as it is produced. Implementations should be fast
/// and non-blocking.
pub type StreamCallback = Box<dyn Fn(StreamEvent) + Send + Sync>;

/// Builder for accumulating a streamed generation into an [`LlmResponse`]
#[derive(Debug, Default)]
pub struct StreamingResponseBuilder {
    /// Accumulated plain text
    pub text: String,
    /// Resolved tool calls, in resolution order
    pub tool_calls: Vec<ToolCall>,
    /// Token usage (from the finish event)
    pub usage: Option<TokenUsage>,
}

impl StreamingResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream event and accumulate content
    pub fn process(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text, .. } => {
                self.text.push_str(text);
            }
            StreamEvent::ToolCall {
                id,
                tool_name,
                arguments,
            } => {
                let arguments =
                    serde_json::from_str(arguments).unwrap_or(serde_json::Value::Null);
                self.tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: tool_name.clone(),
                    arguments,
                });
            }
            StreamEvent::Finish { usage, .. } => {
                self.usage = Some(usage.clone());
            }
            _ => {}
        }
    }

    /// Build the final response
    pub fn build(self) -> LlmResponse {
        if self.tool_calls.is_empty() {
            LlmResponse::Text {
                text: self.text,
                usage: self.usage,
            }
        } else if self.text.is_empty() {
            LlmResponse::ToolCalls {
                calls: self.tool_calls,
                usage: self.usage,
            }
        } else {
            LlmResponse::Mixed {
                text: Some(self.text),
                tool_calls: self.tool_calls,
                usage: self.usage,
            }
        }
    }
}
