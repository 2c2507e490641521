//! Uniform provider interface and the tool-calling polyfill
//!
//! [`PolyfillProvider`] adapts any [`SessionFactory`] backend (plain-text
//! in/out, no native tool support) to the full [`LlmProvider`] surface:
//! tools are taught through an injected system-prompt section, and tool
//! calls are recovered from the model's fenced output on the way back.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::convert::{to_backend_messages, tool_instructions};
use crate::engine::EngineHandle;
use crate::error::LlmError;
use crate::parser::parse_tool_calls;
use crate::session::{BackendMessage, SessionConfig, SessionFactory, TextSession};
use crate::streaming::StreamDriver;
use crate::types::{
    GenerateOptions, LlmResponse, Message, ResponseFormat, StreamCallback,
    StreamingResponseBuilder, TokenUsage, ToolDefinition,
};

/// Uniform chat-completion interface over heterogeneous backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and diagnostics
    fn name(&self) -> &str;

    /// Non-streaming generation
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Streaming generation; events are delivered through `callback` and the
    /// accumulated response is also returned
    async fn chat_streaming(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
        callback: StreamCallback,
        interrupt_check: Option<&(dyn Fn() -> bool + Send + Sync)>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Tool-calling polyfill over a text-only backend session
pub struct PolyfillProvider<F: SessionFactory> {
    name: String,
    engine: EngineHandle<F>,
}

impl<F: SessionFactory> PolyfillProvider<F> {
    pub fn new(name: impl Into<String>, factory: F, config: SessionConfig) -> Self {
        Self {
            name: name.into(),
            engine: EngineHandle::new(factory, config),
        }
    }

    pub fn engine(&self) -> &EngineHandle<F> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut EngineHandle<F> {
        &mut self.engine
    }

    /// Assemble the backend prompt, injecting tool instructions when tools
    /// are offered on a plain-text generation.
    fn prepare(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<(Vec<BackendMessage>, Option<Vec<ToolDefinition>>, Vec<String>), LlmError> {
        let tools: Option<Vec<ToolDefinition>> =
            tools.filter(|t| !t.is_empty()).map(|t| t.to_vec());
        let mut warnings = Vec::new();
        let mut backend = to_backend_messages(messages)?;

        match (&tools, options.response_format) {
            (Some(tools), ResponseFormat::Text) => {
                debug!(tool_count = tools.len(), "injecting tool instructions");
                backend.insert(0, BackendMessage::new("system", tool_instructions(tools)));
            }
            (Some(_), ResponseFormat::Json) => {
                warnings
                    .push("tool definitions are ignored in JSON response mode".to_string());
            }
            (None, _) => {}
        }

        let scanning = tools.is_some() && options.response_format == ResponseFormat::Text;
        Ok((backend, scanning.then_some(tools.unwrap_or_default()), warnings))
    }
}

/// Rough token estimate for backends that report no usage.
fn estimate_usage(prompt: &[BackendMessage], output_len: usize) -> TokenUsage {
    let input: usize = prompt.iter().map(|m| m.content.len() / 4).sum();
    let output = output_len / 4;
    TokenUsage {
        input_tokens: input as u32,
        output_tokens: output as u32,
        total_tokens: (input + output) as u32,
    }
}

#[async_trait]
impl<F: SessionFactory> LlmProvider for PolyfillProvider<F> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, LlmError> {
        let (backend, scanning_tools, _warnings) = self.prepare(messages, tools, options)?;

        let session = self.engine.session().await?;
        let mut guard = session.lock().await;
        let text = guard.generate_once(&backend).await?;
        let usage = guard
            .last_usage()
            .unwrap_or_else(|| estimate_usage(&backend, text.len()));
        drop(guard);

        if scanning_tools.is_none() {
            return Ok(LlmResponse::Text {
                text,
                usage: Some(usage),
            });
        }

        let parsed = parse_tool_calls(&text);
        match parsed.tool_calls.into_iter().next() {
            None => Ok(LlmResponse::Text {
                text,
                usage: Some(usage),
            }),
            Some(call) => {
                // Surrounding text stays verbatim so both generation paths
                // report identical content for the same model output.
                if parsed.text_content.is_empty() {
                    Ok(LlmResponse::ToolCalls {
                        calls: vec![call],
                        usage: Some(usage),
                    })
                } else {
                    Ok(LlmResponse::Mixed {
                        text: Some(parsed.text_content),
                        tool_calls: vec![call],
                        usage: Some(usage),
                    })
                }
            }
        }
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
        callback: StreamCallback,
        interrupt_check: Option<&(dyn Fn() -> bool + Send + Sync)>,
    ) -> Result<LlmResponse, LlmError> {
        let (backend, scanning_tools, warnings) = self.prepare(messages, tools, options)?;

        let session = self.engine.session().await?;
        let mut guard = session.lock().await;
        let mut stream = guard.generate_streaming(&backend).await?;

        let mut builder = StreamingResponseBuilder::new();
        let mut driver = StreamDriver::new(options, scanning_tools.is_some());
        let mut output_len = 0usize;
        let mut stream_error: Option<LlmError> = None;

        {
            let mut emit = |event| {
                builder.process(&event);
                callback(event);
            };
            driver.start(warnings, &mut emit);

            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        output_len += fragment.len();
                        driver.push_fragment(&fragment, &mut emit);
                    }
                    Err(err) => {
                        stream_error = Some(err);
                        break;
                    }
                }
                if interrupt_check.map(|check| check()).unwrap_or(false) {
                    debug!("generation interrupted by caller");
                    guard.interrupt();
                    driver.mark_aborted();
                    break;
                }
            }
            drop(stream);

            if let Some(err) = stream_error {
                warn!(error = %err, "backend stream failed mid-generation");
                emit(crate::types::StreamEvent::Error(err.to_string()));
                return Err(err);
            }

            let usage = guard
                .last_usage()
                .unwrap_or_else(|| estimate_usage(&backend, output_len));
            driver.finish(usage, &mut emit);
        }

        Ok(builder.build())
    }
}
