//! Streaming generation driver
//!
//! Consumes text fragments from a backend session and turns them into the
//! ordered event protocol: text spans, tool-input lifecycles, a terminal
//! tool-call event per resolved call, and exactly one finish event. The
//! driver owns the fence scanner and the per-call candidate; nothing is
//! shared across generations.

mod candidate;

pub use candidate::ToolCallCandidate;

use tracing::warn;

use crate::fence::{FenceScanner, TOOL_CALL_FENCE_OPEN};
use crate::parser::parse_tool_calls;
use crate::types::{
    FinishReason, GenerateOptions, ResponseFormat, StreamEvent, TokenUsage, ToolCall,
};

/// Per-generation streaming state machine
///
/// Event ordering guarantees:
/// - text deltas are always bracketed by `TextStart`/`TextEnd`
/// - a fence entry closes any open text span before tool events begin
/// - `ToolInputStart` waits until the tool name is known
/// - argument deltas carry only new characters
/// - exactly one `Finish` is emitted, last, on every path
pub struct StreamDriver {
    scanner: FenceScanner,
    /// Fence scanning only applies in free-text mode with tools offered;
    /// strict-JSON output is the payload itself and is never scanned.
    scanning: bool,
    text_block: Option<String>,
    text_counter: usize,
    candidate: Option<ToolCallCandidate>,
    resolved: Vec<ToolCall>,
    fence_seen: bool,
    aborted: bool,
    finished: bool,
}

impl StreamDriver {
    pub fn new(options: &GenerateOptions, tools_offered: bool) -> Self {
        Self {
            scanner: FenceScanner::new(),
            scanning: tools_offered && options.response_format == ResponseFormat::Text,
            text_block: None,
            text_counter: 0,
            candidate: None,
            resolved: Vec::new(),
            fence_seen: false,
            aborted: false,
            finished: false,
        }
    }

    /// Calls resolved so far, in stream order
    pub fn resolved_calls(&self) -> &[ToolCall] {
        &self.resolved
    }

    /// Mark the generation as aborted; the finish reason becomes `Other`
    /// unless a tool call was already resolved.
    pub fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    /// Emit the stream-start event
    pub fn start(&mut self, warnings: Vec<String>, emit: &mut dyn FnMut(StreamEvent)) {
        emit(StreamEvent::StreamStart { warnings });
    }

    /// Feed one fragment of model output
    pub fn push_fragment(&mut self, fragment: &str, emit: &mut dyn FnMut(StreamEvent)) {
        if self.finished || fragment.is_empty() {
            return;
        }
        // After the single payload fence has closed, everything is plain
        // text; so is everything in pass-through mode.
        if !self.scanning || self.fence_seen {
            self.emit_text(fragment, emit);
            return;
        }
        self.scanner.add_chunk(fragment);
        let scan = self.scanner.detect();

        let had_candidate = self.candidate.is_some();
        if had_candidate && !scan.in_fence && scan.complete_fence.is_none() {
            // Runaway guard abandoned the fence; its content comes back
            // through safe_content below.
            self.abandon_candidate(emit);
        }
        if let Some(safe) = &scan.safe_content {
            self.emit_text(safe, emit);
        }
        if scan.in_fence {
            if self.candidate.is_none() {
                self.close_text_block(emit);
                self.candidate = Some(ToolCallCandidate::new());
            }
            self.update_candidate(emit);
        } else if let Some(fence) = scan.complete_fence {
            if self.candidate.is_none() {
                self.close_text_block(emit);
                self.candidate = Some(ToolCallCandidate::new());
            }
            self.resolve_fence(&fence, true, emit);
        }
        if let Some(after) = &scan.text_after_fence {
            self.emit_text(after, emit);
        }
    }

    /// Upstream completion: flush everything held back, close open spans,
    /// and emit the single terminal finish event.
    pub fn finish(&mut self, usage: TokenUsage, emit: &mut dyn FnMut(StreamEvent)) {
        if self.finished {
            return;
        }

        if self.scanning && !self.fence_seen {
            let fin = self.scanner.finish();
            if let Some(safe) = &fin.safe_content {
                self.emit_text(safe, emit);
            }
            if let Some(fence) = fin.complete_fence {
                if self.candidate.is_none() {
                    self.close_text_block(emit);
                    self.candidate = Some(ToolCallCandidate::new());
                }
                self.resolve_fence(&fence, true, emit);
            } else if let Some(body) = fin.unclosed_fence {
                // The model stopped without closing the fence; salvage what
                // arrived before giving up on it.
                if self.candidate.is_none() {
                    self.close_text_block(emit);
                    self.candidate = Some(ToolCallCandidate::new());
                }
                self.resolve_fence(&body, false, emit);
            }
            if let Some(after) = &fin.text_after_fence {
                self.emit_text(after, emit);
            }
        }

        self.close_text_block(emit);

        let reason = if !self.resolved.is_empty() {
            FinishReason::ToolCalls
        } else if self.aborted {
            FinishReason::Other
        } else {
            FinishReason::Stop
        };
        emit(StreamEvent::Finish { reason, usage });
        self.finished = true;
    }

    fn update_candidate(&mut self, emit: &mut dyn FnMut(StreamEvent)) {
        let content = self.scanner.fence_content().to_string();
        if let Some(cand) = self.candidate.as_mut() {
            for event in cand.update(&content) {
                emit(event);
            }
        }
    }

    /// A fence closed (or was salvaged at end of input): stream the final
    /// argument suffix, then either the terminal tool-call events or the
    /// plain-text fallback for payloads no repair could fix.
    fn resolve_fence(&mut self, body: &str, closed: bool, emit: &mut dyn FnMut(StreamEvent)) {
        let mut cand = match self.candidate.take() {
            Some(c) => c,
            None => return,
        };
        self.fence_seen = true;

        let parsed = parse_tool_calls(body);
        match parsed.tool_calls.into_iter().next() {
            Some(call) => {
                if !cand.started {
                    // Name was not recoverable incrementally (unusual
                    // spacing); announce it now that parsing pinned it.
                    cand.started = true;
                    emit(StreamEvent::ToolInputStart {
                        id: cand.id.clone(),
                        tool_name: call.name.clone(),
                    });
                }
                for event in cand.update(body) {
                    emit(event);
                }
                emit(StreamEvent::ToolInputEnd {
                    id: cand.id.clone(),
                });
                let arguments = serde_json::to_string(&call.arguments)
                    .unwrap_or_else(|_| "{}".to_string());
                emit(StreamEvent::ToolCall {
                    id: cand.id.clone(),
                    tool_name: call.name.clone(),
                    arguments,
                });
                self.resolved.push(ToolCall {
                    id: cand.id,
                    name: call.name,
                    arguments: call.arguments,
                });
            }
            None => {
                warn!("fenced payload failed to parse, falling back to plain text");
                if cand.started {
                    emit(StreamEvent::ToolInputEnd {
                        id: cand.id.clone(),
                    });
                }
                let mut block =
                    String::with_capacity(TOOL_CALL_FENCE_OPEN.len() + body.len() + 8);
                block.push_str(TOOL_CALL_FENCE_OPEN);
                block.push('\n');
                block.push_str(body);
                if closed {
                    block.push_str("\n```");
                }
                self.emit_text(&block, emit);
            }
        }
    }

    fn abandon_candidate(&mut self, emit: &mut dyn FnMut(StreamEvent)) {
        if let Some(cand) = self.candidate.take() {
            if cand.started {
                emit(StreamEvent::ToolInputEnd { id: cand.id });
            }
        }
    }

    fn emit_text(&mut self, text: &str, emit: &mut dyn FnMut(StreamEvent)) {
        if text.is_empty() {
            return;
        }
        let id = match &self.text_block {
            Some(id) => id.clone(),
            None => {
                let id = format!("txt_{}", self.text_counter);
                self.text_counter += 1;
                self.text_block = Some(id.clone());
                emit(StreamEvent::TextStart { id: id.clone() });
                id
            }
        };
        emit(StreamEvent::TextDelta {
            id,
            text: text.to_string(),
        });
    }

    fn close_text_block(&mut self, emit: &mut dyn FnMut(StreamEvent)) {
        if let Some(id) = self.text_block.take() {
            emit(StreamEvent::TextEnd { id });
        }
    }
}
