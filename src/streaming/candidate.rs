//! Per-tool-call streaming state
//!
//! While a fence is open, one candidate tracks what has already been
//! announced for the call: whether its start event went out, and how many
//! argument characters have been flushed, so each update emits only the new
//! suffix and never re-streams emitted characters.

use crate::parser::{extract_arguments_content, extract_tool_name, new_call_id};
use crate::types::StreamEvent;

/// In-progress tool call owned by the streaming driver
///
/// Created when a fence opens, dropped once its terminal events are
/// emitted. The id is allocated up front; the start event waits until the
/// tool name is recoverable from the partial payload.
#[derive(Debug)]
pub struct ToolCallCandidate {
    pub id: String,
    pub tool_name: Option<String>,
    /// Whether `ToolInputStart` has been emitted
    pub started: bool,
    /// Argument characters already flushed as input deltas
    pub streamed_args_len: usize,
}

impl ToolCallCandidate {
    pub fn new() -> Self {
        Self {
            id: new_call_id(),
            tool_name: None,
            started: false,
            streamed_args_len: 0,
        }
    }

    /// Re-scan the accumulated fence content and return the events it
    /// newly justifies: a start once the name is known, then argument
    /// deltas for growth beyond what was already streamed.
    pub fn update(&mut self, content: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            if let Some(name) = extract_tool_name(content) {
                self.tool_name = Some(name.clone());
                self.started = true;
                events.push(StreamEvent::ToolInputStart {
                    id: self.id.clone(),
                    tool_name: name,
                });
            }
        }

        if self.started {
            if let Some(args) = extract_arguments_content(content) {
                if args.len() > self.streamed_args_len {
                    let delta = args[self.streamed_args_len..].to_string();
                    self.streamed_args_len = args.len();
                    events.push(StreamEvent::ToolInputDelta {
                        id: self.id.clone(),
                        text: delta,
                    });
                }
            }
        }

        events
    }
}

impl Default for ToolCallCandidate {
    fn default() -> Self {
        Self::new()
    }
}
