//! Message conversion for plain-text backends
//!
//! Backends behind [`TextSession`](crate::session::TextSession) accept flat
//! role/text pairs. Structured history (tool-use parts, tool results) is
//! rendered back into the textual convention the model was prompted with, so
//! a multi-turn tool conversation round-trips through the backend unchanged.

use std::fmt::Write as _;

use crate::error::LlmError;
use crate::fence::{FENCE_CLOSE, TOOL_CALL_FENCE_OPEN};
use crate::session::BackendMessage;
use crate::types::{ContentPart, Message, MessageContent, Role, ToolDefinition};

/// Flatten structured messages into backend role/text pairs.
///
/// Tool-result messages have no native role on text backends; they are
/// mapped to `user` with a wrapper identifying the originating call. File
/// parts are rejected up front rather than silently dropped.
pub fn to_backend_messages(messages: &[Message]) -> Result<Vec<BackendMessage>, LlmError> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "user",
        };
        let mut text = render_content(&message.content)?;
        if message.role == Role::Tool {
            if let Some(id) = &message.tool_call_id {
                text = format!("Result of tool call {}:\n{}", id, text);
            }
        }
        out.push(BackendMessage::new(role, text));
    }
    Ok(out)
}

fn render_content(content: &MessageContent) -> Result<String, LlmError> {
    match content {
        MessageContent::Text(text) => Ok(text.clone()),
        MessageContent::Parts(parts) => {
            let mut text = String::new();
            for part in parts {
                if !text.is_empty() {
                    text.push('\n');
                }
                match part {
                    ContentPart::Text { text: t } => text.push_str(t),
                    ContentPart::ToolUse { name, input, .. } => {
                        // Re-render the call in the same fenced form the
                        // model originally produced it in.
                        let args = serde_json::to_string_pretty(input)
                            .unwrap_or_else(|_| "{}".to_string());
                        let _ = write!(
                            text,
                            "{}\n{{\"name\": \"{}\", \"arguments\": {}}}\n{}",
                            TOOL_CALL_FENCE_OPEN, name, args, FENCE_CLOSE
                        );
                    }
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                    } => {
                        let _ =
                            write!(text, "Result of tool call {}:\n{}", tool_use_id, content);
                    }
                    ContentPart::File { media_type, .. } => {
                        return Err(LlmError::UnsupportedContent(format!(
                            "file attachments ({}) are not supported by text-only backends",
                            media_type
                        )));
                    }
                }
            }
            Ok(text)
        }
    }
}

/// Build the system-prompt section teaching the model the fenced tool-call
/// convention for the given tools.
pub fn tool_instructions(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(
        "You have access to the following tools. To call a tool, respond with \
         a fenced code block using the `tool_call` language tag, containing a \
         JSON object with the tool name and arguments:\n\n\
         ```tool_call\n\
         {\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n\
         ```\n\n\
         Call at most one tool per turn. If no tool is needed, reply with \
         plain text.\n\nAvailable tools:\n",
    );
    for tool in tools {
        let schema = serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "{}".to_string());
        let _ = write!(
            out,
            "\n- {}: {}\n  Parameters schema: {}",
            tool.name, tool.description, schema
        );
    }
    out
}
