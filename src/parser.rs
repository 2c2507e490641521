//! Tool-call payload parsing
//!
//! Recovers `{"name": ..., "arguments": {...}}` payloads (or arrays of
//! them) from model output. Local models get the payload shape wrong often
//! enough that strict parsing alone loses real calls, so parsing runs a
//! strict attempt first and then a fixed sequence of textual repairs. When
//! everything fails the text degrades to plain text with zero tool calls;
//! this layer never errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::fence::{FENCE_CLOSE, TOOL_CALL_FENCE_OPEN};
use crate::types::ToolCall;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""name"\s*:\s*"([^"]*)""#).unwrap());
static ARGS_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:arguments|input)"\s*:\s*"#).unwrap());
static ADJACENT_OBJECTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\}\s*\{").unwrap());

/// Result of parsing one generation (or one fence body)
#[derive(Debug, Default, Clone)]
pub struct ParsedOutput {
    /// All recovered calls; callers surface only the first
    pub tool_calls: Vec<ToolCall>,
    /// Free text surrounding the payload block. When no call is recovered
    /// this is the entire input unchanged.
    pub text_content: String,
}

/// Generate a fresh tool call id
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Parse tool calls out of a complete response text
///
/// Accepts the full text of a generation or a closed fence's body.
/// Tolerates a payload wrapped in a `tool_call` or generic markdown fence,
/// free text around the block, stringified argument objects, stray trailing
/// braces, and missing commas between array elements.
pub fn parse_tool_calls(text: &str) -> ParsedOutput {
    for (leading, candidate, trailing) in payload_candidates(text) {
        let calls = parse_payload(candidate);
        if !calls.is_empty() {
            if calls.len() > 1 {
                debug!(
                    count = calls.len(),
                    "multiple tool calls in one payload; callers keep the first"
                );
            }
            let mut text_content = String::with_capacity(leading.len() + trailing.len());
            text_content.push_str(leading);
            text_content.push_str(trailing);
            return ParsedOutput {
                tool_calls: calls,
                text_content,
            };
        }
    }

    ParsedOutput {
        tool_calls: Vec::new(),
        text_content: text.to_string(),
    }
}

/// Candidate payload slices, most specific first: the tool_call fence, a
/// generic markdown fence, the whole trimmed text, then the outermost
/// brace-delimited span.
fn payload_candidates(text: &str) -> Vec<(&str, &str, &str)> {
    let mut out = Vec::new();

    if let Some((lead, body, trail)) = split_fenced(text, TOOL_CALL_FENCE_OPEN) {
        out.push((lead, body, trail));
    }
    if let Some((lead, body, trail)) = split_fenced(text, "```json") {
        out.push((lead, body, trail));
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        out.push(("", trimmed, ""));
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push((&text[..start], &text[start..=end], &text[end + 1..]));
        }
    }

    out
}

/// Split `text` around a fenced block opened by `open_marker`. The opening
/// marker must sit on its own line; the block runs to the bare closing
/// marker line, or to the end of input when the model never closed it.
fn split_fenced<'a>(text: &'a str, open_marker: &str) -> Option<(&'a str, &'a str, &'a str)> {
    let (open_at, body_start) = find_marker_line(text, 0, open_marker)?;
    let leading = &text[..open_at];
    let rest = &text[body_start..];
    match find_marker_line(text, body_start, FENCE_CLOSE) {
        Some((close_at, after)) => {
            let body = text[body_start..close_at].trim_end_matches(['\r', '\n']);
            Some((leading, body, &text[after..]))
        }
        None => Some((leading, rest, "")),
    }
}

/// Find `marker` as a full line at or after `from`. Returns the marker's
/// start offset and the offset just past its line ending (or end of text).
fn find_marker_line(text: &str, from: usize, marker: &str) -> Option<(usize, usize)> {
    let mut pos = from;
    while pos <= text.len() {
        let at_line_start = pos == 0 || text.as_bytes()[pos - 1] == b'\n';
        if at_line_start {
            let rest = &text[pos..];
            if let Some(tail) = rest.strip_prefix(marker) {
                let tail = tail.strip_prefix('\r').unwrap_or(tail);
                if tail.is_empty() {
                    return Some((pos, text.len()));
                }
                if let Some(t) = tail.strip_prefix('\n') {
                    return Some((pos, text.len() - t.len()));
                }
            }
        }
        match text[pos..].find('\n') {
            Some(nl) => pos = pos + nl + 1,
            None => break,
        }
    }
    None
}

/// Parse a candidate payload, applying repairs in a fixed order
fn parse_payload(candidate: &str) -> Vec<ToolCall> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return Vec::new();
    }

    if let Some(calls) = try_parse(candidate) {
        return calls;
    }
    for repaired in repair_candidates(candidate) {
        if let Some(calls) = try_parse(&repaired) {
            debug!("tool call payload parsed after textual repair");
            return calls;
        }
    }
    Vec::new()
}

/// Ordered textual repairs: strip stray trailing braces, then insert
/// missing commas between adjacent objects (wrapping in array brackets
/// when the result is a bare object sequence).
fn repair_candidates(s: &str) -> Vec<String> {
    let mut out = Vec::new();

    let mut t = s;
    for _ in 0..3 {
        match t.strip_suffix('}') {
            Some(rest) if rest.ends_with('}') => {
                t = rest.trim_end();
                out.push(t.to_string());
            }
            _ => break,
        }
    }

    if ADJACENT_OBJECTS_RE.is_match(s) {
        let joined = ADJACENT_OBJECTS_RE.replace_all(s, "},{").into_owned();
        if joined.starts_with('{') {
            out.push(format!("[{joined}]"));
        }
        out.push(joined);
    }

    out
}

fn try_parse(s: &str) -> Option<Vec<ToolCall>> {
    let value: Value = serde_json::from_str(s).ok()?;
    let calls = value_to_tool_calls(&value);
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

fn value_to_tool_calls(value: &Value) -> Vec<ToolCall> {
    match value {
        Value::Array(items) => items.iter().flat_map(value_to_tool_calls).collect(),
        Value::Object(_) => value_to_tool_call(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn value_to_tool_call(value: &Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments").or_else(|| value.get("input")) {
        // Some models stringify the argument object
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(v) => v.clone(),
        None => Value::Object(serde_json::Map::new()),
    };
    Some(ToolCall {
        id: new_call_id(),
        name,
        arguments,
    })
}

/// Recover the tool name from a partially accumulated payload
///
/// Succeeds as soon as the `"name"` field has fully arrived, which lets the
/// streaming driver announce the tool before the arguments finish.
pub fn extract_tool_name(partial: &str) -> Option<String> {
    NAME_RE
        .captures(partial)
        .map(|c| c.get(1).unwrap().as_str().to_string())
}

/// Extract the argument object's substring from a partially accumulated
/// payload as it grows
///
/// Locates the `"arguments"` (or `"input"`) key, then tracks brace/bracket
/// depth with string-and-escape awareness, so argument values containing
/// `{`, `}` or escaped quotes inside strings do not confuse the span. While
/// the value is incomplete the whole tail is returned; once balanced, the
/// exact value substring is returned and further input no longer changes it.
pub fn extract_arguments_content(partial: &str) -> Option<&str> {
    let key = ARGS_KEY_RE.find(partial)?;
    let rest = &partial[key.end()..];
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=i]);
                }
            }
            _ => {}
        }
    }
    Some(rest)
}
