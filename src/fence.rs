//! Incremental fence detection for tool-call blocks
//!
//! Model output in free-text mode may contain at most one tool-call payload,
//! wrapped in a fenced block:
//!
//! ````text
//! Let me check the weather.
//! ```tool_call
//! {"name": "get_weather", "arguments": {"city": "SF"}}
//! ```
//! ````
//!
//! The scanner consumes arbitrarily fragmented text and classifies it into
//! safe (publishable) spans and fenced payload content, holding back only as
//! much text as could still turn out to be a delimiter. Markers are
//! recognized at line starts only, never as substrings at arbitrary
//! positions. Held-back text that never completes a delimiter is flushed as
//! plain text, not assumed to be a tool call.

use tracing::warn;

/// Opening delimiter line for a tool-call block
pub const TOOL_CALL_FENCE_OPEN: &str = "```tool_call";
/// Closing delimiter line (bare fence marker)
pub const FENCE_CLOSE: &str = "```";

/// An open fence that never closes is abandoned past this size and its
/// content re-emitted as plain text. Real payloads are one small JSON
/// object; anything this large is a runaway generation.
const MAX_FENCE_BYTES: usize = 64 * 1024;

/// Result of one classification pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FenceScan {
    /// Text that is definitely not part of a delimiter or payload
    pub safe_content: Option<String>,
    /// Whether the scanner is inside an open fence after this pass
    pub in_fence: bool,
    /// Body of a fence that closed during this pass (delimiters excluded)
    pub complete_fence: Option<String>,
    /// Text after the closing delimiter in the same buffer; always plain
    /// text, since a payload occupies at most one fence
    pub text_after_fence: Option<String>,
}

/// End-of-input classification
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FenceFinish {
    /// Remaining text flushed as plain text (held-back partial prefixes
    /// included)
    pub safe_content: Option<String>,
    /// Fence body if the input ended on a valid closing line
    pub complete_fence: Option<String>,
    /// Accumulated content of a fence that was opened but never closed
    pub unclosed_fence: Option<String>,
    /// Plain text after a fence closed in this final pass
    pub text_after_fence: Option<String>,
}

enum MarkerMatch {
    /// Marker line found; `content_start` is past the marker's newline
    Found {
        marker_start: usize,
        content_start: usize,
    },
    /// Buffer ends mid-marker; hold from `marker_start`
    Partial { marker_start: usize },
    None,
}

/// Incremental classifier for tool-call fences
///
/// One scanner per generation call. The buffer never contains text that has
/// already been returned as safe content.
#[derive(Debug)]
pub struct FenceScanner {
    buffer: String,
    inside_fence: bool,
    fence_content: String,
    /// Whether the start of `buffer` sits at a line start
    at_line_start: bool,
    /// Line ending of the opening marker line, reused when an abandoned
    /// fence is flushed back as text
    open_line_ending: &'static str,
}

impl Default for FenceScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceScanner {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            inside_fence: false,
            fence_content: String::new(),
            at_line_start: true,
            open_line_ending: "\n",
        }
    }

    /// Append newly arrived text. No classification happens here.
    pub fn add_chunk(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Whether unclassified buffer remains
    pub fn has_content(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Accumulated content of the currently open fence
    pub fn fence_content(&self) -> &str {
        &self.fence_content
    }

    /// Unclassified buffer (for forced flush at stream end)
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Classify as much of the buffer as possible
    pub fn detect(&mut self) -> FenceScan {
        let mut scan = FenceScan::default();

        if !self.inside_fence {
            match self.find_open_marker() {
                MarkerMatch::Found {
                    marker_start,
                    content_start,
                } => {
                    if marker_start > 0 {
                        scan.safe_content = Some(self.buffer[..marker_start].to_string());
                    }
                    let nl = content_start - marker_start - TOOL_CALL_FENCE_OPEN.len();
                    self.open_line_ending = if nl == 2 { "\r\n" } else { "\n" };
                    self.buffer.drain(..content_start);
                    self.inside_fence = true;
                    self.fence_content.clear();
                    self.at_line_start = true;
                }
                MarkerMatch::Partial { marker_start } => {
                    // Hold the possible delimiter prefix; bounded by the
                    // marker length.
                    if marker_start > 0 {
                        scan.safe_content = Some(self.drain_safe(marker_start));
                    }
                    return scan;
                }
                MarkerMatch::None => {
                    if !self.buffer.is_empty() {
                        let len = self.buffer.len();
                        scan.safe_content = Some(self.drain_safe(len));
                    }
                    return scan;
                }
            }
        }

        if self.inside_fence {
            match self.find_close_marker() {
                MarkerMatch::Found {
                    marker_start,
                    content_start,
                } => {
                    self.fence_content.push_str(&self.buffer[..marker_start]);
                    let after = self.buffer[content_start..].to_string();
                    self.buffer.clear();
                    self.at_line_start = true;
                    self.inside_fence = false;
                    scan.complete_fence = Some(take_fence_body(&mut self.fence_content));
                    if !after.is_empty() {
                        self.at_line_start = after.ends_with('\n');
                        scan.text_after_fence = Some(after);
                    }
                }
                MarkerMatch::Partial { marker_start } => {
                    // Possible partial close line; hold it, accumulate the
                    // rest as fence content.
                    self.fence_content.push_str(&self.buffer[..marker_start]);
                    self.buffer.drain(..marker_start);
                    self.at_line_start = true;
                    self.check_runaway(&mut scan);
                }
                MarkerMatch::None => {
                    if let Some(last) = self.buffer.chars().last() {
                        self.at_line_start = last == '\n';
                    }
                    self.fence_content.push_str(&self.buffer);
                    self.buffer.clear();
                    self.check_runaway(&mut scan);
                }
            }
        }

        scan.in_fence = self.inside_fence;
        scan
    }

    /// Final classification at end of input
    ///
    /// End of input acts as the line terminator for a bare closing marker,
    /// so a stream ending right after the closing backticks still closes
    /// its fence. A fence that never closed is surfaced as `unclosed_fence`
    /// for the caller to salvage; everything else is flushed as plain text.
    pub fn finish(&mut self) -> FenceFinish {
        let scan = self.detect();
        let mut fin = FenceFinish {
            safe_content: scan.safe_content,
            complete_fence: scan.complete_fence,
            unclosed_fence: None,
            text_after_fence: scan.text_after_fence,
        };

        if self.inside_fence {
            // Buffer holds at most a partial close line.
            let tail = std::mem::take(&mut self.buffer);
            let mut full = std::mem::take(&mut self.fence_content);
            full.push_str(&tail);
            self.inside_fence = false;
            match strip_trailing_close_line(&full) {
                Some(body) => fin.complete_fence = Some(body.to_string()),
                None => fin.unclosed_fence = Some(full),
            }
        } else if !self.buffer.is_empty() {
            // Held-back partial open marker that never completed: plain text.
            let rest = std::mem::take(&mut self.buffer);
            match &mut fin.safe_content {
                Some(safe) => safe.push_str(&rest),
                None => fin.safe_content = Some(rest),
            }
        }
        self.at_line_start = true;
        fin
    }

    fn drain_safe(&mut self, len: usize) -> String {
        let drained: String = self.buffer.drain(..len).collect();
        self.at_line_start = drained.ends_with('\n');
        drained
    }

    /// Candidate line-start offsets within the buffer
    fn line_starts(&self) -> impl Iterator<Item = usize> + '_ {
        let first = if self.at_line_start { Some(0) } else { None };
        first
            .into_iter()
            .chain(self.buffer.match_indices('\n').map(|(i, _)| i + 1))
    }

    fn find_open_marker(&self) -> MarkerMatch {
        self.find_marker_line(TOOL_CALL_FENCE_OPEN)
    }

    fn find_close_marker(&self) -> MarkerMatch {
        self.find_marker_line(FENCE_CLOSE)
    }

    /// Locate `marker` as a full line: at a line start, followed by a line
    /// ending. A line that merely begins with the marker (e.g.
    /// ` ```tool_calls `) does not match.
    fn find_marker_line(&self, marker: &str) -> MarkerMatch {
        for p in self.line_starts() {
            let rest = &self.buffer[p..];
            if rest.is_empty() {
                continue;
            }
            if let Some(tail) = rest.strip_prefix(marker) {
                if tail.is_empty() || tail == "\r" {
                    // Cannot tell yet whether the line ends here.
                    return MarkerMatch::Partial { marker_start: p };
                }
                if let Some(nl) = line_ending_len(tail) {
                    return MarkerMatch::Found {
                        marker_start: p,
                        content_start: p + marker.len() + nl,
                    };
                }
                // Marker is a prefix of a longer line; not a delimiter.
                continue;
            }
            if marker.starts_with(rest) {
                // Buffer ends inside a possible marker.
                return MarkerMatch::Partial { marker_start: p };
            }
        }
        MarkerMatch::None
    }

    fn check_runaway(&mut self, scan: &mut FenceScan) {
        if self.fence_content.len() <= MAX_FENCE_BYTES {
            return;
        }
        warn!(
            bytes = self.fence_content.len(),
            "unclosed tool_call fence exceeded size limit, flushing as text"
        );
        let mut flushed = String::with_capacity(
            TOOL_CALL_FENCE_OPEN.len() + self.open_line_ending.len() + self.fence_content.len(),
        );
        flushed.push_str(TOOL_CALL_FENCE_OPEN);
        flushed.push_str(self.open_line_ending);
        flushed.push_str(&self.fence_content);
        self.fence_content.clear();
        self.inside_fence = false;
        match &mut scan.safe_content {
            Some(safe) => safe.push_str(&flushed),
            None => scan.safe_content = Some(flushed),
        }
    }
}

fn line_ending_len(s: &str) -> Option<usize> {
    if s.starts_with("\r\n") {
        Some(2)
    } else if s.starts_with('\n') {
        Some(1)
    } else {
        None
    }
}

/// Fence body excludes the line ending before the closing marker
fn take_fence_body(content: &mut String) -> String {
    let mut body = std::mem::take(content);
    if body.ends_with("\r\n") {
        body.truncate(body.len() - 2);
    } else if body.ends_with('\n') {
        body.truncate(body.len() - 1);
    }
    body
}

/// If `content` ends with a bare closing line terminated by end of input,
/// return the body before it.
fn strip_trailing_close_line(content: &str) -> Option<&str> {
    let trimmed = content.strip_suffix('\r').unwrap_or(content);
    if trimmed == FENCE_CLOSE {
        return Some("");
    }
    let body = trimmed.strip_suffix(FENCE_CLOSE)?;
    let body = body.strip_suffix("\r\n").or_else(|| body.strip_suffix('\n'))?;
    Some(body)
}
