//! Typed errors for generation calls
//!
//! Parsing-layer problems never appear here: a payload that fails every
//! repair heuristic degrades to plain text locally. Only backend and input
//! errors propagate to the caller.

use thiserror::Error;

/// Generation errors with typed variants
///
/// Enables callers to distinguish failure modes:
/// - `BackendUnavailable` - required runtime/hardware capability missing; fatal, not retried
/// - `UnsupportedContent` - input the backend cannot represent; fails before generation
/// - `Generation` - the underlying model call failed mid-flight
/// - `Other` - catch-all wrapping `anyhow::Error`
///
/// Cancellation is deliberately absent: an interrupted stream is not an
/// error, it finishes with [`crate::FinishReason::Other`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// The backend capability is missing (e.g. no GPU runtime, model API
    /// not exposed). Reported immediately; retrying cannot help.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The message adapter cannot express this content in backend format
    /// (e.g. binary attachments on a text-only session).
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// The underlying model call threw or rejected. Wrapped with context;
    /// retry policy, if any, belongs to the caller.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Other errors not fitting the above categories
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LlmError {
    /// Whether the call could conceivably succeed if retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Generation(_) | LlmError::Other(_))
    }

    /// Whether the error was raised before any generation was attempted
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            LlmError::BackendUnavailable(_) | LlmError::UnsupportedContent(_)
        )
    }
}
