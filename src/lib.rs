//! edge-llm: uniform chat interface over on-device LLM backends
//!
//! This library provides:
//! - A provider trait exposing chat completion (one-shot and streaming) over
//!   opaque local model sessions
//! - A tool-calling polyfill for backends without native tool support:
//!   tools are described in the prompt and invocations are recovered from a
//!   fenced `tool_call` block in the model output
//! - An incremental fence scanner and payload parser that stream tool-call
//!   arguments in real time as the model emits them
//! - A lazily-initialized shared engine handle for backends with one global
//!   model instance

pub mod convert;
pub mod engine;
mod error;
pub mod fence;
pub mod parser;
mod provider;
pub mod session;
pub mod streaming;
mod types;

pub use error::LlmError;
pub use provider::{LlmProvider, PolyfillProvider};
pub use session::{BackendMessage, SessionConfig, SessionFactory, TextSession};
pub use types::*;
