//! Backend session contracts
//!
//! The polyfill treats backend engines as opaque services: create a
//! session, generate once, generate as a stream of text fragments,
//! interrupt. Anything engine-specific (model download, capability
//! probing, hardware setup) lives behind these traits.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::LlmError;
use crate::types::TokenUsage;

/// Fragment stream produced by a streaming generation
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Role-tagged message in backend-native form
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BackendMessage {
    pub role: String,
    pub content: String,
}

impl BackendMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Settings applied when creating a session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// A stateful handle to a loaded model instance
///
/// Sessions allow at most one in-flight generation; callers serialize
/// access (the provider holds the session behind a mutex for the duration
/// of each call).
#[async_trait]
pub trait TextSession: Send + Sync {
    /// Generate a complete response for the conversation
    async fn generate_once(&mut self, messages: &[BackendMessage]) -> Result<String, LlmError>;

    /// Generate a response as a stream of text fragments
    async fn generate_streaming(
        &mut self,
        messages: &[BackendMessage],
    ) -> Result<FragmentStream, LlmError>;

    /// Ask the backend to stop the in-flight generation
    fn interrupt(&mut self);

    /// Token accounting for the most recent generation, if the backend
    /// reports it. The provider falls back to a length estimate otherwise.
    fn last_usage(&self) -> Option<TokenUsage> {
        None
    }
}

/// Creates sessions for one backend engine
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: TextSession;

    /// Probe whether the backend is usable at all (runtime present,
    /// hardware available). Failing here is fatal for the call.
    async fn availability(&self) -> Result<(), LlmError> {
        Ok(())
    }

    async fn create(&self, config: &SessionConfig) -> Result<Self::Session, LlmError>;
}
