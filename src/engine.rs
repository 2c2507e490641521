//! Shared engine handle
//!
//! Backends with one global model instance (a loaded runtime reused across
//! calls) are modeled as an explicitly owned, lazily-initialized resource.
//! The first call initializes the session; concurrent first calls share the
//! single pending initialization instead of double-initializing. The handle
//! re-initializes only after an explicit teardown.

use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::LlmError;
use crate::session::{SessionConfig, SessionFactory};

pub struct EngineHandle<F: SessionFactory> {
    factory: F,
    config: SessionConfig,
    cell: OnceCell<Arc<Mutex<F::Session>>>,
}

impl<F: SessionFactory> EngineHandle<F> {
    pub fn new(factory: F, config: SessionConfig) -> Self {
        Self {
            factory,
            config,
            cell: OnceCell::new(),
        }
    }

    /// Get the shared session, initializing it on first use
    ///
    /// The availability probe runs before session creation so a missing
    /// backend surfaces as `BackendUnavailable` rather than a create error.
    pub async fn session(&self) -> Result<Arc<Mutex<F::Session>>, LlmError> {
        let session = self
            .cell
            .get_or_try_init(|| async {
                self.factory.availability().await?;
                debug!("initializing backend session");
                let session = self.factory.create(&self.config).await?;
                Ok::<_, LlmError>(Arc::new(Mutex::new(session)))
            })
            .await?;
        Ok(Arc::clone(session))
    }

    /// Whether a session has been initialized
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Drop the session; the next call re-initializes
    pub fn teardown(&mut self) {
        if self.cell.take().is_some() {
            debug!("backend session torn down");
        }
    }
}
