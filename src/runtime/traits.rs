//! Trait abstractions for surface I/O
//!
//! These traits enable testing the relay loop with mock implementations.

use crate::state_machine::Role;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Cheap structural fingerprint of a rendered surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSnapshot {
    pub rendered_length: usize,
    pub element_count: usize,
}

impl SurfaceSnapshot {
    #[must_use]
    pub fn new(rendered_length: usize, element_count: usize) -> Self {
        Self {
            rendered_length,
            element_count,
        }
    }

    /// Anything at all arrived since `before`
    #[must_use]
    pub fn differs_from(&self, before: &SurfaceSnapshot) -> bool {
        self.rendered_length != before.rendered_length
            || self.element_count > before.element_count
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Surface operation failed: {0}")]
    Operation(String),
}

/// Read/mutate access to one participant's rendered surface
#[async_trait]
pub trait SurfaceProbe: Send + Sync {
    /// Whether the input affordance became interactable within `timeout`
    async fn is_ready(&self, timeout: Duration) -> Result<bool, ProbeError>;

    async fn snapshot(&self) -> Result<SurfaceSnapshot, ProbeError>;

    /// Commit a message. Returns once the submitted text is visible as a
    /// new element, or fails.
    async fn submit(&self, text: &str) -> Result<(), ProbeError>;

    /// Number of active "still producing output" indicators
    async fn busy_indicators(&self) -> Result<usize, ProbeError>;

    /// Raw text of the most recent message element, `None` if there is none
    async fn read_latest(&self) -> Result<Option<String>, ProbeError>;

    /// Best-effort focus hint
    async fn bring_to_foreground(&self);
}

#[async_trait]
impl<T: SurfaceProbe + ?Sized> SurfaceProbe for Arc<T> {
    async fn is_ready(&self, timeout: Duration) -> Result<bool, ProbeError> {
        (**self).is_ready(timeout).await
    }

    async fn snapshot(&self) -> Result<SurfaceSnapshot, ProbeError> {
        (**self).snapshot().await
    }

    async fn submit(&self, text: &str) -> Result<(), ProbeError> {
        (**self).submit(text).await
    }

    async fn busy_indicators(&self) -> Result<usize, ProbeError> {
        (**self).busy_indicators().await
    }

    async fn read_latest(&self) -> Result<Option<String>, ProbeError> {
        (**self).read_latest().await
    }

    async fn bring_to_foreground(&self) {
        (**self).bring_to_foreground().await;
    }
}

/// A role bound to its surface. Owned by the relay loop for a whole run.
pub struct Participant {
    pub role: Role,
    pub probe: Arc<dyn SurfaceProbe>,
}

impl Participant {
    #[must_use]
    pub fn new(role: impl Into<Role>, probe: Arc<dyn SurfaceProbe>) -> Self {
        Self {
            role: role.into(),
            probe,
        }
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
