//! Relay error taxonomy
//!
//! Every failure the relay can raise carries a [`FailureKind`]. Only setup
//! failures are fatal; everything else is a turn failure counted by the
//! resilience supervisor.

use crate::state_machine::Role;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which completion-wait stage timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStage {
    Arrival,
    Busy,
    Quiescence,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitStage::Arrival => "arrival",
            WaitStage::Busy => "busy-signal",
            WaitStage::Quiescence => "quiescence",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("{role} surface not ready after {waited:?}")]
    ReadinessTimeout { role: Role, waited: Duration },

    #[error("Submission to {role} failed: {reason}")]
    Submission { role: Role, reason: String },

    #[error("{role} produced no reply: {stage} wait expired after {waited:?}")]
    CompletionTimeout {
        role: Role,
        stage: WaitStage,
        waited: Duration,
    },

    #[error("Could not extract reply from {role}: {reason}")]
    Extraction { role: Role, reason: String },
}

impl RelayError {
    #[must_use]
    pub fn setup(message: impl Into<String>) -> Self {
        RelayError::Setup(message.into())
    }

    #[must_use]
    pub fn submission(role: &Role, reason: impl Into<String>) -> Self {
        RelayError::Submission {
            role: role.clone(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn extraction(role: &Role, reason: impl Into<String>) -> Self {
        RelayError::Extraction {
            role: role.clone(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            RelayError::Setup(_) => FailureKind::Setup,
            RelayError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            RelayError::Submission { .. } => FailureKind::Submission,
            RelayError::CompletionTimeout { .. } => FailureKind::CompletionTimeout,
            RelayError::Extraction { .. } => FailureKind::Extraction,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Error classification for the resilience supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Environment unusable - aborts the run
    Setup,
    ReadinessTimeout,
    Submission,
    /// Hard only when nothing arrived at all
    CompletionTimeout,
    Extraction,
}

impl FailureKind {
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureKind::Setup)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Setup => "setup_failure",
            FailureKind::ReadinessTimeout => "readiness_timeout",
            FailureKind::Submission => "submission_failure",
            FailureKind::CompletionTimeout => "completion_timeout",
            FailureKind::Extraction => "extraction_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
