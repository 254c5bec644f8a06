//! Events streamed to whatever presentation layer is attached

use crate::error::FailureKind;
use crate::state_machine::{Message, RelayPhase, RouteBasis, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Something observable happened inside the relay
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    PhaseChanged {
        phase: RelayPhase,
    },
    GraceCountdown {
        remaining_secs: u64,
    },
    IdentityAssigned {
        session_id: String,
        seed: u64,
        persona: String,
    },
    StartInjected {
        role: Role,
    },
    Resumed {
        role: Role,
    },
    Routed {
        from: Role,
        to: Role,
        basis: RouteBasis,
    },
    /// No rule matched; the sender's default recipient was used
    RoutingAmbiguity {
        sender: Role,
        fallback: Role,
    },
    Submitted {
        role: Role,
        chars: usize,
    },
    ReplyReceived {
        role: Role,
        chars: usize,
        seq: usize,
    },
    /// Soft wait timeout; the relay proceeded with what it had
    WaitDegraded {
        role: Role,
        stage: String,
    },
    TurnFailed {
        kind: FailureKind,
        message: String,
        consecutive_errors: u32,
        threshold: u32,
    },
    ErrorCountChanged {
        consecutive_errors: u32,
    },
    CooldownStarted {
        duration_ms: u64,
    },
    IdentityRotated {
        old_session_id: String,
        new_session_id: String,
        persona: String,
    },
    Terminated {
        final_text: String,
    },
    StoppedByRequest,
    Finished,
}

/// Event plus emission time
#[derive(Debug, Clone, Serialize)]
pub struct RelayEnvelope {
    pub run_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RelayEvent,
}

/// How a run ended (fatal setup failures are the `Err` side)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The termination phrase was seen; surfaces are left untouched
    Terminated { final_message: Message },
    StoppedByRequest,
}

impl RunOutcome {
    #[must_use]
    pub fn final_text(&self) -> Option<&str> {
        match self {
            RunOutcome::Terminated { final_message } => Some(&final_message.text),
            RunOutcome::StoppedByRequest => None,
        }
    }
}
