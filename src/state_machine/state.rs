//! Relay state types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one conversational participant ("A", "Planner", ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A completed reply read off a participant surface. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Role,
    pub text: String,
    /// Element count observed when the reply was extracted. Used instead of
    /// wall-clock time because render order is not reliable.
    pub produced_at_seq: usize,
}

impl Message {
    #[must_use]
    pub fn new(sender: Role, text: impl Into<String>, produced_at_seq: usize) -> Self {
        Self {
            sender,
            text: text.into(),
            produced_at_seq,
        }
    }

    /// Short single-line preview for logs
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .text
            .chars()
            .map(|c| if c == '\n' { ' ' } else { c })
            .take(max_chars)
            .collect();
        if self.text.chars().count() > max_chars {
            format!("{flat}…")
        } else {
            flat
        }
    }
}

/// Where the relay loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    /// Deciding between start injection and resume
    Handshake,
    /// Turn-by-turn relay
    Cycling,
    /// A turn failed; the supervisor decides retry or rotation
    Recovering,
    /// Run finished (termination phrase or stop request)
    Terminal,
}

impl RelayPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RelayPhase::Handshake => "handshake",
            RelayPhase::Cycling => "cycling",
            RelayPhase::Recovering => "recovering",
            RelayPhase::Terminal => "terminal",
        }
    }
}

/// How the first handshake enters the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartMode {
    /// Inject the start message if the primary surface is empty, otherwise
    /// resume from the primary.
    #[default]
    New,
    ResumeFromPrimary,
    /// Read the secondary's latest reply and relay it once before cycling
    ResumeFromSecondary,
}

impl StartMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::New => "new",
            StartMode::ResumeFromPrimary => "resume-from-primary",
            StartMode::ResumeFromSecondary => "resume-from-secondary",
        }
    }
}

impl FromStr for StartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "new" => Ok(StartMode::New),
            "resume-from-primary" | "resume-from-a" => Ok(StartMode::ResumeFromPrimary),
            "resume-from-secondary" | "resume-from-b" => Ok(StartMode::ResumeFromSecondary),
            other => Err(format!("unknown start mode: {other}")),
        }
    }
}

/// Transient relay bookkeeping. Mutated only by the relay loop and the
/// supervisor; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayState {
    pub phase: RelayPhase,
    /// Participant whose latest reply is the message to relay next
    pub current_holder: Role,
    pub current_message: Option<Message>,
    pub consecutive_error_count: u32,
}

impl RelayState {
    #[must_use]
    pub fn new(primary: Role) -> Self {
        Self {
            phase: RelayPhase::Handshake,
            current_holder: primary,
            current_message: None,
            consecutive_error_count: 0,
        }
    }

    /// Record a fully extracted reply; the sender takes the floor.
    pub fn hand_floor(&mut self, message: Message) {
        self.current_holder = message.sender.clone();
        self.current_message = Some(message);
    }
}
