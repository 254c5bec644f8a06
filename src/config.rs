//! Relay configuration
//!
//! All knobs come from `RELAY_*` environment variables with defaults that
//! match long-running unattended use.

use crate::error::RelayError;
use crate::probe::SurfaceSelectors;
use crate::state_machine::{Role, SafetyPhrases, StartMode, Topology, DEFAULT_ARTIFACTS};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_START_MESSAGE: &str =
    "Please start the collaboration workflow and begin your coordination task.";

/// Waits used by the completion detector and the readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub readiness: Duration,
    /// Stage 1: hard failure when nothing changes at all
    pub arrival: Duration,
    /// Stage 2: soft, proceeds on expiry
    pub busy: Duration,
    /// Stage 3 sampling interval
    pub quiescence_interval: Duration,
    /// Stage 3 overall ceiling, soft
    pub quiescence_ceiling: Duration,
    /// Poll interval for the arrival and busy stages
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness: Duration::from_secs(30),
            arrival: Duration::from_secs(30),
            busy: Duration::from_secs(120),
            quiescence_interval: Duration::from_millis(1500),
            quiescence_ceiling: Duration::from_secs(180),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub timeouts: Timeouts,
    pub failure_threshold: u32,
    pub cooldown_min: Duration,
    pub cooldown_max: Duration,
    /// Operator preparation window before the first handshake
    pub handshake_grace: Duration,
    pub start_mode: StartMode,
    pub topology: Topology,
    pub phrases: SafetyPhrases,
    pub start_message: String,
    /// UI labels stripped from extracted text
    pub artifacts: Vec<String>,
    pub initial_seed: u64,
    pub event_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            failure_threshold: 3,
            cooldown_min: Duration::from_secs(15),
            cooldown_max: Duration::from_secs(45),
            handshake_grace: Duration::from_secs(30),
            start_mode: StartMode::New,
            topology: Topology::Pair,
            phrases: SafetyPhrases::default(),
            start_message: DEFAULT_START_MESSAGE.to_string(),
            artifacts: DEFAULT_ARTIFACTS.iter().map(ToString::to_string).collect(),
            initial_seed: 0,
            event_buffer: 256,
        }
    }
}

impl RelayConfig {
    /// Read the relay configuration from `RELAY_*` variables
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_lookup`].
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    ///
    /// # Errors
    ///
    /// Unparseable values fall back to defaults; only a configuration that
    /// fails [`RelayConfig::validate`] is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let d = Self::default();
        let ms = |key: &str, default: Duration| {
            parsed::<u64>(&lookup, key).map_or(default, Duration::from_millis)
        };

        let start_mode = match lookup("RELAY_START_MODE") {
            Some(raw) => raw.parse().map_err(RelayError::Setup)?,
            None => d.start_mode,
        };
        let topology = match lookup("RELAY_TOPOLOGY") {
            Some(raw) => raw.parse().map_err(RelayError::Setup)?,
            None => d.topology,
        };
        let initial_seed = parsed::<u64>(&lookup, "RELAY_SEED").unwrap_or_else(|| {
            u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
        });

        let config = Self {
            timeouts: Timeouts {
                readiness: ms("RELAY_READY_TIMEOUT_MS", d.timeouts.readiness),
                arrival: ms("RELAY_ARRIVAL_TIMEOUT_MS", d.timeouts.arrival),
                busy: ms("RELAY_BUSY_TIMEOUT_MS", d.timeouts.busy),
                quiescence_interval: ms(
                    "RELAY_QUIESCENCE_INTERVAL_MS",
                    d.timeouts.quiescence_interval,
                ),
                quiescence_ceiling: ms(
                    "RELAY_QUIESCENCE_CEILING_MS",
                    d.timeouts.quiescence_ceiling,
                ),
                poll_interval: ms("RELAY_POLL_INTERVAL_MS", d.timeouts.poll_interval),
            },
            failure_threshold: parsed(&lookup, "RELAY_FAILURE_THRESHOLD")
                .unwrap_or(d.failure_threshold),
            cooldown_min: ms("RELAY_COOLDOWN_MIN_MS", d.cooldown_min),
            cooldown_max: ms("RELAY_COOLDOWN_MAX_MS", d.cooldown_max),
            handshake_grace: ms("RELAY_HANDSHAKE_GRACE_MS", d.handshake_grace),
            start_mode,
            topology,
            phrases: d.phrases,
            start_message: lookup("RELAY_START_MESSAGE").unwrap_or(d.start_message),
            artifacts: d.artifacts,
            initial_seed,
            event_buffer: parsed(&lookup, "RELAY_EVENT_BUFFER").unwrap_or(d.event_buffer),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns a setup error naming the first inconsistent setting.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.failure_threshold == 0 {
            return Err(RelayError::setup("failure threshold must be at least 1"));
        }
        if self.cooldown_min > self.cooldown_max {
            return Err(RelayError::setup(format!(
                "cooldown range is inverted ({:?} > {:?})",
                self.cooldown_min, self.cooldown_max
            )));
        }
        if self.timeouts.quiescence_interval.is_zero() || self.timeouts.poll_interval.is_zero() {
            return Err(RelayError::setup("poll intervals must be non-zero"));
        }
        if self.start_message.trim().is_empty() {
            return Err(RelayError::setup("start message must not be empty"));
        }
        if self.event_buffer == 0 {
            return Err(RelayError::setup("event buffer must hold at least one event"));
        }
        Ok(())
    }
}

/// Browser bootstrap settings for the CDP probes
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Persistent profile holding the participants' logged-in sessions
    pub user_data_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    pub urls: BTreeMap<Role, String>,
    pub page_load_timeout: Duration,
    pub selectors: SurfaceSelectors,
}

const DEFAULT_URLS: &[(&str, &str)] = &[
    ("A", "https://gemini.google.com/u/1/app?hl=zh-cn"),
    ("B", "https://gemini.google.com/u/3/app?hl=zh-cn"),
    ("Planner", "https://gemini.google.com/u/0/app?hl=zh-cn"),
    ("Coder", "https://gemini.google.com/u/3/app?hl=zh-cn"),
    ("QA", "https://gemini.google.com/u/2/app?hl=zh-cn"),
];

impl BrowserSettings {
    #[must_use]
    pub fn from_env(roles: &[Role]) -> Self {
        Self::from_lookup(roles, |key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(roles: &[Role], lookup: impl Fn(&str) -> Option<String>) -> Self {
        let urls = roles
            .iter()
            .filter_map(|role| {
                let key = format!("RELAY_URL_{}", role.as_str().to_ascii_uppercase());
                let url = lookup(&key).or_else(|| {
                    DEFAULT_URLS
                        .iter()
                        .find(|(name, _)| *name == role.as_str())
                        .map(|(_, url)| (*url).to_string())
                })?;
                Some((role.clone(), url))
            })
            .collect();

        Self {
            user_data_dir: lookup("RELAY_USER_DATA_DIR").map(PathBuf::from),
            executable: lookup("RELAY_CHROME").map(PathBuf::from),
            urls,
            page_load_timeout: parsed::<u64>(&lookup, "RELAY_PAGE_LOAD_TIMEOUT_MS")
                .map_or(Duration::from_secs(90), Duration::from_millis),
            selectors: SurfaceSelectors::default(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            None
        }
    }
}
