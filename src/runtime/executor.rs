//! Relay loop executor
//!
//! Drives handshake, cycling and recovery against the participant surfaces.
//! Routing and the retry-or-rotate decision are delegated to the pure
//! state machine; this file only performs the effects.

use super::detector::CompletionDetector;
use super::event::{RelayEnvelope, RelayEvent, RunOutcome};
use super::traits::{Participant, SurfaceProbe, SurfaceSnapshot};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::identity::{derive_identity, SessionIdentity};
use crate::state_machine::{
    strip_artifacts, FailureVerdict, Message, RelayPhase, RelayState, ResilienceSupervisor, Role,
    RouteDecision, StartMode, TurnRouter,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const GRACE_TICK: Duration = Duration::from_secs(5);

/// Why a handshake or cycle stopped early
enum Interrupt {
    Stop,
    Failed(RelayError),
}

impl From<RelayError> for Interrupt {
    fn from(e: RelayError) -> Self {
        Interrupt::Failed(e)
    }
}

type Step<T> = Result<T, Interrupt>;

pub struct RelayLoop {
    config: RelayConfig,
    probes: BTreeMap<Role, Arc<dyn SurfaceProbe>>,
    router: TurnRouter,
    detector: CompletionDetector,
    supervisor: ResilienceSupervisor,
    identity: SessionIdentity,
    state: RelayState,
    /// The start message was submitted at least once
    start_injected: bool,
    cancel: CancellationToken,
    events: broadcast::Sender<RelayEnvelope>,
    run_id: String,
}

impl RelayLoop {
    /// Relay loop for the configured topology
    ///
    /// # Errors
    ///
    /// Same as [`RelayLoop::with_router`], plus an invalid topology table.
    pub fn new(
        config: RelayConfig,
        participants: Vec<Participant>,
        cancel: CancellationToken,
    ) -> Result<Self, RelayError> {
        let router = TurnRouter::for_topology(config.topology, config.phrases.clone())?;
        Self::with_router(config, router, participants, cancel)
    }

    /// Relay loop over a custom routing table
    ///
    /// # Errors
    ///
    /// Returns a setup error for an invalid config, or when the participants
    /// do not bind every role of the table exactly once.
    pub fn with_router(
        config: RelayConfig,
        router: TurnRouter,
        participants: Vec<Participant>,
        cancel: CancellationToken,
    ) -> Result<Self, RelayError> {
        config.validate()?;

        let mut probes = BTreeMap::new();
        for participant in participants {
            if !router.table().roles().contains(&participant.role) {
                return Err(RelayError::setup(format!(
                    "participant {} is not part of the routing table",
                    participant.role
                )));
            }
            if probes.insert(participant.role.clone(), participant.probe).is_some() {
                return Err(RelayError::setup(format!(
                    "participant {} bound twice",
                    participant.role
                )));
            }
        }
        if let Some(missing) = router.table().roles().iter().find(|r| !probes.contains_key(*r)) {
            return Err(RelayError::setup(format!("no surface bound for {missing}")));
        }

        let (events, _) = broadcast::channel(config.event_buffer);
        Ok(Self {
            detector: CompletionDetector::new(config.timeouts.clone(), config.artifacts.clone()),
            supervisor: ResilienceSupervisor::new(
                config.failure_threshold,
                config.cooldown_min,
                config.cooldown_max,
            ),
            identity: derive_identity(config.initial_seed),
            state: RelayState::new(router.table().primary().clone()),
            start_injected: false,
            router,
            probes,
            config,
            cancel,
            events,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn state(&self) -> &RelayState {
        &self.state
    }

    #[must_use]
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Run until the termination phrase, a stop request, or a fatal error.
    ///
    /// # Errors
    ///
    /// Only fatal errors surface here; every other turn failure is retried.
    pub async fn run(&mut self) -> Result<RunOutcome, RelayError> {
        tracing::info!(
            run_id = %self.run_id,
            topology = %self.config.topology.as_str(),
            start_mode = %self.config.start_mode.as_str(),
            "Starting relay"
        );
        let outcome = self.drive().await;
        match &outcome {
            Ok(RunOutcome::Terminated { final_message }) => {
                tracing::info!(sender = %final_message.sender, "Relay finished: task completed");
            }
            Ok(RunOutcome::StoppedByRequest) => tracing::info!("Relay finished: stopped by request"),
            Err(e) => tracing::error!(error = %e, "Relay aborted"),
        }
        self.emit(RelayEvent::Finished);
        outcome
    }

    async fn drive(&mut self) -> Result<RunOutcome, RelayError> {
        self.announce_identity();
        self.check_surfaces().await?;
        self.grace_period().await;

        loop {
            match self.attempt().await {
                Ok(final_message) => return Ok(self.terminate(final_message)),
                Err(Interrupt::Stop) => return Ok(self.stop()),
                Err(Interrupt::Failed(e)) if e.is_fatal() => return Err(e),
                Err(Interrupt::Failed(e)) => self.recover(e).await,
            }
        }
    }

    /// Handshake then cycle. Returns the terminal message.
    async fn attempt(&mut self) -> Step<Message> {
        self.checkpoint("before handshake")?;
        self.set_phase(RelayPhase::Handshake);
        if let Some(final_message) = self.handshake().await? {
            return Ok(final_message);
        }

        self.set_phase(RelayPhase::Cycling);
        loop {
            if let Some(final_message) = self.advance().await? {
                return Ok(final_message);
            }
        }
    }

    async fn check_surfaces(&self) -> Result<(), RelayError> {
        let timeout = self.config.timeouts.readiness;
        for (role, probe) in &self.probes {
            match probe.is_ready(timeout).await {
                Ok(true) => tracing::debug!(role = %role, "Surface ready"),
                Ok(false) => {
                    return Err(RelayError::setup(format!(
                        "{role} surface did not become ready within {timeout:?}"
                    )))
                }
                Err(e) => {
                    return Err(RelayError::setup(format!("{role} surface unusable: {e}")));
                }
            }
        }
        Ok(())
    }

    /// Lets the operator arrange windows before anything is typed
    async fn grace_period(&self) {
        let mut remaining = self.config.handshake_grace;
        if remaining.is_zero() {
            return;
        }
        tracing::info!(grace_secs = remaining.as_secs(), "Waiting before first handshake");
        while !remaining.is_zero() {
            self.emit(RelayEvent::GraceCountdown {
                remaining_secs: remaining.as_secs(),
            });
            let tick = remaining.min(GRACE_TICK);
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(tick) => {}
            }
            remaining = remaining.saturating_sub(tick);
        }
    }

    /// Establish `current_holder` and `current_message`. `Some` only when a
    /// resume-from-secondary hop already hit the termination phrase.
    async fn handshake(&mut self) -> Step<Option<Message>> {
        // Once a reply has been confirmed, retries resume from its holder
        if self.state.current_message.is_some() {
            let holder = self.state.current_holder.clone();
            tracing::info!(holder = %holder, "Resuming from last confirmed holder");
            self.resume_from(&holder).await?;
            return Ok(None);
        }

        let primary = self.router.table().primary().clone();
        match self.config.start_mode {
            StartMode::New => {
                let probe = self.probe(&primary)?;
                self.ensure_ready(&primary, probe.as_ref()).await?;
                let snapshot = probe
                    .snapshot()
                    .await
                    .map_err(|e| RelayError::extraction(&primary, e.to_string()))?;
                if snapshot.element_count == 0 || self.start_unanswered(&primary, probe.as_ref()).await? {
                    tracing::info!(
                        role = %primary,
                        retry = self.start_injected,
                        "Injecting start message"
                    );
                    self.emit(RelayEvent::StartInjected {
                        role: primary.clone(),
                    });
                    self.start_injected = true;
                    let start = self.config.start_message.clone();
                    let reply = self.relay_turn(&primary, &start).await?;
                    self.state.hand_floor(reply);
                    self.supervisor.record_success();
                    self.sync_error_count();
                } else {
                    tracing::info!(
                        role = %primary,
                        elements = snapshot.element_count,
                        "Existing conversation found, resuming"
                    );
                    self.resume_from(&primary).await?;
                }
                Ok(None)
            }
            StartMode::ResumeFromPrimary => {
                self.resume_from(&primary).await?;
                Ok(None)
            }
            StartMode::ResumeFromSecondary => {
                let secondary = self.router.table().secondary().clone();
                self.resume_from(&secondary).await?;
                self.advance().await
            }
        }
    }

    /// A previous injection left only its own echo behind
    async fn start_unanswered(&self, primary: &Role, probe: &dyn SurfaceProbe) -> Result<bool, RelayError> {
        if !self.start_injected {
            return Ok(false);
        }
        let latest = probe
            .read_latest()
            .await
            .map_err(|e| RelayError::extraction(primary, e.to_string()))?;
        Ok(match latest {
            Some(text) => strip_artifacts(&text, &self.config.artifacts) == self.config.start_message.trim(),
            None => true,
        })
    }

    /// Adopt a surface's latest message. Not a turn: nothing is submitted,
    /// so the failure count is left alone.
    async fn resume_from(&mut self, role: &Role) -> Step<()> {
        let probe = self.probe(role)?;
        probe.bring_to_foreground().await;
        self.ensure_ready(role, probe.as_ref()).await?;
        let completion = self.detector.settle(role, probe.as_ref()).await?;
        self.report_degraded(role, &completion.degraded);
        self.state.hand_floor(completion.message);
        self.emit(RelayEvent::Resumed { role: role.clone() });
        Ok(())
    }

    /// One hop: route the holder's message and collect the recipient's
    /// reply. `Some` when the message was terminal.
    async fn advance(&mut self) -> Step<Option<Message>> {
        self.checkpoint("before routing")?;
        let holder = self.state.current_holder.clone();
        let message = self
            .state
            .current_message
            .clone()
            .ok_or_else(|| RelayError::extraction(&holder, "no confirmed message to relay"))?;

        let decision = self.router.route(&holder, &message.text);
        let ambiguous = decision.is_ambiguous();
        let (recipient, basis) = match decision {
            RouteDecision::Terminal => return Ok(Some(message)),
            RouteDecision::Deliver { recipient, basis } => (recipient, basis),
        };

        tracing::info!(from = %holder, to = %recipient, ?basis, "Routing message");
        if ambiguous {
            tracing::warn!(
                sender = %holder,
                fallback = %recipient,
                preview = %message.preview(80),
                "No routing rule matched, using default recipient"
            );
            self.emit(RelayEvent::RoutingAmbiguity {
                sender: holder.clone(),
                fallback: recipient.clone(),
            });
        }
        self.emit(RelayEvent::Routed {
            from: holder.clone(),
            to: recipient.clone(),
            basis,
        });

        let reply = self.relay_turn(&recipient, &message.text).await?;
        self.state.hand_floor(reply);
        self.supervisor.record_success();
        self.sync_error_count();
        Ok(None)
    }

    /// Submit `text` to `role` and wait for the reply
    async fn relay_turn(&mut self, role: &Role, text: &str) -> Step<Message> {
        self.checkpoint("before submission")?;
        let probe = self.probe(role)?;
        probe.bring_to_foreground().await;
        self.ensure_ready(role, probe.as_ref()).await?;
        let before = self.submit(role, probe.as_ref(), text).await?;

        self.checkpoint("before await")?;
        let completion = self
            .detector
            .await_completion(role, probe.as_ref(), before)
            .await?;
        self.report_degraded(role, &completion.degraded);
        self.emit(RelayEvent::ReplyReceived {
            role: role.clone(),
            chars: completion.message.text.chars().count(),
            seq: completion.message.produced_at_seq,
        });
        Ok(completion.message)
    }

    /// Commit under the task lock; the snapshot after the echo is the
    /// baseline for completion detection.
    async fn submit(
        &self,
        role: &Role,
        probe: &dyn SurfaceProbe,
        text: &str,
    ) -> Result<SurfaceSnapshot, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::submission(role, "refusing to submit an empty message"));
        }
        let _lock = self
            .identity
            .task_lock()
            .acquire()
            .ok_or_else(|| RelayError::submission(role, "another submission is in flight"))?;

        tracing::info!(role = %role, chars = text.chars().count(), "Submitting message");
        probe
            .submit(text)
            .await
            .map_err(|e| RelayError::submission(role, e.to_string()))?;
        let baseline = probe
            .snapshot()
            .await
            .map_err(|e| RelayError::submission(role, format!("surface unreadable after submit: {e}")))?;

        self.emit(RelayEvent::Submitted {
            role: role.clone(),
            chars: text.chars().count(),
        });
        Ok(baseline)
    }

    async fn ensure_ready(&self, role: &Role, probe: &dyn SurfaceProbe) -> Result<(), RelayError> {
        let waited = self.config.timeouts.readiness;
        match probe.is_ready(waited).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RelayError::ReadinessTimeout {
                role: role.clone(),
                waited,
            }),
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Readiness check failed");
                Err(RelayError::ReadinessTimeout {
                    role: role.clone(),
                    waited,
                })
            }
        }
    }

    async fn recover(&mut self, error: RelayError) {
        self.set_phase(RelayPhase::Recovering);
        let verdict = self.supervisor.record_failure(&mut self.identity);
        let consecutive_errors = self.supervisor.consecutive_errors();
        tracing::error!(
            kind = %error.kind(),
            error = %error,
            consecutive_errors,
            threshold = self.supervisor.threshold(),
            "Relay turn failed"
        );
        self.emit(RelayEvent::TurnFailed {
            kind: error.kind(),
            message: error.to_string(),
            consecutive_errors,
            threshold: self.supervisor.threshold(),
        });
        self.sync_error_count();

        match verdict {
            FailureVerdict::Retry { .. } => {
                tracing::info!("Retrying from handshake");
            }
            FailureVerdict::Rotate { cooldown, .. } => {
                tracing::warn!(
                    cooldown_ms = cooldown.as_millis(),
                    "Failure budget exhausted, cooling down before rotating identity"
                );
                self.emit(RelayEvent::CooldownStarted {
                    duration_ms: u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                });
                tokio::time::sleep(cooldown).await;

                let old_session_id = self.identity.session_id();
                self.identity = self.supervisor.rotate(&mut self.identity);
                tracing::info!(
                    old = %old_session_id,
                    new = %self.identity.session_id(),
                    persona = self.identity.persona().as_str(),
                    "Identity rotated"
                );
                self.emit(RelayEvent::IdentityRotated {
                    old_session_id,
                    new_session_id: self.identity.session_id(),
                    persona: self.identity.persona().as_str().to_string(),
                });
                self.sync_error_count();
            }
        }
    }

    fn terminate(&mut self, final_message: Message) -> RunOutcome {
        self.set_phase(RelayPhase::Terminal);
        tracing::info!(
            sender = %final_message.sender,
            preview = %final_message.preview(80),
            "Termination phrase detected"
        );
        self.emit(RelayEvent::Terminated {
            final_text: final_message.text.clone(),
        });
        RunOutcome::Terminated { final_message }
    }

    fn stop(&mut self) -> RunOutcome {
        self.set_phase(RelayPhase::Terminal);
        self.emit(RelayEvent::StoppedByRequest);
        RunOutcome::StoppedByRequest
    }

    fn checkpoint(&self, at: &'static str) -> Step<()> {
        if self.cancel.is_cancelled() {
            tracing::info!(checkpoint = at, "Stop requested");
            return Err(Interrupt::Stop);
        }
        Ok(())
    }

    fn probe(&self, role: &Role) -> Result<Arc<dyn SurfaceProbe>, RelayError> {
        self.probes
            .get(role)
            .cloned()
            .ok_or_else(|| RelayError::setup(format!("no surface bound for {role}")))
    }

    fn announce_identity(&self) {
        tracing::info!(
            session_id = %self.identity.session_id(),
            persona = self.identity.persona().as_str(),
            "Session identity assigned"
        );
        self.emit(RelayEvent::IdentityAssigned {
            session_id: self.identity.session_id(),
            seed: self.identity.seed(),
            persona: self.identity.persona().as_str().to_string(),
        });
    }

    fn report_degraded(&self, role: &Role, stages: &[crate::error::WaitStage]) {
        for stage in stages {
            self.emit(RelayEvent::WaitDegraded {
                role: role.clone(),
                stage: stage.to_string(),
            });
        }
    }

    fn set_phase(&mut self, phase: RelayPhase) {
        if self.state.phase != phase {
            tracing::debug!(from = self.state.phase.as_str(), to = phase.as_str(), "Phase change");
            self.state.phase = phase;
            self.emit(RelayEvent::PhaseChanged { phase });
        }
    }

    fn sync_error_count(&mut self) {
        let count = self.supervisor.consecutive_errors();
        if self.state.consecutive_error_count != count {
            self.state.consecutive_error_count = count;
            self.emit(RelayEvent::ErrorCountChanged {
                consecutive_errors: count,
            });
        }
    }

    fn emit(&self, event: RelayEvent) {
        // No subscribers is fine
        let _ = self.events.send(RelayEnvelope {
            run_id: self.run_id.clone(),
            at: chrono::Utc::now(),
            event,
        });
    }
}
