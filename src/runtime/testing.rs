//! Mock implementations for testing
//!
//! `ScriptedProbe` simulates a chat surface on the tokio clock: replies
//! appear after a delay, stream in chunks, and keep a busy indicator up
//! for as long as scripted. Run tests with `start_paused = true` so the
//! whole relay executes in virtual time.

use super::traits::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Scripted replies
// ============================================================================

/// How the surface responds to the next submission
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    /// `None` never renders anything
    text: Option<String>,
    chunks: usize,
    delay: Duration,
    chunk_every: Duration,
    busy: bool,
    linger: Duration,
    placeholder: bool,
}

impl ScriptedReply {
    /// Whole reply rendered one second after submission
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::streamed(text, 1)
    }

    /// Reply revealed in `chunks` parts, one per second
    #[must_use]
    pub fn streamed(text: &str, chunks: usize) -> Self {
        Self {
            text: Some(text.to_string()),
            chunks: chunks.max(1),
            delay: Duration::from_secs(1),
            chunk_every: Duration::from_secs(1),
            busy: false,
            linger: Duration::ZERO,
            placeholder: false,
        }
    }

    /// The participant never answers
    #[must_use]
    pub fn silence() -> Self {
        Self {
            text: None,
            chunks: 1,
            delay: Duration::ZERO,
            chunk_every: Duration::from_secs(1),
            busy: false,
            linger: Duration::ZERO,
            placeholder: false,
        }
    }

    /// Show a busy indicator from submission until the reply is done
    #[must_use]
    pub fn with_busy(mut self, busy: bool) -> Self {
        self.busy = busy;
        self
    }

    /// Keep the busy indicator up this long after the last chunk
    #[must_use]
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Render an empty reply element together with the echo, then fill it
    #[must_use]
    pub fn with_placeholder(mut self) -> Self {
        self.placeholder = true;
        self
    }

    fn finished_after(&self) -> Duration {
        let steps = u32::try_from(self.chunks - 1).unwrap_or(u32::MAX);
        self.delay + self.chunk_every * steps + self.linger
    }
}

// ============================================================================
// Scripted probe
// ============================================================================

struct ActiveReply {
    reply: ScriptedReply,
    started: Instant,
    element: Option<usize>,
}

#[derive(Default)]
struct SurfaceState {
    elements: Vec<String>,
    /// Rendered markup that is not part of any message
    chrome: usize,
    replies: VecDeque<ScriptedReply>,
    active: Option<ActiveReply>,
    failing_submissions: usize,
    not_ready: bool,
    submissions: Vec<String>,
    foreground_requests: usize,
    cancel_on_complete: Option<CancellationToken>,
}

impl SurfaceState {
    /// Bring the rendered elements up to date with the clock
    fn sync(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(text) = active.reply.text.as_deref() else {
            return;
        };
        let elapsed = active.started.elapsed();
        if elapsed < active.reply.delay {
            return;
        }

        let chunks = active.reply.chunks;
        let every = active.reply.chunk_every.as_millis().max(1);
        let steps = usize::try_from((elapsed - active.reply.delay).as_millis() / every)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        let revealed = steps.min(chunks);
        let total = text.chars().count();
        let partial: String = text.chars().take(total * revealed / chunks).collect();

        match active.element {
            Some(index) => self.elements[index] = partial,
            None => {
                self.elements.push(partial);
                active.element = Some(self.elements.len() - 1);
            }
        }

        if revealed == chunks {
            if let Some(token) = self.cancel_on_complete.take() {
                token.cancel();
            }
            if elapsed >= active.reply.finished_after() {
                self.active = None;
            }
        }
    }

    fn snapshot(&self) -> SurfaceSnapshot {
        let text: usize = self.elements.iter().map(|e| e.chars().count()).sum();
        SurfaceSnapshot::new(text + self.elements.len() + self.chrome, self.elements.len())
    }

    fn busy(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.reply.busy)
    }
}

/// Mock chat surface driven by queued replies
pub struct ScriptedProbe {
    state: Mutex<SurfaceState>,
}

impl ScriptedProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SurfaceState::default()),
        }
    }

    /// Surface that already shows a conversation
    #[must_use]
    pub fn with_history(elements: &[&str]) -> Self {
        let probe = Self::new();
        probe.state.lock().unwrap().elements = elements.iter().map(ToString::to_string).collect();
        probe
    }

    /// Queue the response to a future submission (FIFO)
    pub fn queue_reply(&self, reply: ScriptedReply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    /// Convenience for a whole reply
    #[must_use]
    pub fn replies(self, texts: &[&str]) -> Self {
        for text in texts {
            self.queue_reply(ScriptedReply::text(text));
        }
        self
    }

    /// The next `n` submissions fail without rendering anything
    pub fn fail_next_submissions(&self, n: usize) {
        self.state.lock().unwrap().failing_submissions = n;
    }

    /// Grow the rendered length without touching any message
    pub fn render_chrome(&self, chars: usize) {
        self.state.lock().unwrap().chrome += chars;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().not_ready = !ready;
    }

    /// Cancel `token` the moment the in-flight reply is fully rendered
    pub fn cancel_when_reply_completes(&self, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_complete = Some(token);
    }

    /// Texts that were successfully submitted
    #[must_use]
    pub fn submissions(&self) -> Vec<String> {
        self.state.lock().unwrap().submissions.clone()
    }

    #[must_use]
    pub fn foreground_requests(&self) -> usize {
        self.state.lock().unwrap().foreground_requests
    }
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SurfaceProbe for ScriptedProbe {
    async fn is_ready(&self, _timeout: Duration) -> Result<bool, ProbeError> {
        Ok(!self.state.lock().unwrap().not_ready)
    }

    async fn snapshot(&self) -> Result<SurfaceSnapshot, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.sync();
        Ok(state.snapshot())
    }

    async fn submit(&self, text: &str) -> Result<(), ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.sync();
        if state.failing_submissions > 0 {
            state.failing_submissions -= 1;
            return Err(ProbeError::NotFound("send button".to_string()));
        }
        state.elements.push(text.to_string());
        state.submissions.push(text.to_string());
        state.active = state.replies.pop_front().map(|reply| ActiveReply {
            reply,
            started: Instant::now(),
            element: None,
        });
        if state.active.as_ref().is_some_and(|a| a.reply.placeholder) {
            state.elements.push(String::new());
            let index = state.elements.len() - 1;
            if let Some(active) = state.active.as_mut() {
                active.element = Some(index);
            }
        }
        Ok(())
    }

    async fn busy_indicators(&self) -> Result<usize, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.sync();
        Ok(usize::from(state.busy()))
    }

    async fn read_latest(&self) -> Result<Option<String>, ProbeError> {
        let mut state = self.state.lock().unwrap();
        state.sync();
        Ok(state.elements.last().cloned())
    }

    async fn bring_to_foreground(&self) {
        self.state.lock().unwrap().foreground_requests += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, Timeouts};
    use crate::error::{FailureKind, RelayError};
    use crate::runtime::{RelayEnvelope, RelayEvent, RelayLoop, RunOutcome};
    use crate::state_machine::{RelayPhase, Role, StartMode, Topology};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    const DONE: &str = "TASK_COMPLETED_SUCCESSFULLY";

    fn test_config(topology: Topology) -> RelayConfig {
        RelayConfig {
            topology,
            handshake_grace: Duration::ZERO,
            initial_seed: 42,
            event_buffer: 1024,
            start_message: "kick off".to_string(),
            timeouts: Timeouts::default(),
            ..RelayConfig::default()
        }
    }

    fn participants(probes: &[(&str, &Arc<ScriptedProbe>)]) -> Vec<Participant> {
        probes
            .iter()
            .map(|(role, probe)| Participant::new(*role, Arc::clone(*probe) as Arc<dyn SurfaceProbe>))
            .collect()
    }

    fn drain(rx: &mut broadcast::Receiver<RelayEnvelope>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[tokio::test]
    async fn test_submit_then_read_latest_round_trips() {
        let probe = ScriptedProbe::new();
        probe.submit("hello surface").await.unwrap();
        assert_eq!(probe.read_latest().await.unwrap().as_deref(), Some("hello surface"));
        assert_eq!(probe.snapshot().await.unwrap().element_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_reply_streams_on_the_clock() {
        let probe = ScriptedProbe::new();
        probe.queue_reply(ScriptedReply::streamed("abcdef", 3).with_busy(true));
        probe.submit("go").await.unwrap();

        assert_eq!(probe.busy_indicators().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(probe.read_latest().await.unwrap().as_deref(), Some("ab"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(probe.read_latest().await.unwrap().as_deref(), Some("abcdef"));
        assert_eq!(probe.busy_indicators().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_submission_renders_nothing() {
        let probe = ScriptedProbe::new();
        probe.fail_next_submissions(1);
        assert!(probe.submit("lost").await.is_err());
        assert!(probe.submit("kept").await.is_ok());
        assert_eq!(probe.submissions(), vec!["kept".to_string()]);
    }

    /// Two parties, empty primary: start message, one hop, termination
    #[tokio::test(start_paused = true)]
    async fn test_pair_relay_until_termination() {
        let a = Arc::new(ScriptedProbe::new().replies(&["hello from A"]));
        let b = Arc::new(ScriptedProbe::new().replies(&[format!("all good {DONE}").as_str()]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome.final_text(), Some(format!("all good {DONE}").as_str()));
        assert_eq!(a.submissions(), vec!["kick off".to_string()]);
        assert_eq!(b.submissions(), vec!["hello from A".to_string()]);
        assert_eq!((a.foreground_requests(), b.foreground_requests()), (1, 1));
        assert_eq!(relay.state().phase, RelayPhase::Terminal);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, RelayEvent::StartInjected { role } if role == &Role::new("A"))));
        assert!(matches!(events.last(), Some(RelayEvent::Finished)));
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::TurnFailed { .. })));
    }

    /// Reviewer rejection goes back to the implementer, never the coordinator
    #[tokio::test(start_paused = true)]
    async fn test_triad_reject_returns_to_coder() {
        let planner = Arc::new(ScriptedProbe::with_history(&["build a parser", "PLAN_CREATED: step one"]));
        let coder = Arc::new(ScriptedProbe::new().replies(&["diff v1", format!("diff v2 {DONE}").as_str()]));
        let qa = Arc::new(ScriptedProbe::new().replies(&["PATCH_REJECT missing tests"]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Triad),
            participants(&[("Planner", &planner), ("Coder", &coder), ("QA", &qa)]),
            CancellationToken::new(),
        )
        .unwrap();

        let outcome = relay.run().await.unwrap();

        assert!(matches!(outcome, RunOutcome::Terminated { .. }));
        assert!(planner.submissions().is_empty());
        assert_eq!(qa.submissions(), vec!["diff v1".to_string()]);
        assert_eq!(
            coder.submissions(),
            vec![
                "PLAN_CREATED: step one".to_string(),
                "PATCH_REJECT missing tests".to_string()
            ]
        );
    }

    /// A reviewer reply with no verdict still reaches the implementer
    #[tokio::test(start_paused = true)]
    async fn test_reviewer_without_verdict_is_flagged_ambiguous() {
        let planner = Arc::new(ScriptedProbe::with_history(&["PLAN_CREATED: do it"]));
        let coder = Arc::new(ScriptedProbe::new().replies(&["patch", DONE]));
        let qa = Arc::new(ScriptedProbe::new().replies(&["looks fine I guess"]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Triad),
            participants(&[("Planner", &planner), ("Coder", &coder), ("QA", &qa)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        relay.run().await.unwrap();

        assert_eq!(coder.submissions()[1], "looks fine I guess");
        assert!(planner.submissions().is_empty());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            RelayEvent::RoutingAmbiguity { sender, fallback }
                if sender == &Role::new("QA") && fallback == &Role::new("Coder")
        )));
    }

    /// Three submission failures rotate the identity once, then recover
    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_rotate_identity_once() {
        let a = Arc::new(ScriptedProbe::with_history(&["task", "ping"]));
        let b = Arc::new(ScriptedProbe::new().replies(&[format!("pong {DONE}").as_str()]));
        b.fail_next_submissions(3);

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let first_seed = relay.identity().seed();
        let mut rx = relay.subscribe();

        let started = Instant::now();
        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome.final_text(), Some(format!("pong {DONE}").as_str()));
        assert_eq!(b.submissions(), vec!["ping".to_string()]);
        assert_eq!(relay.state().consecutive_error_count, 0);
        assert_ne!(relay.identity().seed(), first_seed);
        assert!(started.elapsed() >= Duration::from_secs(15));

        let events = drain(&mut rx);
        let failures: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::TurnFailed {
                    kind: FailureKind::Submission,
                    consecutive_errors,
                    ..
                } => Some(*consecutive_errors),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![1, 2, 3]);
        let cooldowns = events
            .iter()
            .filter(|e| matches!(e, RelayEvent::CooldownStarted { .. }))
            .count();
        let rotations = events
            .iter()
            .filter(|e| matches!(e, RelayEvent::IdentityRotated { .. }))
            .count();
        assert_eq!((cooldowns, rotations), (1, 1));

        // The successful fourth attempt comes after the rotation
        let rotated_at = events
            .iter()
            .position(|e| matches!(e, RelayEvent::IdentityRotated { .. }))
            .unwrap();
        let reply_at = events
            .iter()
            .position(|e| matches!(e, RelayEvent::ReplyReceived { role, .. } if role == &Role::new("B")))
            .unwrap();
        assert!(reply_at > rotated_at);
    }

    /// A start message that got no answer is sent again, never relayed
    #[tokio::test(start_paused = true)]
    async fn test_unanswered_start_message_is_injected_again() {
        let a = Arc::new(ScriptedProbe::new());
        a.queue_reply(ScriptedReply::silence());
        a.queue_reply(ScriptedReply::text("hello from A"));
        let b = Arc::new(ScriptedProbe::new().replies(&[DONE]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome.final_text(), Some(DONE));
        assert_eq!(a.submissions(), vec!["kick off".to_string(), "kick off".to_string()]);
        assert_eq!(b.submissions(), vec!["hello from A".to_string()]);

        let events = drain(&mut rx);
        let injections = events
            .iter()
            .filter(|e| matches!(e, RelayEvent::StartInjected { .. }))
            .count();
        assert_eq!(injections, 2);
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::Resumed { .. })));
    }

    /// The start turn is a full turn: its success clears earlier failures
    #[tokio::test(start_paused = true)]
    async fn test_successful_start_turn_resets_error_count() {
        let a = Arc::new(ScriptedProbe::new().replies(&["hello from A"]));
        a.fail_next_submissions(2);
        let b = Arc::new(ScriptedProbe::new().replies(&[DONE]));
        b.fail_next_submissions(1);

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let first_seed = relay.identity().seed();
        let mut rx = relay.subscribe();

        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome.final_text(), Some(DONE));
        assert_eq!(relay.identity().seed(), first_seed);
        assert_eq!(a.submissions(), vec!["kick off".to_string()]);
        assert_eq!(b.submissions(), vec!["hello from A".to_string()]);

        let events = drain(&mut rx);
        let failures: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::TurnFailed {
                    consecutive_errors, ..
                } => Some(*consecutive_errors),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![1, 2, 1]);
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::IdentityRotated { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RelayEvent::ErrorCountChanged { consecutive_errors: 0 })));
    }

    /// Silence is counted like any other turn failure
    #[tokio::test(start_paused = true)]
    async fn test_silent_participant_counts_as_completion_timeout() {
        let a = Arc::new(ScriptedProbe::with_history(&["ping"]));
        let b = Arc::new(ScriptedProbe::new());
        b.queue_reply(ScriptedReply::silence());
        b.queue_reply(ScriptedReply::text(DONE));

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        relay.run().await.unwrap();

        let events = drain(&mut rx);
        let kinds: Vec<FailureKind> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::TurnFailed { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![FailureKind::CompletionTimeout]);
        // Retry resubmits the same confirmed message
        assert_eq!(b.submissions(), vec!["ping".to_string(), "ping".to_string()]);
    }

    /// Stop during a wait: the wait finishes, nothing further is submitted
    #[tokio::test(start_paused = true)]
    async fn test_stop_during_quiescence_submits_nothing_more() {
        let cancel = CancellationToken::new();
        let a = Arc::new(ScriptedProbe::new());
        a.queue_reply(ScriptedReply::streamed("a long thoughtful answer", 3));
        a.cancel_when_reply_completes(cancel.clone());
        let b = Arc::new(ScriptedProbe::new().replies(&["never used"]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            cancel,
        )
        .unwrap();
        let mut rx = relay.subscribe();

        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome, RunOutcome::StoppedByRequest);
        assert!(b.submissions().is_empty());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, RelayEvent::ReplyReceived { .. })));
        assert!(events.iter().any(|e| matches!(e, RelayEvent::StoppedByRequest)));
        assert!(matches!(events.last(), Some(RelayEvent::Finished)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_grace_period() {
        let cancel = CancellationToken::new();
        let a = Arc::new(ScriptedProbe::new());
        let b = Arc::new(ScriptedProbe::new());
        let config = RelayConfig {
            handshake_grace: Duration::from_secs(30),
            ..test_config(Topology::Pair)
        };
        let mut relay =
            RelayLoop::new(config, participants(&[("A", &a), ("B", &b)]), cancel.clone()).unwrap();
        let mut rx = relay.subscribe();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cancel.cancel();
        });
        let outcome = relay.run().await.unwrap();
        stopper.await.unwrap();

        assert_eq!(outcome, RunOutcome::StoppedByRequest);
        assert!(a.submissions().is_empty());
        let countdown: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                RelayEvent::GraceCountdown { remaining_secs } => Some(remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![30, 25]);
    }

    /// Resume from the secondary relays its latest reply once before cycling
    #[tokio::test(start_paused = true)]
    async fn test_resume_from_secondary_hops_first() {
        let a = Arc::new(ScriptedProbe::with_history(&["old A reply"]).replies(&[DONE]));
        let b = Arc::new(ScriptedProbe::with_history(&["question", "B's last word"]));

        let config = RelayConfig {
            start_mode: StartMode::ResumeFromSecondary,
            ..test_config(Topology::Pair)
        };
        let mut relay =
            RelayLoop::new(config, participants(&[("A", &a), ("B", &b)]), CancellationToken::new())
                .unwrap();

        let outcome = relay.run().await.unwrap();

        assert_eq!(outcome.final_text(), Some(DONE));
        assert_eq!(a.submissions(), vec!["B's last word".to_string()]);
        assert!(b.submissions().is_empty());
        // Resuming still focuses the surface it reads from
        assert_eq!(b.foreground_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_mode_with_history_resumes_primary() {
        let a = Arc::new(ScriptedProbe::with_history(&["earlier", "A continues"]));
        let b = Arc::new(ScriptedProbe::new().replies(&[DONE]));

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        relay.run().await.unwrap();

        assert!(a.submissions().is_empty());
        assert_eq!(b.submissions(), vec!["A continues".to_string()]);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, RelayEvent::Resumed { role } if role == &Role::new("A"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_surface_is_fatal() {
        let a = Arc::new(ScriptedProbe::new());
        let b = Arc::new(ScriptedProbe::new());
        b.set_ready(false);

        let mut relay = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &b)]),
            CancellationToken::new(),
        )
        .unwrap();
        let mut rx = relay.subscribe();

        let err = relay.run().await.unwrap_err();

        assert!(matches!(err, RelayError::Setup(_)));
        assert!(a.submissions().is_empty());
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, RelayEvent::TurnFailed { .. })));
        assert!(matches!(events.last(), Some(RelayEvent::Finished)));
    }

    #[test]
    fn test_participants_must_cover_topology() {
        let a = Arc::new(ScriptedProbe::new());
        let err = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a)]),
            CancellationToken::new(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("no surface bound for B"));

        let stranger = Arc::new(ScriptedProbe::new());
        let err = RelayLoop::new(
            test_config(Topology::Pair),
            participants(&[("A", &a), ("B", &a), ("Z", &stranger)]),
            CancellationToken::new(),
        )
        .err()
        .unwrap();
        assert!(err.is_fatal());
    }
}
