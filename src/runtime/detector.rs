//! Completion detection
//!
//! Infers that a participant finished replying from signals that are each
//! unreliable on their own. Stages, each a fallback for the one before:
//!
//! 1. arrival: rendered length or element count moved (hard timeout)
//! 2. busy: every busy indicator cleared (soft timeout)
//! 3. quiescence: two equal length samples in a row (soft ceiling)
//! 4. extraction: latest element text, UI artifacts stripped, non-empty
//!
//! A reply counts as new when the element count grew past the baseline or
//! the latest element no longer reads as it did at the baseline. Surfaces
//! that render an empty reply shell together with the echo only pass the
//! second test.

use super::traits::{SurfaceProbe, SurfaceSnapshot};
use crate::config::Timeouts;
use crate::error::{RelayError, WaitStage};
use crate::state_machine::{strip_artifacts, Message, Role};
use tokio::time::{sleep, Instant};

/// A finished reply plus the soft stages that had to give up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub message: Message,
    pub degraded: Vec<WaitStage>,
}

/// What the surface looked like right after submission
#[derive(Debug, Clone)]
struct Baseline {
    snapshot: SurfaceSnapshot,
    latest: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    timeouts: Timeouts,
    artifacts: Vec<String>,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(timeouts: Timeouts, artifacts: Vec<String>) -> Self {
        Self {
            timeouts,
            artifacts,
        }
    }

    /// Wait for a reply to something submitted after `before` was taken.
    ///
    /// # Errors
    ///
    /// Fails on a silent participant (arrival timeout) or when no new
    /// non-empty message can be read once the surface settles.
    pub async fn await_completion(
        &self,
        role: &Role,
        probe: &dyn SurfaceProbe,
        before: SurfaceSnapshot,
    ) -> Result<Completion, RelayError> {
        tracing::info!(role = %role, elements = before.element_count, "Waiting for reply");
        let latest = match probe.read_latest().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::debug!(role = %role, error = %e, "Could not read baseline message");
                None
            }
        };
        self.wait_for_arrival(role, probe, before).await?;
        let baseline = Baseline {
            snapshot: before,
            latest,
        };
        self.finish(role, probe, Some(baseline)).await
    }

    /// Let a surface that may already be mid-reply come to rest, then read
    /// its latest message. Used when resuming an existing conversation.
    ///
    /// # Errors
    ///
    /// Fails when the surface shows no non-empty message.
    pub async fn settle(&self, role: &Role, probe: &dyn SurfaceProbe) -> Result<Completion, RelayError> {
        tracing::info!(role = %role, "Settling existing conversation");
        self.finish(role, probe, None).await
    }

    async fn finish(
        &self,
        role: &Role,
        probe: &dyn SurfaceProbe,
        baseline: Option<Baseline>,
    ) -> Result<Completion, RelayError> {
        let mut degraded = Vec::new();
        if !self.wait_for_idle(role, probe).await {
            degraded.push(WaitStage::Busy);
        }
        if !self.wait_for_quiescence(role, probe).await {
            degraded.push(WaitStage::Quiescence);
        }
        let message = self.extract(role, probe, baseline).await?;
        tracing::info!(
            role = %role,
            chars = message.text.chars().count(),
            seq = message.produced_at_seq,
            preview = %message.preview(50),
            "Reply complete"
        );
        Ok(Completion { message, degraded })
    }

    async fn wait_for_arrival(
        &self,
        role: &Role,
        probe: &dyn SurfaceProbe,
        before: SurfaceSnapshot,
    ) -> Result<(), RelayError> {
        let started = Instant::now();
        loop {
            match probe.snapshot().await {
                Ok(now) if now.differs_from(&before) => {
                    tracing::debug!(role = %role, waited_ms = started.elapsed().as_millis(), "Reply started");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(role = %role, error = %e, "Snapshot failed while waiting for arrival"),
            }
            if started.elapsed() >= self.timeouts.arrival {
                tracing::warn!(role = %role, "No reply arrived");
                return Err(RelayError::CompletionTimeout {
                    role: role.clone(),
                    stage: WaitStage::Arrival,
                    waited: self.timeouts.arrival,
                });
            }
            sleep(self.timeouts.poll_interval).await;
        }
    }

    /// Returns false if indicators were still up at the timeout.
    async fn wait_for_idle(&self, role: &Role, probe: &dyn SurfaceProbe) -> bool {
        let started = Instant::now();
        let mut busy = match probe.busy_indicators().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Could not read busy indicators, continuing");
                return true;
            }
        };
        if busy == 0 {
            return true;
        }
        tracing::info!(role = %role, indicators = busy, "Waiting for busy indicators to clear");

        while busy > 0 {
            if started.elapsed() >= self.timeouts.busy {
                tracing::warn!(
                    role = %role,
                    indicators = busy,
                    timeout_ms = self.timeouts.busy.as_millis(),
                    "Busy indicators still up, proceeding anyway"
                );
                return false;
            }
            sleep(self.timeouts.poll_interval).await;
            busy = match probe.busy_indicators().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(role = %role, error = %e, "Busy indicator went stale, continuing");
                    return true;
                }
            };
        }
        true
    }

    /// Returns false if the ceiling forced acceptance. The ceiling is
    /// measured from the start of this stage, not from submission.
    async fn wait_for_quiescence(&self, role: &Role, probe: &dyn SurfaceProbe) -> bool {
        let started = Instant::now();
        let mut last = match probe.snapshot().await {
            Ok(s) => s.rendered_length,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Surface unreadable, assuming stable");
                return true;
            }
        };
        loop {
            sleep(self.timeouts.quiescence_interval).await;
            let current = match probe.snapshot().await {
                Ok(s) => s.rendered_length,
                Err(e) => {
                    tracing::warn!(role = %role, error = %e, "Surface unreadable, assuming stable");
                    return true;
                }
            };
            if current == last {
                return true;
            }
            last = current;
            if started.elapsed() >= self.timeouts.quiescence_ceiling {
                tracing::warn!(role = %role, "Content still changing at ceiling, accepting it");
                return false;
            }
        }
    }

    async fn extract(
        &self,
        role: &Role,
        probe: &dyn SurfaceProbe,
        baseline: Option<Baseline>,
    ) -> Result<Message, RelayError> {
        let snapshot = probe
            .snapshot()
            .await
            .map_err(|e| RelayError::extraction(role, e.to_string()))?;
        let raw = probe
            .read_latest()
            .await
            .map_err(|e| RelayError::extraction(role, e.to_string()))?
            .ok_or_else(|| RelayError::extraction(role, "surface has no messages"))?;

        if let Some(baseline) = baseline {
            let grew = snapshot.element_count > baseline.snapshot.element_count;
            if !grew && baseline.latest.as_deref() == Some(raw.as_str()) {
                return Err(RelayError::extraction(role, "no new message appeared"));
            }
        }

        let text = strip_artifacts(&raw, &self.artifacts);
        if text.is_empty() {
            return Err(RelayError::extraction(role, "reply is empty after cleanup"));
        }
        Ok(Message::new(role.clone(), text, snapshot.element_count))
    }
}
