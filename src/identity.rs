//! Session identity: seeded persona plus the submission task lock
//!
//! An identity is derived wholesale from a seed and replaced wholesale on
//! rotation. Its random source is the only source of non-determinism in the
//! relay; rotation builds a new one instead of reseeding in place.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Behavioural profile chosen by the seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    NewUser,
    ExperiencedUser,
}

impl Persona {
    pub const ALL: [Persona; 2] = [Persona::NewUser, Persona::ExperiencedUser];

    #[must_use]
    pub fn params(self) -> BehavioralParams {
        match self {
            Persona::NewUser => BehavioralParams {
                typo_probability: 0.05,
                idle_trigger_probability: 0.30,
            },
            Persona::ExperiencedUser => BehavioralParams {
                typo_probability: 0.015,
                idle_trigger_probability: 0.15,
            },
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::NewUser => "new_user",
            Persona::ExperiencedUser => "experienced_user",
        }
    }
}

/// Parameters consumed by the input-synthesis collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BehavioralParams {
    pub typo_probability: f64,
    pub idle_trigger_probability: f64,
}

#[derive(Debug)]
pub struct SessionIdentity {
    seed: u64,
    persona: Persona,
    params: BehavioralParams,
    rng: StdRng,
    task_lock: TaskLock,
}

/// Build an identity from a seed. Same seed, same identity.
#[must_use]
pub fn derive_identity(seed: u64) -> SessionIdentity {
    let mut rng = StdRng::seed_from_u64(seed);
    let persona = Persona::ALL[rng.gen_range(0..Persona::ALL.len())];
    SessionIdentity {
        seed,
        persona,
        params: persona.params(),
        rng,
        task_lock: TaskLock::default(),
    }
}

impl SessionIdentity {
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn persona(&self) -> Persona {
        self.persona
    }

    #[must_use]
    pub fn params(&self) -> BehavioralParams {
        self.params
    }

    /// Stable display id for status surfaces
    #[must_use]
    pub fn session_id(&self) -> String {
        format!("{:016x}", self.seed)
    }

    #[must_use]
    pub fn task_lock(&self) -> &TaskLock {
        &self.task_lock
    }

    /// Uniform draw from `[min, max]`, millisecond resolution
    pub fn draw_cooldown(&mut self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
        let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.gen_range(lo..=hi))
    }

    /// A fresh identity with a different seed drawn from this one's source.
    pub fn successor(&mut self) -> SessionIdentity {
        loop {
            let seed: u64 = self.rng.gen();
            if seed != self.seed {
                return derive_identity(seed);
            }
        }
    }
}

/// Re-entrancy flag marking an in-flight submission
#[derive(Debug, Default)]
pub struct TaskLock {
    held: AtomicBool,
}

impl TaskLock {
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Take the lock for the current scope; `None` if a submission is
    /// already in flight.
    #[must_use]
    pub fn acquire(&self) -> Option<TaskLockGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TaskLockGuard { lock: self })
    }
}

/// Releases the task lock on every exit path, including a dropped future.
pub struct TaskLockGuard<'a> {
    lock: &'a TaskLock,
}

impl Drop for TaskLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
