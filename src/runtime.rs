//! Runtime for relaying messages between live surfaces
//!
//! The effectful half of the relay: probes, completion detection, the
//! relay loop and its event stream.

mod detector;
mod event;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use detector::{Completion, CompletionDetector};
pub use event::{RelayEnvelope, RelayEvent, RunOutcome};
pub use executor::RelayLoop;
pub use traits::*;
