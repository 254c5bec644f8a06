//! Relay Station
//!
//! Relays messages between independent chat surfaces until one of them
//! declares the task complete, recovering from flaky surfaces by retrying
//! and rotating its session identity.

pub mod config;
pub mod error;
pub mod identity;
pub mod probe;
pub mod runtime;
pub mod state_machine;
