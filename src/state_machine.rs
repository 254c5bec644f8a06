//! Relay state machine
//!
//! The pure half of the relay: turn routing, termination detection and the
//! retry-or-rotate decision. Nothing in here touches a surface or sleeps.

pub mod phrases;
pub mod routing;
pub mod state;
pub mod supervisor;


pub use phrases::{strip_artifacts, SafetyPhrases, DEFAULT_ARTIFACTS};
pub use routing::{Predicate, RouteBasis, RouteDecision, RoutingRule, RoutingTable, Topology, TurnRouter};
pub use state::{Message, RelayPhase, RelayState, Role, StartMode};
pub use supervisor::{FailureVerdict, ResilienceSupervisor};
