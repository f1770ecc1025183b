//! Interactive unsubscribe agent: navigate, plan, execute, verify.

pub mod actions;
pub mod interactive;
pub mod planner;
pub mod trace;
pub mod verify;

pub use interactive::{AgentOutcome, InteractiveAgent, UnsubscribeAgent};
pub use trace::{AgentPhase, StepEntry, StepTrace};
