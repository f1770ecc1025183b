//! Unsubscribe resolution: extraction, one-click, and the per-message strategy chain.

pub mod links;
pub mod one_click;
pub mod orchestrator;
pub mod types;

pub use links::extract_links;
pub use one_click::{OneClickExecutor, OneClickResult, OneClickSender, is_one_click};
pub use orchestrator::Orchestrator;
pub use types::{
    AttemptRecord, AttemptStatus, FailureCode, FailureReason, UnsubscribeLinks, UnsubscribeMethod,
    UnsubscribeOutcome,
};
