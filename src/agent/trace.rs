//! Step trace for the interactive agent.
//!
//! Every phase of an attempt appends a `StepEntry`. The trace is returned
//! with the outcome whether the attempt succeeded or not, and ends up in the
//! attempt record's detail payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the interactive agent's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Init,
    Navigate,
    PreVerify,
    Plan,
    Execute,
    PostVerify,
    DoneSuccess,
    DoneFailure,
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Navigate => "navigate",
            Self::PreVerify => "pre_verify",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::PostVerify => "post_verify",
            Self::DoneSuccess => "done_success",
            Self::DoneFailure => "done_failure",
        };
        write!(f, "{}", s)
    }
}

/// One entry in the step trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    /// Which phase produced the entry.
    #[serde(rename = "type")]
    pub phase: AgentPhase,
    /// Round number (1-based), absent for phases outside the round loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    /// Phase-specific diagnostics.
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Ordered, append-only step trace.
#[derive(Debug, Clone, Default)]
pub struct StepTrace {
    entries: Vec<StepEntry>,
}

impl StepTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, phase: AgentPhase, detail: serde_json::Value) {
        self.entries.push(StepEntry {
            phase,
            round: None,
            detail,
            at: Utc::now(),
        });
    }

    pub fn push_round(&mut self, phase: AgentPhase, round: u32, detail: serde_json::Value) {
        self.entries.push(StepEntry {
            phase,
            round: Some(round),
            detail,
            at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count entries for a given phase.
    pub fn count(&self, phase: AgentPhase) -> usize {
        self.entries.iter().filter(|e| e.phase == phase).count()
    }

    pub fn last_phase(&self) -> Option<AgentPhase> {
        self.entries.last().map(|e| e.phase)
    }

    pub fn into_entries(self) -> Vec<StepEntry> {
        self.entries
    }
}
