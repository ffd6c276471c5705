//! Per-call approval state machine.
//!
//! `Pending` is initial; `Approved`, `Rejected`, `Skipped` and `TimedOut`
//! are terminal.

use crate::HitlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use wp_core::trace::{CallId, Decision};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Skipped,
    TimedOut,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Pending)
    }

    /// Terminal state reached by a decision.
    pub fn for_decision(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalState::Approved,
            Decision::Reject => ApprovalState::Rejected,
            Decision::Skip => ApprovalState::Skipped,
            Decision::Timeout => ApprovalState::TimedOut,
        }
    }

    /// Apply a decision. Only `Pending` may transition.
    pub fn resolve(self, call_id: &CallId, decision: Decision) -> Result<Self, HitlError> {
        let to = Self::for_decision(decision);
        if self.is_terminal() {
            return Err(HitlError::InvalidTransition {
                call_id: call_id.to_string(),
                from: self,
                to,
            });
        }
        Ok(to)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Skipped => "skipped",
            ApprovalState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}
