//! Trace types — evidence records for every tool call, approval, and run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::failure::Failure;
use crate::message::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CallId
// ---------------------------------------------------------------------------

/// Run-unique identifier of a tool invocation, used for output addressing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id of the form `call_<12 hex chars>`.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("call_{}", &simple[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tool call status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
    TimedOut,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// ToolOutputRecord — never mutated after insertion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutputRecord {
    pub call_id: CallId,
    pub tool_name: String,
    pub output_value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Approval decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Skip,
    Timeout,
}

impl Decision {
    /// Only an explicit approval lets the call run.
    pub fn allows_execution(&self) -> bool {
        matches!(self, Decision::Approve)
    }

    pub fn as_status(&self) -> ToolCallStatus {
        match self {
            Decision::Approve => ToolCallStatus::Approved,
            Decision::Reject => ToolCallStatus::Rejected,
            Decision::Skip => ToolCallStatus::Skipped,
            Decision::Timeout => ToolCallStatus::TimedOut,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Skip => "skip",
            Decision::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub call_id: CallId,
    pub decision: Decision,
    /// Who resolved the request: a user name, `console`, `timer`, `cancellation`, ...
    pub responder: String,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(call_id: CallId, decision: Decision, responder: impl Into<String>) -> Self {
        Self {
            call_id,
            decision,
            responder: responder.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ToolCallRecord — one row per dispatched tool call
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: CallId,

    /// The run this call belongs to.
    pub run_id: Uuid,

    pub tool_name: String,

    /// Arguments after reference resolution.
    pub arguments: serde_json::Value,

    /// Output (None unless completed).
    pub output: Option<serde_json::Value>,

    /// SHA-256 fingerprint of the effective config the call ran with.
    pub config_fingerprint: String,

    pub status: ToolCallStatus,

    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub duration_ms: Option<i64>,
}

// ---------------------------------------------------------------------------
// Run-level record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    /// Set for delegated child runs.
    pub parent_run_id: Option<Uuid>,
    pub agent: String,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps: u32,
    pub answer: Option<String>,
    pub failure: Option<Failure>,
}

// ---------------------------------------------------------------------------
// RunSink — optional persistence collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
#[error("run sink error: {0}")]
pub struct SinkError(pub String);

/// Receives a finished run's evidence. Nothing is persisted without one.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn record_run(
        &self,
        run: &RunRecord,
        tool_calls: &[ToolCallRecord],
        approvals: &[ApprovalDecision],
    ) -> Result<(), SinkError>;

    /// Only called when the run request explicitly asked for it.
    async fn persist_history(
        &self,
        run_id: Uuid,
        agent: &str,
        history: &[ChatMessage],
    ) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_call_ids_are_unique_and_prefixed() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("call_"));
        assert_eq!(a.as_str().len(), "call_".len() + 12);
    }

    #[test]
    fn only_approve_allows_execution() {
        assert!(Decision::Approve.allows_execution());
        for d in [Decision::Reject, Decision::Skip, Decision::Timeout] {
            assert!(!d.allows_execution());
        }
        assert_eq!(Decision::Timeout.as_status(), ToolCallStatus::TimedOut);
    }

    #[test]
    fn decision_serializes_snake_case() {
        let d = ApprovalDecision::new(CallId::from("abc123"), Decision::Timeout, "timer");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decision"], "timeout");
        assert_eq!(json["call_id"], "abc123");
    }
}
