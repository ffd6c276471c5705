//! Trace export — a run with its evidence and delegated children as JSON.

use crate::store::TraceStore;
use crate::TraceError;
use serde::Serialize;
use uuid::Uuid;
use wp_core::message::ChatMessage;
use wp_core::trace::{ApprovalDecision, RunRecord, ToolCallRecord};

#[derive(Debug, Clone, Serialize)]
pub struct RunTrace {
    pub run: RunRecord,
    pub tool_calls: Vec<ToolCallRecord>,
    pub approvals: Vec<ApprovalDecision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RunTrace>,
}

impl TraceStore {
    /// Load a run tree. Delegation graphs are acyclic, so the recursion ends.
    pub fn run_trace(&self, run_id: Uuid) -> Result<RunTrace, TraceError> {
        let run = self
            .run(run_id)?
            .ok_or_else(|| TraceError::RunNotFound(run_id.to_string()))?;
        let children = self
            .child_runs(run_id)?
            .into_iter()
            .map(|child| self.run_trace(child.run_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunTrace {
            tool_calls: self.tool_calls(run_id)?,
            approvals: self.approvals(run_id)?,
            history: self.history(run_id)?,
            run,
            children,
        })
    }
}

/// Export a run tree to a JSON string.
pub fn export_json(trace: &RunTrace) -> Result<String, TraceError> {
    serde_json::to_string_pretty(trace).map_err(|e| TraceError::Export(e.to_string()))
}
