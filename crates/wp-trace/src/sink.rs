//! `RunSink` over the SQLite store.

use crate::store::TraceStore;
use async_trait::async_trait;
use uuid::Uuid;
use wp_core::message::ChatMessage;
use wp_core::trace::{ApprovalDecision, RunRecord, RunSink, SinkError, ToolCallRecord};

#[async_trait]
impl RunSink for TraceStore {
    async fn record_run(
        &self,
        run: &RunRecord,
        tool_calls: &[ToolCallRecord],
        approvals: &[ApprovalDecision],
    ) -> Result<(), SinkError> {
        self.insert_run(run, tool_calls, approvals)
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn persist_history(
        &self,
        run_id: Uuid,
        agent: &str,
        history: &[ChatMessage],
    ) -> Result<(), SinkError> {
        self.insert_history(run_id, agent, history)
            .map_err(|e| SinkError(e.to_string()))
    }
}
