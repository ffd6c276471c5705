//! Per-run tool output store, addressable by call id.

use crate::RunnerError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use wp_core::trace::{CallId, ToolOutputRecord};

#[derive(Debug, Default)]
struct Entries {
    records: Vec<ToolOutputRecord>,
    index: HashMap<CallId, usize>,
}

/// Owned by exactly one `RunContext`. Writes are serialized by the run loop;
/// observers read through the same lock, so a read never sees a half-written
/// entry.
#[derive(Debug, Default)]
pub struct ToolOutputStore {
    entries: RwLock<Entries>,
}

impl ToolOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an output. An existing call id is never overwritten.
    pub fn put(
        &self,
        call_id: CallId,
        tool_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), RunnerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.index.contains_key(&call_id) {
            return Err(RunnerError::DuplicateCallId(call_id));
        }
        let position = entries.records.len();
        entries.index.insert(call_id.clone(), position);
        entries.records.push(ToolOutputRecord {
            call_id,
            tool_name: tool_name.into(),
            output_value: value,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// `None` is the NotFound case.
    pub fn get(&self, call_id: &CallId) -> Option<serde_json::Value> {
        self.record(call_id).map(|r| r.output_value)
    }

    pub fn record(&self, call_id: &CallId) -> Option<ToolOutputRecord> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .index
            .get(call_id)
            .and_then(|&i| entries.records.get(i))
            .cloned()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.index.contains_key(call_id)
    }

    /// All records in insertion order.
    pub fn snapshot(&self) -> Vec<ToolOutputRecord> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.records.clone()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
