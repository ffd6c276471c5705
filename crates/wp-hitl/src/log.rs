//! Append-only record of every decision in one run.

use crate::HitlError;
use std::sync::RwLock;
use wp_core::trace::{ApprovalDecision, CallId};

/// Written only by the gate; observers read snapshots.
#[derive(Debug, Default)]
pub struct ApprovalLog {
    entries: RwLock<Vec<ApprovalDecision>>,
}

impl ApprovalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, decision: ApprovalDecision) -> Result<(), HitlError> {
        let mut entries = self.entries.write().map_err(|_| HitlError::LockPoisoned)?;
        entries.push(decision);
        Ok(())
    }

    pub fn decision_for(&self, call_id: &CallId) -> Result<Option<ApprovalDecision>, HitlError> {
        let entries = self.entries.read().map_err(|_| HitlError::LockPoisoned)?;
        Ok(entries.iter().find(|d| &d.call_id == call_id).cloned())
    }

    pub fn snapshot(&self) -> Result<Vec<ApprovalDecision>, HitlError> {
        let entries = self.entries.read().map_err(|_| HitlError::LockPoisoned)?;
        Ok(entries.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
