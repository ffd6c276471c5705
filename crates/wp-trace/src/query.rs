//! Look up runs by agent, status or parent.

use crate::store::{collect_runs, raw_run, TraceStore, RUN_COLUMNS};
use crate::TraceError;
use uuid::Uuid;
use wp_core::trace::{RunRecord, RunStatus};

/// Query parameters for run lookup. Unset fields do not filter.
#[derive(Debug, Default, Clone)]
pub struct RunQuery {
    pub agent: Option<String>,
    pub status: Option<RunStatus>,
    pub parent_run_id: Option<Uuid>,
    /// Only runs started directly by a caller, not by delegation.
    pub top_level_only: bool,
    pub limit: Option<u32>,
}

impl TraceStore {
    /// Matching runs, newest first.
    pub fn query_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>, TraceError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(agent) = &query.agent {
            params.push(agent.clone());
            clauses.push(format!("agent = ?{}", params.len()));
        }
        if let Some(status) = query.status {
            params.push(serde_json::to_string(&status).unwrap_or_default());
            clauses.push(format!("status = ?{}", params.len()));
        }
        if let Some(parent) = query.parent_run_id {
            params.push(parent.to_string());
            clauses.push(format!("parent_run_id = ?{}", params.len()));
        }
        if query.top_level_only {
            clauses.push("parent_run_id IS NULL".into());
        }

        let mut sql = RUN_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY started_at DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), raw_run)
            .map_err(|e| TraceError::Database(e.to_string()))?;
        collect_runs(rows)
    }
}
