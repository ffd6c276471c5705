//! SQLite-backed run evidence storage.

use crate::TraceError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;
use wp_core::message::ChatMessage;
use wp_core::trace::{ApprovalDecision, CallId, RunRecord, ToolCallRecord};

/// Trace store backed by a single SQLite database.
/// Uses Mutex<Connection> for thread safety (rusqlite::Connection is !Sync).
pub struct TraceStore {
    conn: Mutex<Connection>,
}

impl TraceStore {
    /// Open (or create) the trace database at the given path.
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        let conn = Connection::open(path).map_err(|e| TraceError::Database(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory trace store (useful for testing).
    pub fn in_memory() -> Result<Self, TraceError> {
        let conn = Connection::open_in_memory().map_err(|e| TraceError::Database(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, TraceError> {
        self.conn.lock().map_err(|e| TraceError::Database(e.to_string()))
    }

    fn initialize_schema(&self) -> Result<(), TraceError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                parent_run_id TEXT,
                agent TEXT NOT NULL,
                message TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                steps INTEGER NOT NULL,
                answer TEXT,
                failure_json TEXT
            );

            CREATE TABLE IF NOT EXISTS tool_calls (
                run_id TEXT NOT NULL,
                call_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments_json TEXT NOT NULL,
                output_json TEXT,
                config_fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                PRIMARY KEY (run_id, call_id)
            );

            CREATE TABLE IF NOT EXISTS approvals (
                run_id TEXT NOT NULL,
                call_id TEXT NOT NULL,
                decision TEXT NOT NULL,
                responder TEXT NOT NULL,
                decided_at TEXT NOT NULL,
                PRIMARY KEY (run_id, call_id)
            );

            CREATE TABLE IF NOT EXISTS chat_history (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                agent TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_runs_parent ON runs(parent_run_id);
            CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs(agent);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_tool ON tool_calls(tool_name);",
        )
        .map_err(|e| TraceError::Database(e.to_string()))?;
        Ok(())
    }

    /// Store a finished run with its tool calls and approval log in one
    /// transaction. Re-recording a run id is rejected.
    pub fn insert_run(
        &self,
        run: &RunRecord,
        tool_calls: &[ToolCallRecord],
        approvals: &[ApprovalDecision],
    ) -> Result<(), TraceError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let run_id = run.run_id.to_string();

        tx.execute(
            "INSERT INTO runs (
                run_id, parent_run_id, agent, message, started_at,
                completed_at, status, steps, answer, failure_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                run_id,
                run.parent_run_id.map(|id| id.to_string()),
                run.agent,
                run.message,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&run.status).unwrap_or_default(),
                run.steps,
                run.answer,
                run.failure
                    .as_ref()
                    .map(|f| serde_json::to_string(f).unwrap_or_default()),
            ],
        )
        .map_err(|e| TraceError::Database(e.to_string()))?;

        for call in tool_calls {
            tx.execute(
                "INSERT INTO tool_calls (
                    run_id, call_id, tool_name, arguments_json, output_json,
                    config_fingerprint, status, error, started_at, completed_at, duration_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    run_id,
                    call.call_id.as_str(),
                    call.tool_name,
                    call.arguments.to_string(),
                    call.output.as_ref().map(|v| v.to_string()),
                    call.config_fingerprint,
                    serde_json::to_string(&call.status).unwrap_or_default(),
                    call.error,
                    call.started_at.to_rfc3339(),
                    call.completed_at.map(|t| t.to_rfc3339()),
                    call.duration_ms,
                ],
            )
            .map_err(|e| TraceError::Database(e.to_string()))?;
        }

        for approval in approvals {
            tx.execute(
                "INSERT INTO approvals (run_id, call_id, decision, responder, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    run_id,
                    approval.call_id.as_str(),
                    serde_json::to_string(&approval.decision).unwrap_or_default(),
                    approval.responder,
                    approval.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| TraceError::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| TraceError::Database(e.to_string()))?;
        tracing::debug!(
            run_id = %run.run_id,
            tool_calls = tool_calls.len(),
            approvals = approvals.len(),
            "run trace stored"
        );
        Ok(())
    }

    /// Replace the stored history of a run.
    pub fn insert_history(
        &self,
        run_id: Uuid,
        agent: &str,
        history: &[ChatMessage],
    ) -> Result<(), TraceError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| TraceError::Database(e.to_string()))?;
        tx.execute(
            "DELETE FROM chat_history WHERE run_id = ?1",
            rusqlite::params![run_id.to_string()],
        )
        .map_err(|e| TraceError::Database(e.to_string()))?;
        for (seq, message) in history.iter().enumerate() {
            tx.execute(
                "INSERT INTO chat_history (run_id, seq, agent, role, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    run_id.to_string(),
                    seq as i64,
                    agent,
                    serde_json::to_string(&message.role).unwrap_or_default(),
                    message.content,
                ],
            )
            .map_err(|e| TraceError::Database(e.to_string()))?;
        }
        tx.commit().map_err(|e| TraceError::Database(e.to_string()))
    }

    /// Query a single run by its ID.
    pub fn run(&self, run_id: Uuid) -> Result<Option<RunRecord>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("{RUN_COLUMNS} WHERE run_id = ?1"))
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let mut rows = stmt
            .query_map(rusqlite::params![run_id.to_string()], raw_run)
            .map_err(|e| TraceError::Database(e.to_string()))?;
        match rows.next() {
            Some(row) => {
                let raw = row.map_err(|e| TraceError::Database(e.to_string()))?;
                Ok(Some(raw.into_record()?))
            }
            None => Ok(None),
        }
    }

    /// Delegated child runs of `parent`, oldest first.
    pub fn child_runs(&self, parent: Uuid) -> Result<Vec<RunRecord>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{RUN_COLUMNS} WHERE parent_run_id = ?1 ORDER BY started_at ASC"
            ))
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![parent.to_string()], raw_run)
            .map_err(|e| TraceError::Database(e.to_string()))?;
        collect_runs(rows)
    }

    /// Tool calls of one run in dispatch order.
    pub fn tool_calls(&self, run_id: Uuid) -> Result<Vec<ToolCallRecord>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT call_id, tool_name, arguments_json, output_json, config_fingerprint,
                        status, error, started_at, completed_at, duration_ms
                 FROM tool_calls WHERE run_id = ?1
                 ORDER BY started_at ASC, rowid ASC",
            )
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                ))
            })
            .map_err(|e| TraceError::Database(e.to_string()))?;

        let mut calls = Vec::new();
        for row in rows {
            let (call_id, tool_name, arguments, output, fingerprint, status, error, started, completed, duration_ms) =
                row.map_err(|e| TraceError::Database(e.to_string()))?;
            calls.push(ToolCallRecord {
                call_id: CallId::new(call_id),
                run_id,
                tool_name,
                arguments: parse_json("arguments_json", &arguments)?,
                output: output.map(|s| parse_json("output_json", &s)).transpose()?,
                config_fingerprint: fingerprint,
                status: parse_json("status", &status)?,
                error,
                started_at: parse_time("started_at", &started)?,
                completed_at: completed.map(|s| parse_time("completed_at", &s)).transpose()?,
                duration_ms,
            });
        }
        Ok(calls)
    }

    /// Approval decisions of one run in decision order.
    pub fn approvals(&self, run_id: Uuid) -> Result<Vec<ApprovalDecision>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT call_id, decision, responder, decided_at
                 FROM approvals WHERE run_id = ?1
                 ORDER BY decided_at ASC, rowid ASC",
            )
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| TraceError::Database(e.to_string()))?;

        let mut approvals = Vec::new();
        for row in rows {
            let (call_id, decision, responder, decided_at) =
                row.map_err(|e| TraceError::Database(e.to_string()))?;
            approvals.push(ApprovalDecision {
                call_id: CallId::new(call_id),
                decision: parse_json("decision", &decision)?,
                responder,
                timestamp: parse_time("decided_at", &decided_at)?,
            });
        }
        Ok(approvals)
    }

    /// Persisted chat history of a run; empty unless it was saved explicitly.
    pub fn history(&self, run_id: Uuid) -> Result<Vec<ChatMessage>, TraceError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT role, content FROM chat_history WHERE run_id = ?1 ORDER BY seq ASC")
            .map_err(|e| TraceError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![run_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| TraceError::Database(e.to_string()))?;

        let mut history = Vec::new();
        for row in rows {
            let (role, content) = row.map_err(|e| TraceError::Database(e.to_string()))?;
            history.push(ChatMessage::new(parse_json("role", &role)?, content));
        }
        Ok(history)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) const RUN_COLUMNS: &str = "SELECT run_id, parent_run_id, agent, message, started_at,
        completed_at, status, steps, answer, failure_json
 FROM runs";

/// Internal row struct for SQLite queries.
pub(crate) struct RawRunRow {
    run_id: String,
    parent_run_id: Option<String>,
    agent: String,
    message: String,
    started_at: String,
    completed_at: Option<String>,
    status: String,
    steps: u32,
    answer: Option<String>,
    failure_json: Option<String>,
}

pub(crate) fn raw_run(row: &Row<'_>) -> rusqlite::Result<RawRunRow> {
    Ok(RawRunRow {
        run_id: row.get(0)?,
        parent_run_id: row.get(1)?,
        agent: row.get(2)?,
        message: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        status: row.get(6)?,
        steps: row.get(7)?,
        answer: row.get(8)?,
        failure_json: row.get(9)?,
    })
}

impl RawRunRow {
    fn into_record(self) -> Result<RunRecord, TraceError> {
        Ok(RunRecord {
            run_id: parse_uuid("run_id", &self.run_id)?,
            parent_run_id: self
                .parent_run_id
                .map(|s| parse_uuid("parent_run_id", &s))
                .transpose()?,
            agent: self.agent,
            message: self.message,
            started_at: parse_time("started_at", &self.started_at)?,
            completed_at: self
                .completed_at
                .map(|s| parse_time("completed_at", &s))
                .transpose()?,
            status: parse_json("status", &self.status)?,
            steps: self.steps,
            answer: self.answer,
            failure: self
                .failure_json
                .map(|s| parse_json("failure_json", &s))
                .transpose()?,
        })
    }
}

pub(crate) fn collect_runs(
    rows: impl Iterator<Item = rusqlite::Result<RawRunRow>>,
) -> Result<Vec<RunRecord>, TraceError> {
    let mut runs = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| TraceError::Database(e.to_string()))?;
        runs.push(raw.into_record()?);
    }
    Ok(runs)
}

fn parse_err(field: &str, e: impl std::fmt::Display) -> TraceError {
    TraceError::Database(format!("{field}: {e}"))
}

fn parse_uuid(field: &str, s: &str) -> Result<Uuid, TraceError> {
    s.parse().map_err(|e: uuid::Error| parse_err(field, e))
}

fn parse_time(field: &str, s: &str) -> Result<DateTime<Utc>, TraceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| parse_err(field, e))
}

fn parse_json<T: DeserializeOwned>(field: &str, s: &str) -> Result<T, TraceError> {
    serde_json::from_str(s).map_err(|e| parse_err(field, e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use wp_core::failure::{Component, Failure, FailureKind};
    use wp_core::message::Role;
    use wp_core::trace::{Decision, RunStatus, ToolCallStatus};

    pub(crate) fn sample_run(parent: Option<Uuid>, agent: &str, status: RunStatus) -> RunRecord {
        RunRecord {
            run_id: Uuid::new_v4(),
            parent_run_id: parent,
            agent: agent.into(),
            message: "What's the weather in Tokyo?".into(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            status,
            steps: 2,
            answer: (status == RunStatus::Completed).then(|| "Tokyo is 21C".to_string()),
            failure: (status == RunStatus::Failed).then(|| {
                Failure::new(Component::ExecutionEngine, FailureKind::StepLimitExceeded, "max_steps=3")
                    .with_config_key("max_steps")
            }),
        }
    }

    pub(crate) fn sample_call(run_id: Uuid, id: &str, status: ToolCallStatus) -> ToolCallRecord {
        ToolCallRecord {
            call_id: CallId::from(id),
            run_id,
            tool_name: "get_weather".into(),
            arguments: json!({"city": "Tokyo"}),
            output: (status == ToolCallStatus::Completed).then(|| json!({"temp_c": 21})),
            config_fingerprint: "abc".into(),
            status,
            error: None,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms: Some(3),
        }
    }

    #[test]
    fn insert_and_query() {
        let store = TraceStore::in_memory().unwrap();
        let run = sample_run(None, "weather", RunStatus::Completed);
        let calls = vec![
            sample_call(run.run_id, "call_1", ToolCallStatus::Completed),
            sample_call(run.run_id, "call_2", ToolCallStatus::TimedOut),
        ];
        let approvals = vec![ApprovalDecision::new(CallId::from("call_2"), Decision::Timeout, "timer")];
        store.insert_run(&run, &calls, &approvals).unwrap();

        let found = store.run(run.run_id).unwrap().unwrap();
        assert_eq!(found.agent, "weather");
        assert_eq!(found.answer.as_deref(), Some("Tokyo is 21C"));
        assert_eq!(found.status, RunStatus::Completed);

        let stored_calls = store.tool_calls(run.run_id).unwrap();
        assert_eq!(stored_calls.len(), 2);
        assert_eq!(stored_calls[0].output, Some(json!({"temp_c": 21})));
        assert_eq!(stored_calls[1].status, ToolCallStatus::TimedOut);

        let stored_approvals = store.approvals(run.run_id).unwrap();
        assert_eq!(stored_approvals[0].decision, Decision::Timeout);
        assert_eq!(stored_approvals[0].responder, "timer");

        assert!(store.run(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn failures_and_children_round_trip() {
        let store = TraceStore::in_memory().unwrap();
        let parent = sample_run(None, "coordinator", RunStatus::Completed);
        let child = sample_run(Some(parent.run_id), "math", RunStatus::Failed);
        store.insert_run(&parent, &[], &[]).unwrap();
        store.insert_run(&child, &[], &[]).unwrap();

        let children = store.child_runs(parent.run_id).unwrap();
        assert_eq!(children.len(), 1);
        let failure = children[0].failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::StepLimitExceeded);
        assert_eq!(failure.config_key.as_deref(), Some("max_steps"));
    }

    #[test]
    fn recording_a_run_twice_is_rejected() {
        let store = TraceStore::in_memory().unwrap();
        let run = sample_run(None, "a", RunStatus::Completed);
        store.insert_run(&run, &[], &[]).unwrap();
        assert!(matches!(store.insert_run(&run, &[], &[]), Err(TraceError::Database(_))));
    }

    #[test]
    fn history_keeps_order() {
        let store = TraceStore::in_memory().unwrap();
        let run_id = Uuid::new_v4();
        assert!(store.history(run_id).unwrap().is_empty());
        store
            .insert_history(
                run_id,
                "a",
                &[ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            )
            .unwrap();
        let history = store.history(run_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.db");
        let run = sample_run(None, "a", RunStatus::Completed);
        TraceStore::open(&path).unwrap().insert_run(&run, &[], &[]).unwrap();
        assert!(TraceStore::open(&path).unwrap().run(run.run_id).unwrap().is_some());
    }
}
