//! Application state shared across all commands.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use wp_memory::SqliteMemoryStore;
use wp_trace::TraceStore;

pub struct AppState {
    /// Trace store (SQLite).
    pub trace_store: Arc<TraceStore>,

    /// Memory collaborator (SQLite).
    pub memory: Arc<SqliteMemoryStore>,

    /// Data directory for the app.
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open traces.db and memory.db under `data_dir`, creating it if needed.
    pub fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let trace_store = TraceStore::open(&data_dir.join("traces.db"))
            .context("failed to open trace store")?;
        let memory = SqliteMemoryStore::open(&data_dir.join("memory.db"))
            .context("failed to open memory store")?;
        Ok(Self {
            trace_store: Arc::new(trace_store),
            memory: Arc::new(memory),
            data_dir,
        })
    }
}

pub fn default_data_dir() -> PathBuf {
    std::env::var_os("WAYPOINT_DATA_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|p| p.join("waypoint")))
        .unwrap_or_else(|| PathBuf::from(".waypoint"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_both_databases() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().join("data")).unwrap();
        assert!(state.data_dir.join("traces.db").exists());
        assert!(state.data_dir.join("memory.db").exists());
    }
}
