//! wp-trace: Run evidence storage backed by SQLite.

pub mod export;
pub mod query;
pub mod sink;
pub mod store;

pub use export::{export_json, RunTrace};
pub use query::RunQuery;
pub use store::TraceStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("database error: {0}")]
    Database(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("export error: {0}")]
    Export(String),
}
