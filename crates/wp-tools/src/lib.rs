//! wp-tools: Tool collaborators — the `Tool` contract, closure tools, a
//! registry, timeout-bounded invocation, and native local tools.

pub mod local;
pub mod registry;
pub mod timeout;

pub use registry::ToolRegistry;
pub use timeout::invoke;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use wp_core::config::EffectiveConfig;
use wp_core::message::FileRef;
use wp_core::tool::ToolDescriptor;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("duplicate tool name: {0}")]
    Duplicate(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool {tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: f64 },
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("path not allowed: {0}")]
    PathNotAllowed(PathBuf),
    #[error("io error: {0}")]
    Io(String),
}

/// Per-call facts a tool may need beyond its arguments and config.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent: String,
    /// Files attached to the run.
    pub files: Arc<Vec<FileRef>>,
}

impl ToolContext {
    pub fn new(agent: impl Into<String>, files: Arc<Vec<FileRef>>) -> Self {
        Self {
            agent: agent.into(),
            files,
        }
    }
}

/// A tool collaborator: declared contract plus `run(arguments, effective_config)`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn run(
        &self,
        arguments: serde_json::Value,
        config: &EffectiveConfig,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

type ToolFn =
    dyn Fn(serde_json::Value, &EffectiveConfig) -> Result<serde_json::Value, ToolError> + Send + Sync;

/// Synchronous closure wrapped as a [`Tool`].
pub struct FnTool {
    descriptor: ToolDescriptor,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(descriptor: ToolDescriptor, func: F) -> Self
    where
        F: Fn(serde_json::Value, &EffectiveConfig) -> Result<serde_json::Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            descriptor,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        arguments: serde_json::Value,
        config: &EffectiveConfig,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        (self.func)(arguments, config)
    }
}
