//! wp-runner: Execution engine — per-run output store, reference
//! resolution, agent graph assembly, delegation and the step loop.

pub mod agents;
pub mod budget;
pub mod context;
pub mod delegation;
pub mod engine;
pub mod events;
pub mod pii;
pub mod planner;
pub mod references;
pub mod store;

pub use agents::{AgentGraph, AgentGraphBuilder, AgentId};
pub use delegation::{DelegationOutcome, DelegationResult, DelegationTask};
pub use engine::{RunOutcome, RunRequest, Runtime, RuntimeBuilder};
pub use events::{RunEvent, RunEventKind};
pub use planner::{FnPlanner, Observation, Planner, PlannerError, PlannerInput, Step, ToolResult};
pub use references::resolve_references;
pub use store::ToolOutputStore;

use std::time::Duration;
use thiserror::Error;
use wp_config::ConfigError;
use wp_core::failure::{Component, Failure, FailureKind};
use wp_core::trace::CallId;
use wp_hitl::HitlError;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("duplicate call id: {0}")]
    DuplicateCallId(CallId),
    #[error("unresolved tool output reference: {0}")]
    UnresolvedReference(CallId),
    #[error("placeholder pattern failed to build: {0}")]
    Pattern(String),
    #[error("cyclic delegation: {}", .0.join(" -> "))]
    CyclicDelegation(Vec<String>),
    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent {agent} references unknown tool {tool}")]
    UnknownTool { agent: String, tool: String },
    #[error("agent {agent} references unknown MCP connector {mcp}")]
    UnknownMcp { agent: String, mcp: String },
    #[error("connector {mcp} failed: {message}")]
    Connector { mcp: String, message: String },
    #[error("step limit exceeded: max_steps={0}")]
    StepLimitExceeded(u32),
    #[error("run timed out after {0:?}")]
    RunTimeout(Duration),
    #[error("planner error: {0}")]
    Planner(String),
    #[error("approval gate error: {0}")]
    Hitl(#[from] HitlError),
    #[error("run cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Structured failure naming component, kind and reproduction context.
    pub fn into_failure(self) -> Failure {
        let message = self.to_string();
        match self {
            RunnerError::Config(e) => {
                let failure =
                    Failure::new(Component::ConfigResolver, FailureKind::ConfigValidationError, message);
                match e.key() {
                    Some(key) => failure.with_config_key(key),
                    None => failure,
                }
            }
            RunnerError::DuplicateCallId(id) => {
                Failure::new(Component::ToolOutputStore, FailureKind::DuplicateCallId, message)
                    .with_call_id(id)
            }
            RunnerError::UnresolvedReference(id) => Failure::new(
                Component::ReferenceResolver,
                FailureKind::UnresolvedToolOutputReference,
                message,
            )
            .with_call_id(id),
            RunnerError::Pattern(_) => Failure::new(
                Component::ReferenceResolver,
                FailureKind::UnresolvedToolOutputReference,
                message,
            ),
            RunnerError::CyclicDelegation(_) => Failure::new(
                Component::DelegationCoordinator,
                FailureKind::CyclicDelegationError,
                message,
            ),
            RunnerError::DuplicateAgent(_) | RunnerError::UnknownAgent(_) => {
                Failure::new(Component::DelegationCoordinator, FailureKind::ConfigValidationError, message)
                    .with_config_key("agents")
            }
            RunnerError::UnknownTool { tool, .. } => {
                Failure::new(Component::ExecutionEngine, FailureKind::ConfigValidationError, message)
                    .with_tool(tool)
                    .with_config_key("tools")
            }
            RunnerError::UnknownMcp { .. } => {
                Failure::new(Component::ExecutionEngine, FailureKind::ConfigValidationError, message)
                    .with_config_key("mcps")
            }
            RunnerError::Connector { mcp, .. } => {
                Failure::new(Component::ExecutionEngine, FailureKind::ToolExecutionError, message)
                    .with_tool(mcp)
            }
            RunnerError::StepLimitExceeded(_) => {
                Failure::new(Component::ExecutionEngine, FailureKind::StepLimitExceeded, message)
                    .with_config_key("max_steps")
            }
            RunnerError::RunTimeout(_) => {
                Failure::new(Component::ExecutionEngine, FailureKind::RunTimeout, message)
                    .with_config_key("run_timeout_seconds")
            }
            RunnerError::Planner(_) => {
                Failure::new(Component::Planner, FailureKind::PlannerError, message)
            }
            RunnerError::Hitl(HitlError::InvalidTransition { call_id, .. }) => {
                Failure::new(Component::ApprovalGate, FailureKind::ToolExecutionError, message)
                    .with_call_id(CallId::new(call_id))
            }
            RunnerError::Hitl(_) => {
                Failure::new(Component::ApprovalGate, FailureKind::ToolExecutionError, message)
            }
            RunnerError::Cancelled => {
                Failure::new(Component::ExecutionEngine, FailureKind::Cancelled, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_failures_carry_the_key() {
        let failure = RunnerError::Config(ConfigError::Validation {
            entity: "tool:formatter".into(),
            key: "max_results".into(),
            expected: "integer".into(),
            received: "string".into(),
        })
        .into_failure();
        assert_eq!(failure.component, Component::ConfigResolver);
        assert_eq!(failure.kind, FailureKind::ConfigValidationError);
        assert_eq!(failure.config_key.as_deref(), Some("max_results"));
    }

    #[test]
    fn unresolved_reference_names_call_id() {
        let failure = RunnerError::UnresolvedReference(CallId::from("abc123")).into_failure();
        assert_eq!(failure.kind, FailureKind::UnresolvedToolOutputReference);
        assert_eq!(failure.component, Component::ReferenceResolver);
        assert_eq!(failure.call_id, Some(CallId::from("abc123")));
    }

    #[test]
    fn cycle_message_shows_path() {
        let err = RunnerError::CyclicDelegation(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "cyclic delegation: a -> b -> a");
        assert_eq!(err.into_failure().kind, FailureKind::CyclicDelegationError);
    }
}
