//! Controlling logic contract — the opaque decision function that picks the
//! next step of a run.

use crate::delegation::{DelegationResult, DelegationTask};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wp_config::AgentSettings;
use wp_core::memory::MemoryEntry;
use wp_core::message::{ChatMessage, FileRef};
use wp_core::tool::ToolDescriptor;
use wp_core::trace::{CallId, Decision};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Delegate(DelegationTask),
    /// Independent delegations run concurrently, one task per child.
    DelegateMany { tasks: Vec<DelegationTask> },
    FinalAnswer { text: String },
}

impl Step {
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Step::ToolCall {
            name: name.into(),
            arguments,
        }
    }

    pub fn delegate(agent: impl Into<String>, subtask: impl Into<String>) -> Self {
        Step::Delegate(DelegationTask::new(agent, subtask))
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Step::FinalAnswer { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Observations fed back to the planner
// ---------------------------------------------------------------------------

/// Result of a tool step as the planner sees it. Non-execution keeps the
/// distinct decision kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Completed { output: serde_json::Value },
    NotExecuted { decision: Decision },
    Failed { message: String },
}

impl ToolResult {
    pub fn output(&self) -> Option<&serde_json::Value> {
        match self {
            ToolResult::Completed { output } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    Tool {
        call_id: CallId,
        tool_name: String,
        arguments: serde_json::Value,
        result: ToolResult,
        /// `$tool_output.<call_id>`, offered when output sharing is on.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Delegation(DelegationResult),
}

impl Observation {
    pub fn tool_result(&self) -> Option<&ToolResult> {
        match self {
            Observation::Tool { result, .. } => Some(result),
            Observation::Delegation(_) => None,
        }
    }

    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Observation::Tool { call_id, .. } => Some(call_id),
            Observation::Delegation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Planner input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SubAgentInfo {
    pub name: String,
    pub description: String,
}

/// Everything the planner may consult for one decision.
#[derive(Debug, Clone, Copy)]
pub struct PlannerInput<'a> {
    pub agent: &'a str,
    pub instruction: &'a str,
    pub message: &'a str,
    pub step: u32,
    pub tools: &'a [ToolDescriptor],
    pub sub_agents: &'a [SubAgentInfo],
    pub history: &'a [ChatMessage],
    pub observations: &'a [Observation],
    pub files: &'a [FileRef],
    pub memories: &'a [MemoryEntry],
    pub settings: &'a AgentSettings,
}

impl PlannerInput<'_> {
    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &Observation> {
        self.observations
            .iter()
            .filter(|o| matches!(o, Observation::Tool { .. }))
    }

    pub fn delegations(&self) -> impl Iterator<Item = &DelegationResult> {
        self.observations.iter().filter_map(|o| match o {
            Observation::Delegation(d) => Some(d),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PlannerError(pub String);

#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_step(&self, input: &PlannerInput<'_>) -> Result<Step, PlannerError>;
}

type PlanFn = dyn Fn(&PlannerInput<'_>) -> Result<Step, PlannerError> + Send + Sync;

/// Planner backed by a closure; decisions may depend on everything in the input.
pub struct FnPlanner {
    func: Box<PlanFn>,
}

impl FnPlanner {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&PlannerInput<'_>) -> Result<Step, PlannerError> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Planner for FnPlanner {
    async fn next_step(&self, input: &PlannerInput<'_>) -> Result<Step, PlannerError> {
        (self.func)(input)
    }
}
