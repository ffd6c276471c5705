//! Structured failures returned to a run's caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::trace::CallId;

/// The runtime component responsible for a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    ConfigResolver,
    ToolOutputStore,
    ReferenceResolver,
    ApprovalGate,
    DelegationCoordinator,
    ExecutionEngine,
    Planner,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::ConfigResolver => "config_resolver",
            Component::ToolOutputStore => "tool_output_store",
            Component::ReferenceResolver => "reference_resolver",
            Component::ApprovalGate => "approval_gate",
            Component::DelegationCoordinator => "delegation_coordinator",
            Component::ExecutionEngine => "execution_engine",
            Component::Planner => "planner",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ConfigValidationError,
    DuplicateCallId,
    UnresolvedToolOutputReference,
    CyclicDelegationError,
    StepLimitExceeded,
    RunTimeout,
    ToolExecutionError,
    DelegationFailure,
    PlannerError,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ConfigValidationError => "ConfigValidationError",
            FailureKind::DuplicateCallId => "DuplicateCallId",
            FailureKind::UnresolvedToolOutputReference => "UnresolvedToolOutputReference",
            FailureKind::CyclicDelegationError => "CyclicDelegationError",
            FailureKind::StepLimitExceeded => "StepLimitExceeded",
            FailureKind::RunTimeout => "RunTimeout",
            FailureKind::ToolExecutionError => "ToolExecutionError",
            FailureKind::DelegationFailure => "DelegationFailure",
            FailureKind::PlannerError => "PlannerError",
            FailureKind::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A terminal or step-level failure with enough context to reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub component: Component,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_key: Option<String>,
}

impl Failure {
    pub fn new(component: Component, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            component,
            kind,
            message: message.into(),
            call_id: None,
            tool_name: None,
            config_key: None,
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.kind, self.message)?;
        if let Some(tool) = &self.tool_name {
            write!(f, " (tool={tool})")?;
        }
        if let Some(call_id) = &self.call_id {
            write!(f, " (call_id={call_id})")?;
        }
        if let Some(key) = &self.config_key {
            write!(f, " (config_key={key})")?;
        }
        Ok(())
    }
}
