//! wp-core: Shared types for the Waypoint agent runtime
//!
//! This crate has zero internal crate dependencies and defines the
//! canonical types used across all other wp-* crates.

pub mod agent;
pub mod config;
pub mod failure;
pub mod mcp;
pub mod memory;
pub mod message;
pub mod tool;
pub mod trace;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::agent::{AgentBundle, AgentSpec};
    pub use crate::config::{
        ConfigField, ConfigFieldType, ConfigMap, ConfigScope, EffectiveConfig, EntityKind,
        EntityRef, KeySource,
    };
    pub use crate::failure::{Component, Failure, FailureKind};
    pub use crate::mcp::{McpSpec, McpTransport};
    pub use crate::message::{ChatMessage, FileRef, Role};
    pub use crate::tool::{PortSchema, PortSpec, PortType, SideEffect, ToolDescriptor};
    pub use crate::trace::{
        ApprovalDecision, CallId, Decision, RunRecord, RunStatus, ToolCallRecord, ToolCallStatus,
        ToolOutputRecord,
    };
}
