//! Runtime configuration surface supplied with a run request.
//!
//! ```json
//! {
//!   "agent_config": {"planning": true},
//!   "tool_configs": {"*": {"timeout_seconds": 30}, "research_formatter": {"style": "brief"}},
//!   "mcp_configs": {"arxiv": {"authentication": {"type": "bearer-token", "token": "..."}}},
//!   "agents": {
//!     "research_agent": {"mcp_configs": {"arxiv": {"authentication": {...}}}}
//!   }
//! }
//! ```
//!
//! Top-level tables form the RuntimeGlobal scope; `agents.<name>` tables form
//! the RuntimeScoped scope for runs of that agent.

use crate::resolver::{overlay, ScopeLayers};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wp_core::config::{ConfigMap, EntityKind, EntityRef};

/// Key applying a RuntimeGlobal entry to every entity of its kind.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub agent_config: ConfigMap,
    #[serde(default)]
    pub tool_configs: BTreeMap<String, ConfigMap>,
    #[serde(default)]
    pub mcp_configs: BTreeMap<String, ConfigMap>,
    /// Agent-specific overrides, highest priority.
    #[serde(default)]
    pub agents: BTreeMap<String, ScopedOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopedOverrides {
    #[serde(default)]
    pub agent_config: ConfigMap,
    #[serde(default)]
    pub tool_configs: BTreeMap<String, ConfigMap>,
    #[serde(default)]
    pub mcp_configs: BTreeMap<String, ConfigMap>,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidRuntimeConfig(e.to_string()))
    }

    pub fn with_agent_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.agent_config.insert(key.into(), value);
        self
    }

    pub fn with_tool_config(mut self, tool: impl Into<String>, config: ConfigMap) -> Self {
        self.tool_configs.insert(tool.into(), config);
        self
    }

    pub fn with_mcp_config(mut self, mcp: impl Into<String>, config: ConfigMap) -> Self {
        self.mcp_configs.insert(mcp.into(), config);
        self
    }

    pub fn with_agent_overrides(mut self, agent: impl Into<String>, overrides: ScopedOverrides) -> Self {
        self.agents.insert(agent.into(), overrides);
        self
    }

    /// RuntimeGlobal layer for an entity: the kind-wide `"*"` entry, then the
    /// entity's own entry.
    pub fn global_layer(&self, entity: &EntityRef) -> Option<ConfigMap> {
        match entity.kind {
            EntityKind::Agent => non_empty(&self.agent_config),
            EntityKind::Tool => overlay(
                self.tool_configs.get(WILDCARD),
                self.tool_configs.get(&entity.name),
            ),
            EntityKind::Mcp => overlay(
                self.mcp_configs.get(WILDCARD),
                self.mcp_configs.get(&entity.name),
            ),
        }
    }

    /// RuntimeScoped layer for an entity used by `agent`.
    pub fn scoped_layer(&self, agent: &str, entity: &EntityRef) -> Option<ConfigMap> {
        let overrides = self.agents.get(agent)?;
        match entity.kind {
            EntityKind::Agent if entity.name == agent => non_empty(&overrides.agent_config),
            EntityKind::Agent => None,
            EntityKind::Tool => overrides.tool_configs.get(&entity.name).cloned(),
            EntityKind::Mcp => overrides.mcp_configs.get(&entity.name).cloned(),
        }
    }

    /// All three layers for `entity` as seen from a run of `agent`.
    pub fn layers_for(
        &self,
        agent: &str,
        entity: &EntityRef,
        definition: Option<&ConfigMap>,
    ) -> ScopeLayers {
        ScopeLayers {
            definition: definition.cloned(),
            runtime_global: self.global_layer(entity),
            runtime_scoped: self.scoped_layer(agent, entity),
        }
    }
}

fn non_empty(map: &ConfigMap) -> Option<ConfigMap> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}
