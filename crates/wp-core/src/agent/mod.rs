//! Agent definitions — the declared shape of an agent and its bundles.

use crate::config::ConfigMap;
use crate::mcp::McpSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// AgentSpec
// ---------------------------------------------------------------------------

/// Declared agent. Tools, MCP connectors and sub-agents are referenced by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,

    /// System instruction handed to the planner.
    pub instruction: String,

    #[serde(default)]
    pub description: String,

    /// Names of tools from the tool registry.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Names of MCP connectors declared in the same bundle.
    #[serde(default)]
    pub mcps: Vec<String>,

    /// Names of sub-agents this agent may delegate to.
    #[serde(default)]
    pub agents: Vec<String>,

    /// Definition-scope agent configuration.
    #[serde(default)]
    pub agent_config: ConfigMap,

    /// Definition-scope tool configuration, keyed by tool name.
    #[serde(default)]
    pub tool_configs: BTreeMap<String, ConfigMap>,

    /// Definition-scope MCP configuration, keyed by connector name.
    #[serde(default)]
    pub mcp_configs: BTreeMap<String, ConfigMap>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_mcp(mut self, mcp: impl Into<String>) -> Self {
        self.mcps.push(mcp.into());
        self
    }

    pub fn with_sub_agent(mut self, agent: impl Into<String>) -> Self {
        self.agents.push(agent.into());
        self
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
}

// ---------------------------------------------------------------------------
// AgentBundle — export / import unit
// ---------------------------------------------------------------------------

/// A set of agent and MCP definitions that is exported and imported together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentBundle {
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub mcps: Vec<McpSpec>,
}

impl AgentBundle {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bundle_export_import_preserves_definition_configs() {
        let mut formatter = ConfigMap::new();
        formatter.insert("style".into(), json!("detailed"));
        formatter.insert("max_results".into(), json!(10));

        let bundle = AgentBundle {
            agents: vec![AgentSpec::new("research_agent", "Format research.")
                .with_tool("research_formatter")
                .with_agent_config("planning", json!(false))
                .with_tool_config("research_formatter", formatter)],
            mcps: vec![],
        };

        let json = bundle.to_json().unwrap();
        let back = AgentBundle::from_json(&json).unwrap();
        let agent = back.agent("research_agent").unwrap();
        assert_eq!(agent.tool_configs["research_formatter"]["style"], "detailed");
        assert_eq!(agent.agent_config["planning"], false);
    }

    #[test]
    fn minimal_import_defaults_collections() {
        let bundle = AgentBundle::from_json(
            r#"{"agents": [{"name": "support", "instruction": "Answer questions."}]}"#,
        )
        .unwrap();
        let agent = bundle.agent("support").unwrap();
        assert!(agent.tools.is_empty());
        assert!(agent.agents.is_empty());
        assert!(bundle.mcps.is_empty());
    }
}
