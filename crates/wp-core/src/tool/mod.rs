//! Tool descriptor — the declared contract every tool collaborator exposes.

use crate::config::ConfigField;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ToolDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable name; also the configuration key for this tool.
    pub name: String,

    /// What this tool does (shown to the planner).
    pub description: String,

    /// Argument declarations.
    pub input_schema: PortSchema,

    /// Side-effect classification. Side-effecting tools are gated by HITL.
    pub side_effect: SideEffect,

    /// Optional tool-level configuration fields.
    #[serde(default)]
    pub config_schema: Vec<ConfigField>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: PortSchema::default(),
            side_effect: SideEffect::None,
            config_schema: Vec::new(),
        }
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.input_schema.ports.push(port);
        self
    }

    pub fn with_side_effect(mut self, side_effect: SideEffect) -> Self {
        self.side_effect = side_effect;
        self
    }

    pub fn with_config_field(mut self, field: ConfigField) -> Self {
        self.config_schema.push(field);
        self
    }

    /// Whether the tool declares a configuration schema at all.
    pub fn has_config_schema(&self) -> bool {
        !self.config_schema.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Port schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSchema {
    pub ports: Vec<PortSpec>,
}

impl PortSchema {
    /// Names of required ports missing from an argument object.
    pub fn missing_required(&self, arguments: &serde_json::Value) -> Vec<String> {
        self.ports
            .iter()
            .filter(|p| p.required && p.default_value.is_none())
            .filter(|p| arguments.get(&p.name).is_none())
            .map(|p| p.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port_type: PortType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

impl PortSpec {
    pub fn required(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            description: None,
            required: true,
            default_value: None,
        }
    }

    pub fn optional(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            required: false,
            ..Self::required(name, port_type)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    String,
    Number,
    Boolean,
    Json,
    Array,
    Any,
}

// ---------------------------------------------------------------------------
// Side effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    None,
    Read,
    Write,
    Network,
    Process,
}

impl SideEffect {
    /// Writes, outbound network and process spawning change the outside world.
    pub fn is_side_effecting(&self) -> bool {
        matches!(self, SideEffect::Write | SideEffect::Network | SideEffect::Process)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFieldType;
    use serde_json::json;

    #[test]
    fn round_trip_tool_descriptor() {
        let tool = ToolDescriptor::new("research_formatter", "Format research papers")
            .with_input(PortSpec::required("query", PortType::String))
            .with_config_field(
                ConfigField::new("style", ConfigFieldType::String).with_default(json!("brief")),
            );

        let json = serde_json::to_string_pretty(&tool).unwrap();
        let back: ToolDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "research_formatter");
        assert_eq!(back.side_effect, SideEffect::None);
        assert!(back.has_config_schema());
    }

    #[test]
    fn missing_required_ports() {
        let schema = PortSchema {
            ports: vec![
                PortSpec::required("a", PortType::Number),
                PortSpec::required("b", PortType::Number),
                PortSpec::optional("c", PortType::String),
            ],
        };
        assert_eq!(schema.missing_required(&json!({"a": 1})), vec!["b".to_string()]);
        assert!(schema.missing_required(&json!({"a": 1, "b": 2})).is_empty());
    }

    #[test]
    fn side_effect_classification() {
        assert!(SideEffect::Write.is_side_effecting());
        assert!(SideEffect::Network.is_side_effecting());
        assert!(!SideEffect::Read.is_side_effecting());
        assert!(!SideEffect::None.is_side_effecting());
    }
}
