//! Turns an MCP spec plus its effective config into tools.

use crate::auth::Authentication;
use crate::client::{McpClient, RemoteTool};
use crate::endpoint::{request_timeout, Endpoint};
use crate::McpError;
use async_trait::async_trait;
use std::sync::Arc;
use wp_core::config::EffectiveConfig;
use wp_core::mcp::McpSpec;
use wp_core::tool::{PortSchema, PortSpec, PortType, SideEffect, ToolDescriptor};
use wp_tools::{Tool, ToolContext, ToolError};

/// Opens a connector for one run and lists its tools.
#[async_trait]
pub trait McpConnect: Send + Sync {
    async fn connect(
        &self,
        spec: &McpSpec,
        config: &EffectiveConfig,
    ) -> Result<Vec<Arc<dyn Tool>>, McpError>;
}

/// Network-backed connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl McpConnect for McpConnector {
    async fn connect(
        &self,
        spec: &McpSpec,
        config: &EffectiveConfig,
    ) -> Result<Vec<Arc<dyn Tool>>, McpError> {
        let endpoint = Endpoint::from_config(spec.transport, config)?;
        let auth = Authentication::from_config(config)?;
        let client = Arc::new(
            McpClient::connect(&spec.name, &endpoint, auth.as_ref(), request_timeout(config)).await?,
        );
        let side_effect = side_effect(config)?;

        let remote = client.list_tools().await?;
        tracing::info!(mcp = %spec.name, tools = remote.len(), "MCP tools listed");
        Ok(remote
            .into_iter()
            .map(|t| Arc::new(McpTool::new(client.clone(), t, side_effect)) as Arc<dyn Tool>)
            .collect())
    }
}

/// `side_effect` connector key; remote tools default to `network`.
fn side_effect(config: &EffectiveConfig) -> Result<SideEffect, McpError> {
    match config.get("side_effect") {
        None | Some(serde_json::Value::Null) => Ok(SideEffect::Network),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| McpError::InvalidConfig {
            key: "side_effect".into(),
            message: e.to_string(),
        }),
    }
}

/// A remote tool exposed through the local [`Tool`] contract.
pub struct McpTool {
    client: Arc<McpClient>,
    descriptor: ToolDescriptor,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, remote: RemoteTool, side_effect: SideEffect) -> Self {
        let mut descriptor = ToolDescriptor::new(remote.name, remote.description)
            .with_side_effect(side_effect);
        descriptor.input_schema = input_ports(&remote.input_schema);
        Self { client, descriptor }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        arguments: serde_json::Value,
        _config: &EffectiveConfig,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        self.client
            .call_tool(&self.descriptor.name, arguments)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("{}: {e}", self.client.name())))
    }
}

/// JSON-schema `properties`/`required` to port declarations.
pub fn input_ports(schema: &serde_json::Value) -> PortSchema {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut ports: Vec<PortSpec> = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let port_type = match prop.get("type").and_then(|t| t.as_str()) {
                        Some("string") => PortType::String,
                        Some("number") | Some("integer") => PortType::Number,
                        Some("boolean") => PortType::Boolean,
                        Some("array") => PortType::Array,
                        Some("object") => PortType::Json,
                        _ => PortType::Any,
                    };
                    PortSpec {
                        name: name.clone(),
                        port_type,
                        description: prop
                            .get("description")
                            .and_then(|d| d.as_str())
                            .map(str::to_string),
                        required: required.contains(&name.as_str()),
                        default_value: prop.get("default").cloned(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    PortSchema { ports }
}
