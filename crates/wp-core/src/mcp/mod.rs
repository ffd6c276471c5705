//! MCP connector definitions.

use crate::config::ConfigMap;
use serde::{Deserialize, Serialize};

/// Declared external connector reached over a transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpSpec {
    pub name: String,

    pub transport: McpTransport,

    #[serde(default)]
    pub description: String,

    /// Connector settings such as `url`, `command`, `timeout_seconds`.
    #[serde(default)]
    pub config: ConfigMap,

    /// Authentication block; merged under the `authentication` key.
    #[serde(default)]
    pub authentication: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    Http,
    Sse,
    Stdio,
}

impl McpSpec {
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        let mut config = ConfigMap::new();
        config.insert("url".into(), serde_json::Value::String(url.into()));
        Self {
            name: name.into(),
            transport: McpTransport::Http,
            description: String::new(),
            config,
            authentication: None,
        }
    }

    pub fn with_authentication(mut self, authentication: serde_json::Value) -> Self {
        self.authentication = Some(authentication);
        self
    }

    /// The connector's own settings as a definition-scope config map.
    pub fn definition_config(&self) -> ConfigMap {
        let mut config = self.config.clone();
        if let Some(auth) = &self.authentication {
            config.insert("authentication".into(), auth.clone());
        }
        config
    }
}
