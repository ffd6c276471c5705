//! Authentication block of an MCP connector config.
//!
//! ```json
//! {"type": "custom-header", "headers": {"x-api-key": "..."}}
//! {"type": "bearer-token", "token": "..."}
//! {"type": "basic-auth", "username": "...", "password": "..."}
//! ```

use crate::McpError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wp_core::config::EffectiveConfig;

pub const AUTHENTICATION_KEY: &str = "authentication";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Authentication {
    CustomHeader {
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    BearerToken {
        token: String,
    },
    BasicAuth {
        username: String,
        password: String,
    },
}

impl Authentication {
    /// Read the `authentication` key of an effective connector config.
    /// Absent or `null` means no authentication.
    pub fn from_config(config: &EffectiveConfig) -> Result<Option<Self>, McpError> {
        match config.get(AUTHENTICATION_KEY) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(block) => serde_json::from_value(block.clone())
                .map(Some)
                .map_err(|e| McpError::Auth(format!("{}: {e}", config.entity()))),
        }
    }

    /// HTTP headers this block contributes to every request.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Authentication::CustomHeader { headers } => {
                headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            Authentication::BearerToken { token } => {
                vec![("Authorization".into(), format!("Bearer {token}"))]
            }
            Authentication::BasicAuth { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                vec![("Authorization".into(), format!("Basic {encoded}"))]
            }
        }
    }
}
