//! Where a connector lives, read from its effective config.

use crate::McpError;
use std::time::Duration;
use url::Url;
use wp_core::config::EffectiveConfig;
use wp_core::mcp::McpTransport;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Streamable HTTP; responses may be plain JSON or an SSE body.
    Http { url: Url },
    Sse { url: Url },
    Stdio { command: String, args: Vec<String> },
}

impl Endpoint {
    /// Keys: `url` for http/sse, `command` and `args` for stdio.
    pub fn from_config(transport: McpTransport, config: &EffectiveConfig) -> Result<Self, McpError> {
        match transport {
            McpTransport::Http | McpTransport::Sse => {
                let raw = config.get_str("url").ok_or_else(|| McpError::InvalidConfig {
                    key: "url".into(),
                    message: "required for http/sse transports".into(),
                })?;
                let url = Url::parse(raw).map_err(|e| McpError::InvalidConfig {
                    key: "url".into(),
                    message: e.to_string(),
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(McpError::InvalidConfig {
                        key: "url".into(),
                        message: format!("unsupported scheme `{}`", url.scheme()),
                    });
                }
                Ok(if transport == McpTransport::Sse {
                    Endpoint::Sse { url }
                } else {
                    Endpoint::Http { url }
                })
            }
            McpTransport::Stdio => {
                let command = config
                    .get_str("command")
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| McpError::InvalidConfig {
                        key: "command".into(),
                        message: "required for stdio transport".into(),
                    })?
                    .to_string();
                let args = match config.get("args") {
                    None | Some(serde_json::Value::Null) => Vec::new(),
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .map(|v| {
                            v.as_str().map(str::to_string).ok_or_else(|| McpError::InvalidConfig {
                                key: "args".into(),
                                message: "all arguments must be strings".into(),
                            })
                        })
                        .collect::<Result<_, _>>()?,
                    Some(_) => {
                        return Err(McpError::InvalidConfig {
                            key: "args".into(),
                            message: "expected an array of strings".into(),
                        })
                    }
                };
                Ok(Endpoint::Stdio { command, args })
            }
        }
    }
}

/// Request timeout from `timeout_seconds`, default 30 s.
pub fn request_timeout(config: &EffectiveConfig) -> Duration {
    config
        .get_timeout("timeout_seconds")
        .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wp_core::config::EntityRef;

    fn config(v: serde_json::Value) -> EffectiveConfig {
        EffectiveConfig::new(EntityRef::mcp("m"), v.as_object().cloned().unwrap(), Default::default())
    }

    #[test]
    fn http_endpoint_requires_valid_url() {
        let ep = Endpoint::from_config(McpTransport::Http, &config(json!({"url": "https://example.test/mcp/"})))
            .unwrap();
        assert!(matches!(ep, Endpoint::Http { url } if url.host_str() == Some("example.test")));

        let err = Endpoint::from_config(McpTransport::Http, &config(json!({"url": "not a url"})))
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig { key, .. } if key == "url"));

        let err = Endpoint::from_config(McpTransport::Sse, &config(json!({"url": "ftp://x/"}))).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn stdio_endpoint_reads_command_and_args() {
        let ep = Endpoint::from_config(
            McpTransport::Stdio,
            &config(json!({"command": "npx", "args": ["-y", "server-filesystem"]})),
        )
        .unwrap();
        assert_eq!(
            ep,
            Endpoint::Stdio {
                command: "npx".into(),
                args: vec!["-y".into(), "server-filesystem".into()]
            }
        );
        assert!(Endpoint::from_config(McpTransport::Stdio, &config(json!({"args": [1]}))).is_err());
    }

    #[test]
    fn timeout_defaults_to_thirty_seconds() {
        assert_eq!(request_timeout(&config(json!({}))), Duration::from_secs(30));
        assert_eq!(
            request_timeout(&config(json!({"timeout_seconds": 2}))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn huge_timeout_saturates() {
        assert_eq!(request_timeout(&config(json!({"timeout_seconds": 1e20}))), Duration::MAX);
        assert_eq!(request_timeout(&config(json!({"timeout_seconds": -1}))), Duration::from_secs(30));
    }
}
