//! Bounded invocation: argument checks plus the `timeout_seconds` config key.

use crate::{Tool, ToolContext, ToolError};
use tokio::time::timeout;
use wp_core::config::EffectiveConfig;

/// Validate required arguments, then run the tool, bounded by the effective
/// config's `timeout_seconds` when set.
pub async fn invoke(
    tool: &dyn Tool,
    arguments: serde_json::Value,
    config: &EffectiveConfig,
    ctx: &ToolContext,
) -> Result<serde_json::Value, ToolError> {
    let descriptor = tool.descriptor();
    let missing = descriptor.input_schema.missing_required(&arguments);
    if !missing.is_empty() {
        return Err(ToolError::InvalidArguments {
            tool: descriptor.name.clone(),
            message: format!("missing required argument(s): {}", missing.join(", ")),
        });
    }

    match config.get_timeout("timeout_seconds") {
        Some(limit) => match timeout(limit, tool.run(arguments, config, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: descriptor.name.clone(),
                seconds: limit.as_secs_f64(),
            }),
        },
        None => tool.run(arguments, config, ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use wp_core::config::EntityRef;
    use wp_core::tool::{PortSpec, PortType, ToolDescriptor};

    struct Sleepy {
        descriptor: ToolDescriptor,
    }

    #[async_trait]
    impl Tool for Sleepy {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn run(
            &self,
            _arguments: serde_json::Value,
            _config: &EffectiveConfig,
            _ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("done"))
        }
    }

    fn sleepy() -> Sleepy {
        Sleepy {
            descriptor: ToolDescriptor::new("sleepy", "sleeps")
                .with_input(PortSpec::required("query", PortType::String)),
        }
    }

    fn config(v: serde_json::Value) -> EffectiveConfig {
        EffectiveConfig::new(
            EntityRef::tool("sleepy"),
            v.as_object().cloned().unwrap(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let err = invoke(&sleepy(), json!({}), &config(json!({})), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_seconds_bounds_execution() {
        let err = invoke(
            &sleepy(),
            json!({"query": "q"}),
            &config(json!({"timeout_seconds": 2.5})),
            &ToolContext::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { seconds, .. } if seconds == 2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_does_not_overflow() {
        let out = invoke(
            &sleepy(),
            json!({"query": "q"}),
            &config(json!({"timeout_seconds": 1e20})),
            &ToolContext::default(),
        )
        .await
        .unwrap();
        assert_eq!(out, json!("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_runs_to_completion() {
        let out = invoke(&sleepy(), json!({"query": "q"}), &config(json!({})), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!("done"));
    }
}
