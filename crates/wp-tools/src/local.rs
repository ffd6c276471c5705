//! Native local tools.

use crate::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use wp_core::config::{ConfigField, ConfigFieldType, EffectiveConfig};
use wp_core::tool::{PortSpec, PortType, SideEffect, ToolDescriptor};

pub const READ_LOCAL_TEXT_FILE: &str = "read_local_text_file";
const DEFAULT_MAX_BYTES: u64 = 1_048_576;

/// Reads a UTF-8 text file. Restricted to files attached to the run unless
/// `allow_any_path` is set.
pub struct ReadTextFileTool {
    descriptor: ToolDescriptor,
}

impl Default for ReadTextFileTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadTextFileTool {
    pub fn new() -> Self {
        let descriptor = ToolDescriptor::new(
            READ_LOCAL_TEXT_FILE,
            "Read a UTF-8 text file attached to the conversation.",
        )
        .with_input(PortSpec::required("path", PortType::String))
        .with_side_effect(SideEffect::Read)
        .with_config_field(
            ConfigField::new("allow_any_path", ConfigFieldType::Boolean)
                .with_default(serde_json::json!(false)),
        )
        .with_config_field(
            ConfigField::new("max_bytes", ConfigFieldType::Integer)
                .with_default(serde_json::json!(DEFAULT_MAX_BYTES))
                .with_range(1.0, 64.0 * 1024.0 * 1024.0),
        );
        Self { descriptor }
    }
}

fn is_attached(path: &Path, ctx: &ToolContext) -> bool {
    let wanted = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    ctx.files.iter().any(|f| {
        f.path == path || std::fs::canonicalize(&f.path).map(|p| p == wanted).unwrap_or(false)
    })
}

#[async_trait]
impl Tool for ReadTextFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        arguments: serde_json::Value,
        config: &EffectiveConfig,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: READ_LOCAL_TEXT_FILE.into(),
                message: "`path` must be a non-empty string".into(),
            })?;
        let path = PathBuf::from(path);

        let allow_any = config.get_bool("allow_any_path").unwrap_or(false);
        if !allow_any && !is_attached(&path, ctx) {
            return Err(ToolError::PathNotAllowed(path));
        }

        let max_bytes = config.get_u64("max_bytes").unwrap_or(DEFAULT_MAX_BYTES);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::Io(format!("{}: {e}", path.display())))?;
        if metadata.len() > max_bytes {
            return Err(ToolError::ExecutionFailed(format!(
                "{} is {} bytes, limit is {max_bytes}",
                path.display(),
                metadata.len()
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::Io(format!("{}: {e}", path.display())))?;
        let content = String::from_utf8(bytes).map_err(|_| {
            ToolError::ExecutionFailed(format!("{} is not valid UTF-8 text", path.display()))
        })?;

        tracing::debug!(path = %path.display(), size = content.len(), "read local text file");
        Ok(serde_json::json!({
            "path": path.display().to_string(),
            "content": content,
            "size": content.len(),
        }))
    }
}
