//! Typed views over effective configs: agent settings and HITL policy.

use std::collections::BTreeMap;
use std::time::Duration;
use wp_core::config::{seconds, ConfigField, ConfigFieldType, EffectiveConfig};
use wp_core::tool::SideEffect;

pub const DEFAULT_MAX_STEPS: u32 = 25;
pub const DEFAULT_HITL_TIMEOUT_SECS: f64 = 60.0;

/// Declared types of the recognized `agent_config` keys. Defaults are
/// applied by [`AgentSettings::from_config`], not by the merge.
pub fn agent_config_schema() -> Vec<ConfigField> {
    vec![
        ConfigField::new("planning", ConfigFieldType::Boolean),
        ConfigField::new("hitl_enabled", ConfigFieldType::Boolean),
        ConfigField::new("hitl_default_timeout_seconds", ConfigFieldType::Number)
            .with_minimum(0.0),
        ConfigField::new("enable_pii", ConfigFieldType::Boolean),
        ConfigField::new("pii_mapping", ConfigFieldType::Object),
        ConfigField::new("enable_a2a_token_streaming", ConfigFieldType::Boolean),
        ConfigField::new("tool_output_sharing", ConfigFieldType::Boolean),
        ConfigField::new("memory", ConfigFieldType::String),
        ConfigField::new("max_steps", ConfigFieldType::Integer).with_range(1.0, 10_000.0),
        ConfigField::new("run_timeout_seconds", ConfigFieldType::Number).with_minimum(0.0),
    ]
}

/// Recognized `agent_config` keys. Unknown keys remain readable from the
/// effective config itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub planning: bool,
    pub hitl_enabled: bool,
    pub hitl_default_timeout: Duration,
    pub enable_pii: bool,
    pub pii_mapping: BTreeMap<String, String>,
    pub enable_a2a_token_streaming: bool,
    pub tool_output_sharing: bool,
    /// Memory provider name, e.g. `mem0`. `None` disables memory.
    pub memory: Option<String>,
    pub max_steps: u32,
    pub run_timeout: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            planning: false,
            hitl_enabled: false,
            hitl_default_timeout: Duration::from_secs_f64(DEFAULT_HITL_TIMEOUT_SECS),
            enable_pii: false,
            pii_mapping: BTreeMap::new(),
            enable_a2a_token_streaming: false,
            tool_output_sharing: false,
            memory: None,
            max_steps: DEFAULT_MAX_STEPS,
            run_timeout: None,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &EffectiveConfig) -> Self {
        let defaults = Self::default();
        let pii_mapping = config
            .get_object("pii_mapping")
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            planning: config.get_bool("planning").unwrap_or(defaults.planning),
            hitl_enabled: config.get_bool("hitl_enabled").unwrap_or(defaults.hitl_enabled),
            hitl_default_timeout: config
                .get_f64("hitl_default_timeout_seconds")
                .and_then(seconds)
                .unwrap_or(defaults.hitl_default_timeout),
            enable_pii: config.get_bool("enable_pii").unwrap_or(defaults.enable_pii),
            pii_mapping,
            enable_a2a_token_streaming: config
                .get_bool("enable_a2a_token_streaming")
                .unwrap_or(defaults.enable_a2a_token_streaming),
            tool_output_sharing: config
                .get_bool("tool_output_sharing")
                .unwrap_or(defaults.tool_output_sharing),
            memory: config
                .get_str("memory")
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            max_steps: config
                .get_u64("max_steps")
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_steps),
            run_timeout: config.get_f64("run_timeout_seconds").and_then(seconds),
        }
    }

    /// PII handling is active only when enabled and a mapping is available.
    pub fn pii_active(&self) -> bool {
        self.enable_pii && !self.pii_mapping.is_empty()
    }
}

/// Approval requirement for one tool in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitlPolicy {
    pub timeout: Duration,
}

impl HitlPolicy {
    /// `None` when the call may run without approval.
    ///
    /// With HITL enabled on the agent, a tool is gated when its config has a
    /// `hitl` block (`true` or an object without `"enabled": false`), or when
    /// it declares a side effect and has no `hitl: false` opt-out.
    pub fn for_tool(
        settings: &AgentSettings,
        tool_config: &EffectiveConfig,
        side_effect: SideEffect,
    ) -> Option<Self> {
        if !settings.hitl_enabled {
            return None;
        }

        let default = Self {
            timeout: settings.hitl_default_timeout,
        };

        match tool_config.get("hitl") {
            Some(serde_json::Value::Bool(false)) => None,
            Some(serde_json::Value::Bool(true)) => Some(default),
            Some(serde_json::Value::Object(block)) => {
                if block.get("enabled").and_then(|v| v.as_bool()) == Some(false) {
                    return None;
                }
                let timeout = block
                    .get("timeout_seconds")
                    .and_then(|v| v.as_f64())
                    .and_then(seconds)
                    .unwrap_or(default.timeout);
                Some(Self { timeout })
            }
            _ if side_effect.is_side_effecting() => Some(default),
            _ => None,
        }
    }
}
