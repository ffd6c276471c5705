//! Configuration types — scopes, entity references, schema fields, and the
//! immutable per-run effective configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A flat key/value configuration table. Nested objects are opaque values.
pub type ConfigMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tool,
    Mcp,
    Agent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tool => "tool",
            EntityKind::Mcp => "mcp",
            EntityKind::Agent => "agent",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical reference to a configurable entity. The name is the only key;
/// object identity never participates in resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Tool, name)
    }

    pub fn mcp(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Mcp, name)
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Agent, name)
    }

    /// Stable string key, e.g. `tool:research_formatter`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// The three configuration layers, in ascending priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    /// Attached when the entity was declared.
    Definition,
    /// Applies to every entity of a kind for one run.
    RuntimeGlobal,
    /// Applies to one named agent's entities for one run.
    RuntimeScoped,
}

impl ConfigScope {
    /// Merge order. Later entries override earlier ones key-by-key.
    pub const MERGE_ORDER: [ConfigScope; 3] = [
        ConfigScope::Definition,
        ConfigScope::RuntimeGlobal,
        ConfigScope::RuntimeScoped,
    ];
}

/// Where one effective key got its value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Scope(ConfigScope),
    /// No scope set the key; the entity's schema default filled it.
    SchemaDefault,
}

impl From<ConfigScope> for KeySource {
    fn from(scope: ConfigScope) -> Self {
        KeySource::Scope(scope)
    }
}

/// Seconds as a `Duration`. Negative, NaN and infinite values are `None`;
/// finite values too large to represent saturate at `Duration::MAX`.
pub fn seconds(value: f64) -> Option<Duration> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX))
}

// ---------------------------------------------------------------------------
// Config schema fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// Allowed values for `select` / `multi_select` fields.
    #[serde(default)]
    pub options: Vec<Value>,
    /// Inclusive numeric bounds for `number` / `integer` fields.
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

impl ConfigField {
    pub fn new(name: impl Into<String>, field_type: ConfigFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
            default_value: None,
            required: false,
            options: Vec::new(),
            minimum: None,
            maximum: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldType {
    String,
    Integer,
    Number,
    Boolean,
    Select,
    MultiSelect,
    FilePath,
    Object,
    Json,
}

impl ConfigFieldType {
    /// Human-readable type name used in validation messages.
    pub fn expected(&self) -> &'static str {
        match self {
            ConfigFieldType::String | ConfigFieldType::FilePath => "string",
            ConfigFieldType::Integer => "integer",
            ConfigFieldType::Number => "number",
            ConfigFieldType::Boolean => "boolean",
            ConfigFieldType::Select => "one of options",
            ConfigFieldType::MultiSelect => "array of options",
            ConfigFieldType::Object => "object",
            ConfigFieldType::Json => "any",
        }
    }
}

/// JSON type name of a value, as reported in validation errors.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// EffectiveConfig
// ---------------------------------------------------------------------------

/// Result of merging all scopes for one entity in one run.
///
/// Immutable once built: there are no mutating accessors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveConfig {
    entity: EntityRef,
    values: ConfigMap,
    /// Which scope supplied each key.
    sources: BTreeMap<String, KeySource>,
}

impl EffectiveConfig {
    pub fn new(entity: EntityRef, values: ConfigMap, sources: BTreeMap<String, KeySource>) -> Self {
        Self {
            entity,
            values,
            sources,
        }
    }

    /// An empty configuration for an entity nobody configured.
    pub fn empty(entity: EntityRef) -> Self {
        Self::new(entity, ConfigMap::new(), BTreeMap::new())
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn source_of(&self, key: &str) -> Option<KeySource> {
        self.sources.get(key).copied()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Positive seconds under `key`, saturating like [`seconds`].
    pub fn get_timeout(&self, key: &str) -> Option<Duration> {
        self.get_f64(key).filter(|s| *s > 0.0).and_then(seconds)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_object(&self, key: &str) -> Option<&ConfigMap> {
        self.values.get(key).and_then(Value::as_object)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whole config as a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
