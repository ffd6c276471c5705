//! wp-config: Config resolver — merges Definition, RuntimeGlobal and
//! RuntimeScoped layers into one effective configuration per entity.

pub mod resolver;
pub mod runtime;
pub mod schema;
pub mod settings;

pub use resolver::{fingerprint, resolve, ScopeLayers};
pub use runtime::{RuntimeConfig, ScopedOverrides};
pub use settings::{agent_config_schema, AgentSettings, HitlPolicy};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config validation failed for {entity}: key `{key}` expected {expected}, received {received}")]
    Validation {
        entity: String,
        key: String,
        expected: String,
        received: String,
    },
    #[error("invalid runtime config: {0}")]
    InvalidRuntimeConfig(String),
}

impl ConfigError {
    /// The offending config key, if the error names one.
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::Validation { key, .. } => Some(key),
            ConfigError::InvalidRuntimeConfig(_) => None,
        }
    }
}
