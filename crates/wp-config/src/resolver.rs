//! Scope merge.
//!
//! effective = Definition ⊕ RuntimeGlobal ⊕ RuntimeScoped, shallow per key:
//! a top-level key from a later layer replaces the earlier value whole,
//! including nested objects such as `authentication`.

use crate::schema;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use wp_core::config::{ConfigField, ConfigMap, ConfigScope, EffectiveConfig, EntityRef, KeySource};

/// The three optional layers available for one entity in one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeLayers {
    pub definition: Option<ConfigMap>,
    pub runtime_global: Option<ConfigMap>,
    pub runtime_scoped: Option<ConfigMap>,
}

impl ScopeLayers {
    pub fn definition_only(definition: ConfigMap) -> Self {
        Self {
            definition: Some(definition),
            ..Default::default()
        }
    }

    fn layer(&self, scope: ConfigScope) -> Option<&ConfigMap> {
        match scope {
            ConfigScope::Definition => self.definition.as_ref(),
            ConfigScope::RuntimeGlobal => self.runtime_global.as_ref(),
            ConfigScope::RuntimeScoped => self.runtime_scoped.as_ref(),
        }
    }
}

/// Merge the layers for `entity` and validate against `config_schema`.
///
/// Pure: no side effects, safe to call concurrently for independent entities.
pub fn resolve(
    entity: &EntityRef,
    layers: &ScopeLayers,
    config_schema: &[ConfigField],
) -> Result<EffectiveConfig, ConfigError> {
    let mut values = ConfigMap::new();
    let mut sources: BTreeMap<String, KeySource> = BTreeMap::new();

    for scope in ConfigScope::MERGE_ORDER {
        if let Some(layer) = layers.layer(scope) {
            for (key, value) in layer {
                values.insert(key.clone(), value.clone());
                sources.insert(key.clone(), scope.into());
            }
        }
    }

    for field in config_schema {
        if values.contains_key(&field.name) {
            continue;
        }
        if let Some(default) = &field.default_value {
            values.insert(field.name.clone(), default.clone());
            sources.insert(field.name.clone(), KeySource::SchemaDefault);
        }
    }

    schema::validate(entity, &values, config_schema)?;

    tracing::debug!(entity = %entity, keys = values.len(), "resolved effective config");
    Ok(EffectiveConfig::new(entity.clone(), values, sources))
}

/// Shallow-merge `overlay` onto `base`; used to fold the kind-wide `"*"`
/// entry and an entity's own entry into one RuntimeGlobal layer.
pub fn overlay(base: Option<&ConfigMap>, overlay: Option<&ConfigMap>) -> Option<ConfigMap> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(b), Some(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            Some(merged)
        }
    }
}

/// SHA-256 hex digest of an effective config, stable across key order.
pub fn fingerprint(config: &EffectiveConfig) -> String {
    let sorted: BTreeMap<&String, &serde_json::Value> = config.values().iter().collect();
    let mut hasher = Sha256::new();
    hasher.update(config.entity().key().as_bytes());
    hasher.update(serde_json::to_string(&sorted).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wp_core::config::ConfigFieldType;

    fn map(value: serde_json::Value) -> ConfigMap {
        value.as_object().cloned().unwrap()
    }

    fn formatter_schema() -> Vec<ConfigField> {
        vec![
            ConfigField::new("style", ConfigFieldType::String).with_default(json!("brief")),
            ConfigField::new("max_results", ConfigFieldType::Integer)
                .with_default(json!(5))
                .with_range(1.0, 20.0),
            ConfigField::new("include_links", ConfigFieldType::Boolean).with_default(json!(true)),
        ]
    }

    #[test]
    fn later_scopes_win_per_key() {
        let layers = ScopeLayers {
            definition: Some(map(json!({"a": "def", "b": "def", "c": "def"}))),
            runtime_global: Some(map(json!({"b": "global", "c": "global"}))),
            runtime_scoped: Some(map(json!({"c": "scoped"}))),
        };
        let cfg = resolve(&EntityRef::tool("t"), &layers, &[]).unwrap();
        assert_eq!(cfg.get_str("a"), Some("def"));
        assert_eq!(cfg.get_str("b"), Some("global"));
        assert_eq!(cfg.get_str("c"), Some("scoped"));
        assert_eq!(cfg.source_of("a"), Some(KeySource::Scope(ConfigScope::Definition)));
        assert_eq!(cfg.source_of("b"), Some(KeySource::Scope(ConfigScope::RuntimeGlobal)));
        assert_eq!(cfg.source_of("c"), Some(KeySource::Scope(ConfigScope::RuntimeScoped)));
    }

    #[test]
    fn global_overrides_definition_and_keeps_definition_only_keys() {
        let layers = ScopeLayers {
            definition: Some(map(
                json!({"style": "detailed", "max_results": 10, "include_links": false}),
            )),
            runtime_global: Some(map(json!({"style": "brief", "max_results": 3}))),
            runtime_scoped: None,
        };
        let cfg = resolve(
            &EntityRef::tool("research_formatter"),
            &layers,
            &formatter_schema(),
        )
        .unwrap();
        assert_eq!(cfg.get_str("style"), Some("brief"));
        assert_eq!(cfg.get_u64("max_results"), Some(3));
        assert_eq!(cfg.get_bool("include_links"), Some(false));
    }

    #[test]
    fn nested_blocks_are_replaced_not_deep_merged() {
        let layers = ScopeLayers {
            definition: Some(map(json!({
                "url": "https://example.test/mcp/",
                "authentication": {
                    "type": "custom-header",
                    "headers": {"x-api-key": "placeholder", "Authorization": "Bearer placeholder"}
                }
            }))),
            runtime_global: None,
            runtime_scoped: Some(map(json!({
                "authentication": {"type": "bearer-token", "token": "real"}
            }))),
        };
        let cfg = resolve(&EntityRef::mcp("arxiv"), &layers, &[]).unwrap();
        let auth = cfg.get_object("authentication").unwrap();
        assert_eq!(auth["type"], "bearer-token");
        assert!(auth.get("headers").is_none());
        assert_eq!(cfg.get_str("url"), Some("https://example.test/mcp/"));
    }

    #[test]
    fn schema_defaults_fill_unset_keys() {
        let cfg = resolve(
            &EntityRef::tool("research_formatter"),
            &ScopeLayers::default(),
            &formatter_schema(),
        )
        .unwrap();
        assert_eq!(cfg.get_str("style"), Some("brief"));
        assert_eq!(cfg.get_u64("max_results"), Some(5));
        assert_eq!(cfg.source_of("style"), Some(KeySource::SchemaDefault));
    }

    #[test]
    fn schema_violation_names_key_and_types() {
        let layers = ScopeLayers {
            runtime_scoped: Some(map(json!({"max_results": "many"}))),
            ..Default::default()
        };
        let err = resolve(
            &EntityRef::tool("research_formatter"),
            &layers,
            &formatter_schema(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Validation {
                entity: "tool:research_formatter".into(),
                key: "max_results".into(),
                expected: "integer".into(),
                received: "string".into(),
            }
        );
    }

    #[test]
    fn unknown_keys_pass_through() {
        let layers = ScopeLayers::definition_only(map(json!({"future_flag": [1, 2, 3]})));
        let cfg = resolve(
            &EntityRef::tool("research_formatter"),
            &layers,
            &formatter_schema(),
        )
        .unwrap();
        assert_eq!(cfg.get("future_flag"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn overlay_folds_wildcard_then_entity() {
        let wildcard = map(json!({"timeout_seconds": 30, "style": "brief"}));
        let entity = map(json!({"style": "academic"}));
        let merged = overlay(Some(&wildcard), Some(&entity)).unwrap();
        assert_eq!(merged["timeout_seconds"], 30);
        assert_eq!(merged["style"], "academic");
        assert_eq!(overlay(None, None), None);
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let a = resolve(
            &EntityRef::tool("t"),
            &ScopeLayers::definition_only(map(json!({"x": 1, "y": 2}))),
            &[],
        )
        .unwrap();
        let mut reversed = ConfigMap::new();
        reversed.insert("y".into(), json!(2));
        reversed.insert("x".into(), json!(1));
        let b = resolve(&EntityRef::tool("t"), &ScopeLayers::definition_only(reversed), &[])
            .unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);
    }
}
