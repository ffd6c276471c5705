//! Config schema validation. Keys without a declared field pass through.

use crate::ConfigError;
use serde_json::Value;
use wp_core::config::{value_type_name, ConfigField, ConfigFieldType, ConfigMap, EntityRef};

/// Validate a merged config: declared keys must match their field type and
/// required fields must be present.
pub fn validate(
    entity: &EntityRef,
    values: &ConfigMap,
    config_schema: &[ConfigField],
) -> Result<(), ConfigError> {
    for field in config_schema {
        match values.get(&field.name) {
            Some(value) => check_field(entity, field, value)?,
            None if field.required => {
                return Err(violation(entity, field, field.field_type.expected(), "missing"));
            }
            None => {}
        }
    }
    Ok(())
}

/// Validate only the keys a single layer sets. Used for definition-time
/// checks, where required keys may still arrive from a runtime scope.
pub fn validate_present(
    entity: &EntityRef,
    values: &ConfigMap,
    config_schema: &[ConfigField],
) -> Result<(), ConfigError> {
    for field in config_schema {
        if let Some(value) = values.get(&field.name) {
            check_field(entity, field, value)?;
        }
    }
    Ok(())
}

fn check_field(entity: &EntityRef, field: &ConfigField, value: &Value) -> Result<(), ConfigError> {
    if value.is_null() && !field.required {
        return Ok(());
    }

    let type_ok = match field.field_type {
        ConfigFieldType::String | ConfigFieldType::FilePath => value.is_string(),
        ConfigFieldType::Integer => value.is_i64() || value.is_u64(),
        ConfigFieldType::Number => value.is_number(),
        ConfigFieldType::Boolean => value.is_boolean(),
        ConfigFieldType::Object => value.is_object(),
        ConfigFieldType::Json => true,
        ConfigFieldType::Select => field.options.is_empty() || field.options.contains(value),
        ConfigFieldType::MultiSelect => value
            .as_array()
            .is_some_and(|items| {
                field.options.is_empty() || items.iter().all(|i| field.options.contains(i))
            }),
    };

    if !type_ok {
        let expected = match field.field_type {
            ConfigFieldType::Select | ConfigFieldType::MultiSelect if !field.options.is_empty() => {
                format!("{} {}", field.field_type.expected(), Value::Array(field.options.clone()))
            }
            _ => field.field_type.expected().to_string(),
        };
        let received = match field.field_type {
            ConfigFieldType::Select => value.to_string(),
            _ => value_type_name(value).to_string(),
        };
        return Err(violation(entity, field, &expected, &received));
    }

    if let Some(n) = value.as_f64() {
        let below = field.minimum.is_some_and(|min| n < min);
        let above = field.maximum.is_some_and(|max| n > max);
        if below || above {
            let expected = format!(
                "{} in [{}, {}]",
                field.field_type.expected(),
                field.minimum.map_or("-inf".to_string(), |v| v.to_string()),
                field.maximum.map_or("inf".to_string(), |v| v.to_string()),
            );
            return Err(violation(entity, field, &expected, &value.to_string()));
        }
    }

    Ok(())
}

fn violation(entity: &EntityRef, field: &ConfigField, expected: &str, received: &str) -> ConfigError {
    ConfigError::Validation {
        entity: entity.to_string(),
        key: field.name.clone(),
        expected: expected.to_string(),
        received: received.to_string(),
    }
}
