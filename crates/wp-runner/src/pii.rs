//! PII masking with a caller-supplied mapping of real values to placeholders.

use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct PiiMasker {
    /// (real, placeholder), longest real value first so overlapping values
    /// mask greedily.
    pairs: Vec<(String, String)>,
}

impl PiiMasker {
    pub fn new(mapping: &BTreeMap<String, String>) -> Self {
        let mut pairs: Vec<(String, String)> = mapping
            .iter()
            .filter(|(real, placeholder)| !real.is_empty() && !placeholder.is_empty())
            .map(|(r, p)| (r.clone(), p.clone()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn anonymize_text(&self, text: &str) -> String {
        self.pairs
            .iter()
            .fold(text.to_string(), |acc, (real, placeholder)| acc.replace(real, placeholder))
    }

    pub fn restore_text(&self, text: &str) -> String {
        self.pairs
            .iter()
            .fold(text.to_string(), |acc, (real, placeholder)| acc.replace(placeholder, real))
    }

    /// Mask string leaves before they reach the planner.
    pub fn anonymize(&self, value: &Value) -> Value {
        map_strings(value, &|s| self.anonymize_text(s))
    }

    /// Put real values back into outgoing tool arguments.
    pub fn restore(&self, value: &Value) -> Value {
        map_strings(value, &|s| self.restore_text(s))
    }
}

fn map_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}
