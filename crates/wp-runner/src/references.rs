//! Reference Resolver — `$tool_output.<call_id>` substitution in tool arguments.
//!
//! A string leaf that is exactly one placeholder becomes the stored value
//! itself; placeholders embedded in other text are replaced by the value's
//! string form (raw for strings, compact JSON otherwise). Resolved values are
//! not re-scanned.

use crate::store::ToolOutputStore;
use crate::RunnerError;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use wp_core::trace::CallId;

pub const PLACEHOLDER_PREFIX: &str = "$tool_output.";

fn pattern() -> Result<&'static Regex, RunnerError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$tool_output\.([A-Za-z0-9_\-]+)"))
        .as_ref()
        .map_err(|e| RunnerError::Pattern(e.to_string()))
}

/// Placeholder text for a call id.
pub fn placeholder(call_id: &CallId) -> String {
    format!("{PLACEHOLDER_PREFIX}{call_id}")
}

/// Resolve every placeholder in `arguments` against `store`, once.
pub fn resolve_references(arguments: &Value, store: &ToolOutputStore) -> Result<Value, RunnerError> {
    match arguments {
        Value::String(s) => resolve_string(s, store),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_references(item, store))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_references(value, store)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn lookup(id: &str, store: &ToolOutputStore) -> Result<Value, RunnerError> {
    let call_id = CallId::from(id);
    store
        .get(&call_id)
        .ok_or(RunnerError::UnresolvedReference(call_id))
}

fn resolve_string(s: &str, store: &ToolOutputStore) -> Result<Value, RunnerError> {
    if !s.contains(PLACEHOLDER_PREFIX) {
        return Ok(Value::String(s.to_string()));
    }

    let pattern = pattern()?;
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in pattern.captures_iter(s) {
        let (Some(m), Some(id)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if m.start() == 0 && m.end() == s.len() {
            return lookup(id.as_str(), store);
        }
        out.push_str(&s[last..m.start()]);
        out.push_str(&stringify(&lookup(id.as_str(), store)?));
        last = m.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
