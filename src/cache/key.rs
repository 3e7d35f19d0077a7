//! Cache key derivation.

use serde_json::Value;

/// Derive the cache key for a single-record lookup.
///
/// Keys are deterministic: the field name is part of the key, so lookups on
/// different fields of the same table never collide. Values render as their
/// textual form (strings bare, everything else as compact JSON), matching
/// how filter values arrive from callers.
///
/// Returns `None` when the value is null or an empty string. An uncacheable
/// value is not an error; the caller simply skips the cache for that record.
pub fn derive_key(namespace: &str, table: &str, field: &str, value: &Value) -> Option<String> {
    let rendered = match value {
        Value::Null => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(format!("{}:{}:{}={}", namespace, table, field, rendered))
}
