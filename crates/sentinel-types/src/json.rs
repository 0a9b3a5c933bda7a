use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque, recursive value used for message payloads and step parameters.
///
/// Messages and steps carry dynamically-typed data; rather than a duck-typed
/// `HashMap<String, serde_json::Value>` at every call site, this gives the
/// router and orchestrator a single named type to validate and pattern-match
/// on. `BTreeMap` keeps key order stable, which matters for the plan
/// fingerprint in `sentinel-runtime` (sorted parameter keys).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(BTreeMap<String, JsonValue>),
}

impl JsonValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, JsonValue>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Resolve a dot-path rooted at this value, e.g. `"result.count"`.
    ///
    /// Returns `None` for any missing segment, matching the conditional-step
    /// evaluator's fail-closed contract in `sentinel-runtime::condition`.
    pub fn get_path(&self, path: &str) -> Option<&JsonValue> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl From<serde_json::Value> for JsonValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => JsonValue::Null,
            serde_json::Value::Bool(b) => JsonValue::Bool(b),
            serde_json::Value::Number(n) => JsonValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => JsonValue::String(s),
            serde_json::Value::Array(arr) => {
                JsonValue::Array(arr.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(map) => {
                JsonValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<JsonValue> for serde_json::Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(b),
            JsonValue::Number(n) => serde_json::json!(n),
            JsonValue::String(s) => serde_json::Value::String(s),
            JsonValue::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            JsonValue::Object(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: Vec<(&str, JsonValue)>) -> JsonValue {
        JsonValue::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn get_path_resolves_nested_segments() {
        let value = obj(vec![(
            "result",
            obj(vec![("count", JsonValue::Number(3.0))]),
        )]);

        assert_eq!(value.get_path("result.count"), Some(&JsonValue::Number(3.0)));
    }

    #[test]
    fn get_path_returns_none_for_missing_segment() {
        let value = obj(vec![("result", obj(vec![]))]);

        assert_eq!(value.get_path("result.count"), None);
        assert_eq!(value.get_path("missing.count"), None);
    }

    #[test]
    fn get_path_returns_none_through_non_object() {
        let value = obj(vec![("result", JsonValue::Number(1.0))]);

        assert_eq!(value.get_path("result.count"), None);
    }

    #[test]
    fn round_trips_through_serde_json_value() {
        let original = obj(vec![
            ("a", JsonValue::Bool(true)),
            ("b", JsonValue::Array(vec![JsonValue::Number(1.0), JsonValue::Null])),
        ]);

        let as_serde: serde_json::Value = original.clone().into();
        let back: JsonValue = as_serde.into();

        assert_eq!(original, back);
    }
}
