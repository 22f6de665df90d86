//! JSON body assembly for template and policy payloads

use serde_json::{Map, Value};

/// Drop null members at every depth
pub(crate) fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(without_nulls).collect()),
        other => other,
    }
}

/// Index settings with every top-level key under the `index.` namespace
///
/// The engine echoes `number_of_shards` back as `index.number_of_shards`.
pub(crate) fn index_settings(settings: &Value) -> Value {
    let Value::Object(map) = settings else {
        return settings.clone();
    };
    let normalized: Map<String, Value> = map
        .iter()
        .map(|(k, v)| {
            if k == "index" || k.starts_with("index.") {
                (k.clone(), v.clone())
            } else {
                (format!("index.{}", k), v.clone())
            }
        })
        .collect();
    Value::Object(normalized)
}
