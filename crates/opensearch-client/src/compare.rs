//! Structural comparison of engine payloads
//!
//! The engine echoes documents back in its own canonical form: nested
//! settings may come back flattened, numbers may come back as strings and
//! empty collections may be dropped. These comparators decide whether a
//! desired payload and the engine's copy mean the same thing.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Whether two documents are semantically equal
///
/// Objects are compared after flattening nested keys into dotted paths, so
/// `{"index": {"number_of_shards": 1}}` equals `{"index.number_of_shards": "1"}`.
/// Null, empty strings and empty collections are interchangeable with an
/// absent key. Arrays compare element-wise in order.
pub fn semantic_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_), _) | (_, Value::Object(_)) => {
            let fa = flatten(a);
            let fb = flatten(b);
            fa.keys()
                .chain(fb.keys())
                .all(|k| leaf_eq(fa.get(k).unwrap_or(&Value::Null), fb.get(k).unwrap_or(&Value::Null)))
        }
        _ => leaf_eq(a, b),
    }
}

/// [`semantic_eq`] over serializable payloads
pub fn payload_eq<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => semantic_eq(&a, &b),
        _ => false,
    }
}

fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(String::new(), value, &mut out);
    out
}

fn flatten_into(prefix: String, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(key, v, out);
            }
        }
        other => {
            if !is_empty(other) {
                out.insert(prefix, other.clone());
            }
        }
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn leaf_eq(a: &Value, b: &Value) -> bool {
    if is_empty(a) && is_empty(b) {
        return true;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| semantic_eq(p, q))
        }
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.parse::<bool>().ok() == Some(*x)
        }
        (x, y) => x == y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn nested_and_flattened_settings_are_equal() {
        let desired = json!({"settings": {"index": {"number_of_shards": 1, "refresh_interval": "5s"}}});
        let current = json!({"settings": {"index.number_of_shards": "1", "index.refresh_interval": "5s"}});
        assert!(semantic_eq(&desired, &current));
    }

    #[test]
    fn null_and_empty_are_equal() {
        assert!(semantic_eq(
            &json!({"aliases": {}, "composed_of": [], "description": null}),
            &json!({})
        ));
        assert!(semantic_eq(&json!({"dls": ""}), &json!({"dls": null})));
    }

    #[rstest]
    #[case::integer_and_float(json!({"priority": 100}), json!({"priority": 100.0}), true)]
    #[case::different_numbers(json!({"version": 1}), json!({"version": 0}), false)]
    #[case::bool_as_string(json!({"compress": true}), json!({"compress": "true"}), true)]
    #[case::bool_mismatch(json!({"compress": true}), json!({"compress": "false"}), false)]
    #[case::number_as_string(json!({"replicas": 2}), json!({"replicas": "2"}), true)]
    fn scalars_compare_by_value(
        #[case] desired: serde_json::Value,
        #[case] current: serde_json::Value,
        #[case] equal: bool,
    ) {
        assert_eq!(semantic_eq(&desired, &current), equal);
    }

    #[test]
    fn array_order_matters() {
        assert!(!semantic_eq(
            &json!({"index_patterns": ["a-*", "b-*"]}),
            &json!({"index_patterns": ["b-*", "a-*"]})
        ));
    }

    #[test]
    fn extra_fields_are_drift() {
        let desired = json!({"states": [{"name": "hot", "actions": [{"rollover": {"min_size": "50gb"}}]}]});
        let current = json!({
            "states": [{"name": "hot", "actions": [{"retry": {"count": 3}, "rollover": {"min_size": "50gb"}}]}]
        });
        assert!(!semantic_eq(&desired, &current));
    }

    #[test]
    fn payloads_compare_through_json() {
        use crate::types::RoleMappingPayload;
        let a = RoleMappingPayload {
            users: vec!["alice".to_string()],
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(payload_eq(&a, &b));
        b.backend_roles.push("ops".to_string());
        assert!(!payload_eq(&a, &b));
    }
}
