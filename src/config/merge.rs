//! Settings merge logic
//!
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge two JSON values.
///
/// Null in the overlay overrides any value, so a later layer can unset a
/// setting such as `base_path`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        // Arrays: REPLACE (no concatenation)
        (Value::Array(_), overlay @ Value::Array(_)) => overlay,

        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_table_merge() {
        let base = json!({
            "artifacts": {
                "base_path": null,
                "follow_symlink_dirs": false
            }
        });
        let overlay = json!({
            "artifacts": {
                "follow_symlink_dirs": true
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["artifacts"]["follow_symlink_dirs"], true);
        assert!(result["artifacts"]["base_path"].is_null());
    }

    #[test]
    fn test_pattern_list_replaced() {
        let base = json!({"artifacts": {"exclude_patterns": ["*.pyc", "*.o", ".git"]}});
        let overlay = json!({"artifacts": {"exclude_patterns": ["target"]}});
        let result = deep_merge(base, overlay);

        assert_eq!(result["artifacts"]["exclude_patterns"], json!(["target"]));
    }

    #[test]
    fn test_null_unsets() {
        let base = json!({"artifacts": {"base_path": "build"}});
        let overlay = json!({"artifacts": {"base_path": null}});
        let result = deep_merge(base, overlay);

        assert!(result["artifacts"]["base_path"].is_null());
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"artifacts": {"base_path": null, "hash_algorithms": ["sha256"]}});
        let user = json!({"artifacts": {"base_path": "user"}});
        let project = json!({"artifacts": {"base_path": "project"}});

        let result = merge_layers(vec![builtin, user, project]);

        assert_eq!(result["artifacts"]["base_path"], "project");
        assert_eq!(result["artifacts"]["hash_algorithms"], json!(["sha256"]));
    }
}
