//! Access-path resolution against a fetched state tree

use serde_json::Value;

/// Published when a path does not lead to a value
pub const MISSING: &str = "None";

/// Published for an explicit JSON null
pub const NULL: &str = "null";

/// Walk a dot-separated path and render what it points at.
///
/// The walk stops at the first non-object value, ignoring any remaining
/// segments. Missing keys and paths ending on an object yield [`MISSING`].
pub fn resolve(tree: &Value, path: &str) -> String {
    let mut current = tree;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return MISSING.to_string(),
            },
            leaf => return render(leaf),
        }
    }
    render(current)
}

fn render(value: &Value) -> String {
    match value {
        Value::Object(_) => MISSING.to_string(),
        Value::Null => NULL.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            // Whole floats print without the fraction, as integers do
            Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => {
                format!("{:.0}", f)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_leaf() {
        let tree = json!({"a": {"b": 5, "s": "text", "t": true}});
        assert_eq!(resolve(&tree, "a.b"), "5");
        assert_eq!(resolve(&tree, "a.s"), "text");
        assert_eq!(resolve(&tree, "a.t"), "true");
    }

    #[test]
    fn test_resolve_missing_and_object() {
        let tree = json!({"a": {"b": 5}});
        assert_eq!(resolve(&tree, "a.c"), "None");
        assert_eq!(resolve(&tree, "a"), "None");
        assert_eq!(resolve(&tree, "x.y.z"), "None");
    }

    #[test]
    fn test_resolve_stops_at_leaf() {
        let tree = json!({"a": {"b": 5}});
        assert_eq!(resolve(&tree, "a.b.c.d"), "5");
    }

    #[test]
    fn test_resolve_null_and_array() {
        let tree = json!({"a": null, "l": [1, "x"], "f": 2.5});
        assert_eq!(resolve(&tree, "a"), "null");
        assert_eq!(resolve(&tree, "a.deeper"), "null");
        assert_eq!(resolve(&tree, "l"), "[1,\"x\"]");
        assert_eq!(resolve(&tree, "f"), "2.5");
    }

    #[test]
    fn test_resolve_whole_float() {
        let tree = json!({"t": 21.0, "neg": -3.0, "big": 1e22, "i": 7});
        assert_eq!(resolve(&tree, "t"), "21");
        assert_eq!(resolve(&tree, "neg"), "-3");
        assert_eq!(resolve(&tree, "big"), "1e22");
        assert_eq!(resolve(&tree, "i"), "7");
    }
}
