use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MatrixError;

/// Location of a value inside a configuration tree.
///
/// A single key addresses a top-level entry; segments walk nested maps (and
/// arrays, when a segment is a decimal index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Segments(Vec<String>),
}

impl KeyPath {
    pub fn segments(&self) -> &[String] {
        match self {
            KeyPath::Single(key) => std::slice::from_ref(key),
            KeyPath::Segments(parts) => parts,
        }
    }

    /// Naming form used in identifiers: segments joined with `+`.
    pub fn flatten(&self) -> String {
        match self {
            KeyPath::Single(key) => key.clone(),
            KeyPath::Segments(parts) => parts.join("+"),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(key) => write!(f, "{}", key),
            KeyPath::Segments(parts) => write!(f, "{}", parts.join(".")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        KeyPath::Single(value.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(value: Vec<&str>) -> Self {
        KeyPath::Segments(value.into_iter().map(str::to_string).collect())
    }
}

fn not_found(key: &KeyPath, segment: &str) -> MatrixError {
    MatrixError::KeyNotFound {
        path: key.to_string(),
        segment: segment.to_string(),
    }
}

fn step<'a>(node: &'a Value, key: &KeyPath, segment: &str) -> Result<&'a Value, MatrixError> {
    match node {
        Value::Object(map) => map.get(segment).ok_or_else(|| not_found(key, segment)),
        Value::Array(arr) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| arr.get(idx))
            .ok_or_else(|| not_found(key, segment)),
        _ => Err(not_found(key, segment)),
    }
}

fn step_mut<'a>(
    node: &'a mut Value,
    key: &KeyPath,
    segment: &str,
) -> Result<&'a mut Value, MatrixError> {
    match node {
        Value::Object(map) => map.get_mut(segment).ok_or_else(|| not_found(key, segment)),
        Value::Array(arr) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |idx| arr.get_mut(idx))
            .ok_or_else(|| not_found(key, segment)),
        _ => Err(not_found(key, segment)),
    }
}

/// Reads the value stored at `key`.
pub fn resolve<'a>(tree: &'a Value, key: &KeyPath) -> Result<&'a Value, MatrixError> {
    key.segments()
        .iter()
        .try_fold(tree, |node, segment| step(node, key, segment))
}

fn resolve_parent_mut<'a, 'k>(
    tree: &'a mut Value,
    key: &'k KeyPath,
) -> Result<(&'a mut Value, &'k str), MatrixError> {
    let segments = key.segments();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| not_found(key, ""))?;
    let mut cur = tree;
    for segment in parents {
        cur = step_mut(cur, key, segment)?;
    }
    Ok((cur, last.as_str()))
}

/// Writes `value` at `key`, in place.
///
/// Intermediate segments must already exist. A missing final segment on a map
/// is inserted; keyset validation is what rejects it afterwards.
pub fn assign(tree: &mut Value, key: &KeyPath, value: Value) -> Result<(), MatrixError> {
    let (parent, last) = resolve_parent_mut(tree, key)?;
    match parent {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(arr) => {
            let slot = last
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get_mut(idx))
                .ok_or_else(|| not_found(key, last))?;
            *slot = value;
            Ok(())
        }
        _ => Err(not_found(key, last)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_walks_nested_maps_and_arrays() {
        let tree = json!({"a": 1, "b": {"c": 2, "layers": [{"w": 8}]}});
        assert_eq!(resolve(&tree, &"a".into()).unwrap(), &json!(1));
        assert_eq!(resolve(&tree, &vec!["b", "c"].into()).unwrap(), &json!(2));
        assert_eq!(
            resolve(&tree, &vec!["b", "layers", "0", "w"].into()).unwrap(),
            &json!(8)
        );
    }

    #[test]
    fn resolve_reports_missing_segment() {
        let tree = json!({"b": {"c": 2}});
        let err = resolve(&tree, &vec!["b", "x"].into()).expect_err("x is absent");
        assert_eq!(
            err,
            MatrixError::KeyNotFound {
                path: "b.x".to_string(),
                segment: "x".to_string()
            }
        );
    }

    #[test]
    fn assign_sets_in_place() {
        let mut tree = json!({"a": 1, "b": {"c": 2}});
        assign(&mut tree, &vec!["b", "c"].into(), json!("z")).unwrap();
        assign(&mut tree, &"a".into(), json!(null)).unwrap();
        assert_eq!(tree, json!({"a": null, "b": {"c": "z"}}));
    }

    #[test]
    fn assign_does_not_create_intermediate_maps() {
        let mut tree = json!({"a": 1});
        let err = assign(&mut tree, &vec!["missing", "leaf"].into(), json!(3))
            .expect_err("intermediate map must exist");
        assert!(matches!(err, MatrixError::KeyNotFound { ref segment, .. } if segment == "missing"));
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn assign_through_scalar_fails() {
        let mut tree = json!({"a": 1});
        assert!(assign(&mut tree, &vec!["a", "b"].into(), json!(3)).is_err());
    }

    #[test]
    fn assign_array_index_out_of_range_fails() {
        let mut tree = json!({"l": [1, 2]});
        assert!(assign(&mut tree, &vec!["l", "5"].into(), json!(3)).is_err());
        assign(&mut tree, &vec!["l", "1"].into(), json!(3)).unwrap();
        assert_eq!(tree, json!({"l": [1, 3]}));
    }

    #[test]
    fn key_path_deserializes_from_string_or_list() {
        let single: KeyPath = serde_json::from_value(json!("lr")).unwrap();
        let nested: KeyPath = serde_json::from_value(json!(["optim", "lr"])).unwrap();
        assert_eq!(single, KeyPath::Single("lr".to_string()));
        assert_eq!(nested.flatten(), "optim+lr");
        assert_eq!(nested.to_string(), "optim.lr");
    }
}
