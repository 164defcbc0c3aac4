use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};

/// Structural shape of one key: a leaf, a map with its own keyset, or a
/// sequence holding maps.
///
/// Sequence elements are compared by position; `None` marks an element that
/// is not a map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyDescriptor {
    Leaf(String),
    Nested(String, BTreeSet<KeyDescriptor>),
    Indexed(String, Vec<Option<BTreeSet<KeyDescriptor>>>),
}

pub type Keyset = BTreeSet<KeyDescriptor>;

fn write_keyset(f: &mut fmt::Formatter<'_>, keys: &Keyset) -> fmt::Result {
    write!(f, "{{")?;
    for (i, child) in keys.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, "}}")
}

impl fmt::Display for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyDescriptor::Leaf(key) => write!(f, "{}", key),
            KeyDescriptor::Nested(key, children) => {
                write!(f, "{}", key)?;
                write_keyset(f, children)
            }
            KeyDescriptor::Indexed(key, elements) => {
                write!(f, "{}[", key)?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match element {
                        Some(keys) => write_keyset(f, keys)?,
                        None => write!(f, "_")?,
                    }
                }
                write!(f, "]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Leaf,
    Map,
    Sequence,
}

fn shape(value: &Value) -> Shape {
    match value {
        Value::Object(_) => Shape::Map,
        Value::Array(items) if items.iter().any(Value::is_object) => Shape::Sequence,
        _ => Shape::Leaf,
    }
}

/// Keys of `tree`, recursively. Values are ignored; non-map trees have an empty keyset.
///
/// Arrays without maps are leaves. Arrays holding maps keep the keyset of
/// each element, so a key added inside `layers[0]` changes the keyset.
pub fn keyset(tree: &Value) -> Keyset {
    match tree {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match (shape(value), value) {
                (Shape::Map, _) => KeyDescriptor::Nested(key.clone(), keyset(value)),
                (Shape::Sequence, Value::Array(items)) => KeyDescriptor::Indexed(
                    key.clone(),
                    items
                        .iter()
                        .map(|item| item.is_object().then(|| keyset(item)))
                        .collect(),
                ),
                _ => KeyDescriptor::Leaf(key.clone()),
            })
            .collect(),
        _ => Keyset::new(),
    }
}

/// Dotted paths of keys present in `left` but not in `right`.
///
/// Descends into keys that are maps on both sides, and into map-holding arrays
/// by position (`layers.0.width`), so a typo deep in the tree is reported by
/// its full path. A key whose shape differs between the sides is reported at
/// that key, on both sides.
pub fn extraneous_paths(left: &Value, right: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let (Value::Object(l), Value::Object(r)) = (left, right) {
        collect_map(l, r, "", &mut out);
    }
    out
}

/// Dotted paths of keys present in `base` but missing from `variant`.
pub fn missing_paths(variant: &Value, base: &Value) -> Vec<String> {
    extraneous_paths(base, variant)
}

fn child_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn collect_map(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<String>,
) {
    let mut keys: Vec<&String> = left.keys().collect();
    keys.sort();
    for key in keys {
        let path = child_path(prefix, key);
        let (Some(l), Some(r)) = (left.get(key), right.get(key)) else {
            out.push(path);
            continue;
        };
        match (shape(l), l, r) {
            (lshape, _, _) if lshape != shape(r) => out.push(path),
            (Shape::Map, Value::Object(l), Value::Object(r)) => collect_map(l, r, &path, out),
            (Shape::Sequence, Value::Array(l), Value::Array(r)) => {
                collect_sequence(l, r, &path, out)
            }
            _ => {}
        }
    }
}

fn collect_sequence(left: &[Value], right: &[Value], prefix: &str, out: &mut Vec<String>) {
    for (i, l) in left.iter().enumerate() {
        let path = child_path(prefix, &i.to_string());
        match (l, right.get(i)) {
            (_, None) => out.push(path),
            (Value::Object(l), Some(Value::Object(r))) => collect_map(l, r, &path, out),
            (l, Some(r)) if l.is_object() != r.is_object() => out.push(path),
            _ => {}
        }
    }
}
