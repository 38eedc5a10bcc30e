use serde_json::{Map, Value};

/// Flattens a nested values document into a single level map whose keys are
/// the dot joined paths of the leaves, e.g. `{a: {b: {c: true}}}` becomes
/// `{"a.b.c": true}`. Leaf values keep their type.
///
/// Sequences are indexed one level deep only: each element is stored under
/// `<path>.<index>` as is, even when the element is itself a map or a sequence.
pub fn flatten_key(prefix: &str, src: &Map<String, Value>, dest: &mut Map<String, Value>) {
    for (key, value) in src {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(child) => flatten_key(&path, child, dest),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    dest.insert(format!("{path}.{i}"), item.clone());
                }
            }
            _ => {
                dest.insert(path, value.clone());
            }
        }
    }
}

/// Convenience wrapper around [`flatten_key`] starting from an empty prefix.
pub fn flatten(src: &Map<String, Value>) -> Map<String, Value> {
    let mut dest = Map::with_capacity(src.len());
    flatten_key("", src, &mut dest);
    dest
}
