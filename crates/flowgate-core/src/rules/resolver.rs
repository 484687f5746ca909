//! Field lookup into nested context documents.
//!
//! Paths are dot-separated keys, any of which may carry one or more `[n]` indexes
//! (`items[0].id`, `matrix[1][2]`). A trailing `.length` yields the size of the parent
//! value instead of descending further. Missing keys, out-of-range indexes and lookups
//! through scalars all resolve to `None`, which callers treat as absent.

use serde_json::Value;

const LENGTH_SUFFIX: &str = ".length";

/// Resolves `path` against `context`. JSON `null` resolves to absent.
pub fn resolve(path: &str, context: &Value) -> Option<Value> {
    if let Some(parent) = path.strip_suffix(LENGTH_SUFFIX) {
        let count = resolve_ref(parent, context).map_or(0, length_of);
        return Some(Value::from(count));
    }

    resolve_ref(path, context).cloned()
}

/// Resolves `path` without cloning. `.length` is not interpreted here.
pub fn resolve_ref<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    let mut current = context;

    for segment in path.split('.') {
        let (key, indexes) = split_segment(segment)?;

        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }

        for index in indexes {
            current = current.as_array()?.get(index)?;
        }
    }

    if current.is_null() { None } else { Some(current) }
}

fn length_of(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(text) => text.chars().count(),
        _ => 0,
    }
}

/// Splits `items[0][1]` into `("items", [0, 1])`. Malformed indexes make the segment unresolvable.
fn split_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let key = &segment[..open];
    let mut indexes = Vec::new();
    let mut rest = &segment[open..];

    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indexes.push(inner[..close].trim().parse::<usize>().ok()?);
        rest = &inner[close + 1..];
    }

    Some((key, indexes))
}
