//! Transformation actions carried by rules.
//!
//! Supported action maps:
//! - `{"type": "set_field", "field": "a.b", "value": ..}` creates intermediate maps as needed
//! - `{"type": "remove_field", "field": "a.b"}` is a no-op when the path does not exist
//! - `{"type": "merge_data", "data": {..}}` shallow-merges into the root map

use serde_json::{Map, Value};

use super::error::{ExpressionError, Result};

/// Applies `action` to `context` in place.
pub fn apply_action(action: &Value, context: &mut Value) -> Result<()> {
    let action_type = action.get("type").and_then(Value::as_str).unwrap_or_default();

    match action_type {
        "set_field" => {
            let field = field_of(action)?;
            let value = action.get("value").cloned().unwrap_or(Value::Null);
            let path: Vec<&str> = field.split('.').collect();
            set_field(context, &path, value);
            Ok(())
        }
        "remove_field" => {
            remove_field(context, field_of(action)?);
            Ok(())
        }
        "merge_data" => {
            let Some(Value::Object(data)) = action.get("data") else {
                return Err(ExpressionError::InvalidOperand {
                    node: "merge_data".to_string(),
                    member: "data".to_string(),
                    reason: "expected an object".to_string(),
                });
            };
            if !context.is_object() {
                *context = Value::Object(Map::new());
            }
            if let Value::Object(root) = context {
                for (key, value) in data {
                    root.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        }
        other => Err(ExpressionError::UnknownAction(other.to_string())),
    }
}

fn field_of(action: &Value) -> Result<&str> {
    action.get("field").and_then(Value::as_str).ok_or_else(|| ExpressionError::MissingOperand {
        node: "action".to_string(),
        member: "field".to_string(),
    })
}

fn set_field(current: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *current = value;
        return;
    };
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        let slot = map.entry((*head).to_string()).or_insert(Value::Null);
        set_field(slot, rest, value);
    }
}

fn remove_field(context: &mut Value, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = context;
    for part in parts {
        match current.get_mut(part) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(last);
    }
}
