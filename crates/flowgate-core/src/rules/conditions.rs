//! Shorthand constructors for common conditions.

use serde_json::{Value, json};

pub fn field_equals(field: &str, value: impl Into<Value>) -> Value {
    json!({"field": field, "operator": "==", "value": value.into()})
}

pub fn field_not_equals(field: &str, value: impl Into<Value>) -> Value {
    json!({"field": field, "operator": "!=", "value": value.into()})
}

pub fn field_greater_than(field: &str, value: impl Into<Value>) -> Value {
    json!({"field": field, "operator": ">", "value": value.into()})
}

pub fn field_less_than(field: &str, value: impl Into<Value>) -> Value {
    json!({"field": field, "operator": "<", "value": value.into()})
}

pub fn field_is_null(field: &str) -> Value {
    json!({"field": field, "operator": "IS NULL"})
}

pub fn field_is_not_null(field: &str) -> Value {
    json!({"field": field, "operator": "IS NOT NULL"})
}

pub fn field_in(field: &str, values: Vec<Value>) -> Value {
    json!({"IN": field, "values": values})
}

pub fn field_matches_pattern(field: &str, pattern: &str) -> Value {
    json!({"MATCHES": {"field": field, "pattern": pattern}})
}

pub fn field_contains(field: &str, value: impl Into<Value>) -> Value {
    json!({"CONTAINS": {"field": field, "value": value.into()}})
}

pub fn all_of(conditions: impl IntoIterator<Item = Value>) -> Value {
    json!({"AND": conditions.into_iter().collect::<Vec<_>>()})
}

pub fn any_of(conditions: impl IntoIterator<Item = Value>) -> Value {
    json!({"OR": conditions.into_iter().collect::<Vec<_>>()})
}

pub fn none_of(condition: Value) -> Value {
    json!({"NOT": condition})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::expression::{evaluate, validate_syntax};

    #[test]
    fn test_builders_produce_valid_conditions() {
        let condition = all_of([
            field_is_not_null("doc.title"),
            any_of([field_greater_than("doc.pages", 2), field_equals("doc.kind", "brief")]),
            none_of(field_in("doc.state", vec![json!("draft")])),
            field_matches_pattern("doc.id", "PRD-"),
            field_contains("doc.title", "Launch"),
            field_not_equals("doc.owner", "nobody"),
            field_less_than("doc.risk", 5),
            none_of(field_is_null("doc.owner")),
        ]);
        assert!(validate_syntax(&condition).is_ok());

        let ctx = json!({"doc": {"title": "Launch plan", "pages": 3, "state": "final", "id": "PRD-9", "owner": "ada", "risk": 1}});
        assert!(evaluate(&condition, &ctx).unwrap().result);
    }
}
