//! Condition expression language.
//!
//! Conditions are JSON trees. [`Expression::parse`] turns a tree into a closed set of
//! variants and rejects anything else, so syntax validation and evaluation share a single
//! grammar:
//!
//! | Shape | Meaning |
//! |-------|---------|
//! | `{"AND": [..]}` | every child holds (empty is true) |
//! | `{"OR": [..]}` | some child holds (empty is false) |
//! | `{"NOT": expr}` | negation |
//! | `{"field", "operator", "value"?}` | comparison, `==` `!=` `<` `>` `<=` `>=` `IS NULL` `IS NOT NULL` |
//! | `{"IN": field, "values": [..]}` | membership |
//! | `{"NOT IN": field, "values": [..]}` | non-membership |
//! | `{"MATCHES": {"field", "pattern"}}` | regex anchored at the start |
//! | `{"CONTAINS": {"field", "value"}}` | substring of the string form |
//!
//! Absent fields satisfy only `IS NULL`. Comparisons coerce the resolved value toward the
//! type of the expected value and are false when that fails.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use super::error::{ExpressionError, Result};
use super::resolver::resolve;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    IsNull,
    IsNotNull,
}

impl CompareOp {
    fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            "IS NULL" => Some(Self::IsNull),
            "IS NOT NULL" => Some(Self::IsNotNull),
            _ => None,
        }
    }

    /// The operator as written in conditions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed condition.
#[derive(Debug, Clone)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Compare { field: String, op: CompareOp, value: Value },
    In { field: String, values: Vec<Value>, negated: bool },
    Matches { field: String, pattern: String, regex: Regex },
    Contains { field: String, value: Value },
}

/// One leaf check performed during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTrace {
    /// Field path.
    pub field: String,
    /// Operator as written (`==`, `IN`, `MATCHES`, ...).
    pub operator: String,
    /// Expected operand.
    pub expected: Value,
    /// Resolved value, `None` when absent.
    pub actual: Option<Value>,
    /// Leaf outcome.
    pub result: bool,
}

/// Result of evaluating a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Overall outcome.
    pub result: bool,
    /// Leaf checks in evaluation order. Short-circuited branches do not appear.
    pub trace: Vec<CheckTrace>,
}

impl Evaluation {
    /// Leaf checks that came out false.
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckTrace> {
        self.trace.iter().filter(|check| !check.result)
    }
}

impl Expression {
    /// Parses a condition tree.
    pub fn parse(node: &Value) -> Result<Self> {
        let map = node.as_object().ok_or_else(|| ExpressionError::NotAnObject(node.to_string()))?;

        if let Some(children) = map.get("AND") {
            return Ok(Self::And(parse_list("AND", children)?));
        }
        if let Some(children) = map.get("OR") {
            return Ok(Self::Or(parse_list("OR", children)?));
        }
        if let Some(child) = map.get("NOT") {
            return Ok(Self::Not(Box::new(Self::parse(child)?)));
        }
        if map.contains_key("field") {
            return parse_comparison(map);
        }
        if let Some(field) = map.get("IN") {
            return parse_membership("IN", field, map, false);
        }
        if let Some(field) = map.get("NOT IN") {
            return parse_membership("NOT IN", field, map, true);
        }
        if let Some(body) = map.get("MATCHES") {
            return parse_matches(body);
        }
        if let Some(body) = map.get("CONTAINS") {
            let body = body_object("CONTAINS", body)?;
            let field = string_member("CONTAINS", body, "field")?;
            let value = body.get("value").cloned().ok_or_else(|| missing("CONTAINS", "value"))?;
            return Ok(Self::Contains { field, value });
        }

        Err(ExpressionError::UnknownNode(node.to_string()))
    }

    /// Evaluates the expression against `context`.
    pub fn evaluate(&self, context: &Value) -> Evaluation {
        let mut trace = Vec::new();
        let result = self.eval(context, &mut trace);
        Evaluation { result, trace }
    }

    /// Every field path the expression reads, in tree order.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|child| child.collect_fields(out));
            }
            Self::Not(child) => child.collect_fields(out),
            Self::Compare { field, .. }
            | Self::In { field, .. }
            | Self::Matches { field, .. }
            | Self::Contains { field, .. } => out.push(field),
        }
    }

    fn eval(&self, context: &Value, trace: &mut Vec<CheckTrace>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|child| child.eval(context, trace)),
            Self::Or(children) => children.iter().any(|child| child.eval(context, trace)),
            Self::Not(child) => !child.eval(context, trace),
            Self::Compare { field, op, value } => {
                let actual = resolve(field, context);
                let result = compare(actual.as_ref(), *op, value);
                trace.push(check(field, op.as_str(), value.clone(), actual, result));
                result
            }
            Self::In { field, values, negated } => {
                let actual = resolve(field, context);
                let result = actual.as_ref().is_some_and(|actual| {
                    values.iter().any(|candidate| loosely_equal(actual, candidate)) != *negated
                });
                let operator = if *negated { "NOT IN" } else { "IN" };
                trace.push(check(field, operator, Value::Array(values.clone()), actual, result));
                result
            }
            Self::Matches { field, pattern, regex } => {
                let actual = resolve(field, context);
                let result = actual.as_ref().is_some_and(|actual| regex.is_match(&string_form(actual)));
                trace.push(check(field, "MATCHES", Value::String(pattern.clone()), actual, result));
                result
            }
            Self::Contains { field, value } => {
                let actual = resolve(field, context);
                let needle = string_form(value);
                let result = actual.as_ref().is_some_and(|actual| string_form(actual).contains(&needle));
                trace.push(check(field, "CONTAINS", value.clone(), actual, result));
                result
            }
        }
    }
}

/// Checks that `condition` fits the grammar without evaluating it.
pub fn validate_syntax(condition: &Value) -> Result<()> {
    Expression::parse(condition).map(|_| ())
}

/// Parses and evaluates `condition` against `context`.
pub fn evaluate(condition: &Value, context: &Value) -> Result<Evaluation> {
    Ok(Expression::parse(condition)?.evaluate(context))
}

/// Field paths referenced by `condition`.
pub fn referenced_fields(condition: &Value) -> Result<Vec<String>> {
    let expression = Expression::parse(condition)?;
    Ok(expression.fields().into_iter().map(str::to_string).collect())
}

/// Maps every field `condition` references to its resolved value, null when absent.
pub fn context_snapshot(expression: &Expression, context: &Value) -> Map<String, Value> {
    expression
        .fields()
        .into_iter()
        .map(|field| (field.to_string(), resolve(field, context).unwrap_or(Value::Null)))
        .collect()
}

fn check(field: &str, operator: &str, expected: Value, actual: Option<Value>, result: bool) -> CheckTrace {
    CheckTrace { field: field.to_string(), operator: operator.to_string(), expected, actual, result }
}

fn missing(node: &str, member: &str) -> ExpressionError {
    ExpressionError::MissingOperand { node: node.to_string(), member: member.to_string() }
}

fn invalid(node: &str, member: &str, reason: &str) -> ExpressionError {
    ExpressionError::InvalidOperand {
        node: node.to_string(),
        member: member.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_list(node: &str, children: &Value) -> Result<Vec<Expression>> {
    children
        .as_array()
        .ok_or_else(|| invalid(node, node, "expected a list of conditions"))?
        .iter()
        .map(Expression::parse)
        .collect()
}

fn body_object<'a>(node: &str, body: &'a Value) -> Result<&'a Map<String, Value>> {
    body.as_object().ok_or_else(|| invalid(node, node, "expected an object"))
}

fn string_member(node: &str, map: &Map<String, Value>, member: &str) -> Result<String> {
    match map.get(member) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(invalid(node, member, "expected a string")),
        None => Err(missing(node, member)),
    }
}

fn parse_comparison(map: &Map<String, Value>) -> Result<Expression> {
    let field = string_member("comparison", map, "field")?;
    let symbol = string_member("comparison", map, "operator")?;
    let op = CompareOp::parse(&symbol).ok_or(ExpressionError::UnknownOperator(symbol))?;

    let value = match map.get("value") {
        Some(value) => value.clone(),
        None if op.is_null_check() => Value::Null,
        None => return Err(missing("comparison", "value")),
    };

    Ok(Expression::Compare { field, op, value })
}

fn parse_membership(
    node: &str,
    field: &Value,
    map: &Map<String, Value>,
    negated: bool,
) -> Result<Expression> {
    let field = field.as_str().ok_or_else(|| invalid(node, node, "expected a field path"))?;
    let values = match map.get("values") {
        Some(Value::Array(values)) => values.clone(),
        Some(_) => return Err(invalid(node, "values", "expected a list")),
        None => return Err(missing(node, "values")),
    };
    Ok(Expression::In { field: field.to_string(), values, negated })
}

fn parse_matches(body: &Value) -> Result<Expression> {
    let body = body_object("MATCHES", body)?;
    let field = string_member("MATCHES", body, "field")?;
    let pattern = string_member("MATCHES", body, "pattern")?;
    let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
        ExpressionError::InvalidPattern { pattern: pattern.clone(), reason: e.to_string() }
    })?;
    Ok(Expression::Matches { field, pattern, regex })
}

/// String form used by MATCHES, CONTAINS and string coercion. Strings are not quoted.
pub(crate) fn string_form(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Coerces `actual` toward the type of `expected`: string to integer, string or integer
/// to float, anything to string. Returns `None` when coercion is impossible.
fn coerce(actual: &Value, expected: &Value) -> Option<Value> {
    match (actual, expected) {
        (Value::String(text), Value::Number(n)) if n.is_f64() => {
            text.trim().parse::<f64>().ok().map(Value::from)
        }
        (Value::String(text), Value::Number(_)) => text.trim().parse::<i64>().ok().map(Value::from),
        (Value::Number(_) | Value::Bool(_), Value::String(_)) => Some(Value::String(string_form(actual))),
        _ => Some(actual.clone()),
    }
}

fn compare(actual: Option<&Value>, op: CompareOp, expected: &Value) -> bool {
    match (op, actual) {
        (CompareOp::IsNull, actual) => actual.is_none(),
        (CompareOp::IsNotNull, actual) => actual.is_some(),
        (_, None) => false,
        (op, Some(actual)) => {
            let Some(actual) = coerce(actual, expected) else {
                return false;
            };
            match op {
                CompareOp::Eq => loosely_equal(&actual, expected),
                CompareOp::Ne => !loosely_equal(&actual, expected),
                CompareOp::Lt => ordering(&actual, expected) == Some(Ordering::Less),
                CompareOp::Gt => ordering(&actual, expected) == Some(Ordering::Greater),
                CompareOp::Le => matches!(ordering(&actual, expected), Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Ge => {
                    matches!(ordering(&actual, expected), Some(Ordering::Greater | Ordering::Equal))
                }
                CompareOp::IsNull | CompareOp::IsNotNull => false,
            }
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(condition: Value, context: Value) -> bool {
        evaluate(&condition, &context).unwrap().result
    }

    #[test]
    fn test_comparison_operators() {
        let ctx = json!({"age": 30, "name": "ada"});
        assert!(eval(json!({"field": "age", "operator": ">=", "value": 18}), ctx.clone()));
        assert!(eval(json!({"field": "age", "operator": "<", "value": 31}), ctx.clone()));
        assert!(eval(json!({"field": "age", "operator": "!=", "value": 31}), ctx.clone()));
        assert!(!eval(json!({"field": "age", "operator": ">", "value": 30}), ctx.clone()));
        assert!(eval(json!({"field": "name", "operator": "==", "value": "ada"}), ctx.clone()));
        assert!(eval(json!({"field": "name", "operator": "<", "value": "bob"}), ctx));
    }

    #[test]
    fn test_integer_and_float_compare_numerically() {
        assert!(eval(json!({"field": "x", "operator": "==", "value": 1.0}), json!({"x": 1})));
    }

    #[test]
    fn test_coercion_from_string() {
        let ctx = json!({"count": "42", "ratio": "0.75", "word": "many"});
        assert!(eval(json!({"field": "count", "operator": ">", "value": 40}), ctx.clone()));
        assert!(eval(json!({"field": "ratio", "operator": ">=", "value": 0.5}), ctx.clone()));
        assert!(!eval(json!({"field": "word", "operator": ">", "value": 1}), ctx.clone()));
        assert!(!eval(json!({"field": "word", "operator": "!=", "value": 1}), ctx));
    }

    #[test]
    fn test_coercion_to_string() {
        assert!(eval(json!({"field": "code", "operator": "==", "value": "200"}), json!({"code": 200})));
    }

    #[test]
    fn test_coercion_never_goes_from_number_to_text_number() {
        // the expected value's type drives coercion, not the resolved one
        assert!(!eval(json!({"field": "n", "operator": "==", "value": "5.0"}), json!({"n": 5})));
    }

    #[test]
    fn test_absent_only_satisfies_is_null() {
        let ctx = json!({});
        assert!(eval(json!({"field": "x", "operator": "IS NULL"}), ctx.clone()));
        assert!(!eval(json!({"field": "x", "operator": "IS NOT NULL"}), ctx.clone()));
        for op in ["==", "!=", "<", ">", "<=", ">="] {
            assert!(!eval(json!({"field": "x", "operator": op, "value": 1}), ctx.clone()), "{}", op);
        }
        assert!(!eval(json!({"IN": "x", "values": [1]}), ctx.clone()));
        assert!(!eval(json!({"NOT IN": "x", "values": [1]}), ctx.clone()));
        assert!(!eval(json!({"MATCHES": {"field": "x", "pattern": ".*"}}), ctx.clone()));
        assert!(!eval(json!({"CONTAINS": {"field": "x", "value": ""}}), ctx));
    }

    #[test]
    fn test_logical_operators() {
        let ctx = json!({"a": 1, "b": 2});
        let a = json!({"field": "a", "operator": "==", "value": 1});
        let not_b = json!({"field": "b", "operator": "==", "value": 3});

        assert!(!eval(json!({"AND": [a, not_b]}), ctx.clone()));
        assert!(eval(json!({"OR": [a, not_b]}), ctx.clone()));
        assert!(eval(json!({"NOT": not_b}), ctx.clone()));
        assert!(eval(json!({"AND": []}), ctx.clone()));
        assert!(!eval(json!({"OR": []}), ctx));
    }

    #[test]
    fn test_de_morgan_consistency() {
        let leaves = [
            json!({"field": "a", "operator": "==", "value": 1}),
            json!({"field": "b", "operator": ">", "value": 5}),
            json!({"field": "missing", "operator": "IS NULL"}),
        ];
        let contexts = [json!({"a": 1, "b": 9}), json!({"a": 2, "b": 9}), json!({"a": 1, "b": 1, "missing": 0})];

        for ctx in &contexts {
            for x in &leaves {
                for y in &leaves {
                    let lhs = eval(json!({"NOT": {"AND": [x, y]}}), ctx.clone());
                    let rhs = eval(json!({"OR": [{"NOT": x}, {"NOT": y}]}), ctx.clone());
                    assert_eq!(lhs, rhs);

                    let direct = eval(x.clone(), ctx.clone()) && eval(y.clone(), ctx.clone());
                    assert_eq!(eval(json!({"AND": [x, y]}), ctx.clone()), direct);
                }
            }
        }
    }

    #[test]
    fn test_membership() {
        let ctx = json!({"tier": "gold", "score": 3});
        assert!(eval(json!({"IN": "tier", "values": ["gold", "platinum"]}), ctx.clone()));
        assert!(eval(json!({"NOT IN": "tier", "values": ["bronze"]}), ctx.clone()));
        assert!(eval(json!({"IN": "score", "values": [3.0]}), ctx));
    }

    #[test]
    fn test_matches_is_anchored_at_start() {
        let ctx = json!({"email": "ada@example.com", "id": "x-PRD-1"});
        assert!(eval(json!({"MATCHES": {"field": "email", "pattern": r"[a-z]+@"}}), ctx.clone()));
        assert!(!eval(json!({"MATCHES": {"field": "id", "pattern": "PRD"}}), ctx.clone()));
        assert!(eval(json!({"MATCHES": {"field": "id", "pattern": "x-PRD|PRD"}}), ctx));
    }

    #[test]
    fn test_contains_uses_string_form() {
        let ctx = json!({"summary": "risk: high", "tags": ["a", "b"], "n": 1234});
        assert!(eval(json!({"CONTAINS": {"field": "summary", "value": "high"}}), ctx.clone()));
        assert!(eval(json!({"CONTAINS": {"field": "n", "value": 23}}), ctx.clone()));
        assert!(eval(json!({"CONTAINS": {"field": "tags", "value": "\"b\""}}), ctx));
    }

    #[test]
    fn test_length_pseudo_field_in_comparison() {
        let ctx = json!({"doc": {"metrics": [1, 2, 3]}});
        assert!(eval(json!({"field": "doc.metrics.length", "operator": ">=", "value": 3}), ctx));
    }

    #[test]
    fn test_structural_errors() {
        let bad = [
            json!([1, 2]),
            json!({"field": "a"}),
            json!({"field": "a", "operator": "~=", "value": 1}),
            json!({"field": "a", "operator": "=="}),
            json!({"AND": {"field": "a", "operator": "IS NULL"}}),
            json!({"IN": "a"}),
            json!({"IN": "a", "values": "x"}),
            json!({"MATCHES": {"field": "a"}}),
            json!({"MATCHES": {"field": "a", "pattern": "("}}),
            json!({"CONTAINS": {"value": "x"}}),
            json!({"XOR": []}),
            json!({"AND": [{"field": "a", "operator": "IS NULL"}, {"bogus": 1}]}),
        ];
        for condition in bad {
            assert!(validate_syntax(&condition).is_err(), "{}", condition);
            assert!(evaluate(&condition, &json!({})).is_err(), "{}", condition);
        }
    }

    #[test]
    fn test_unknown_node_is_reported_distinctly() {
        let err = evaluate(&json!({"XOR": []}), &json!({})).unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownNode(_)));
    }

    #[test]
    fn test_validation_accepts_evaluator_grammar() {
        let good = json!({"AND": [
            {"field": "a", "operator": "IS NOT NULL"},
            {"OR": [{"IN": "b", "values": [1]}, {"NOT IN": "b", "values": []}]},
            {"NOT": {"MATCHES": {"field": "c", "pattern": "^x"}}},
            {"CONTAINS": {"field": "d", "value": "y"}}
        ]});
        assert!(validate_syntax(&good).is_ok());
        assert!(evaluate(&good, &json!({})).is_ok());
    }

    #[test]
    fn test_trace_and_fields() {
        let condition = json!({"AND": [
            {"field": "a", "operator": "==", "value": 1},
            {"MATCHES": {"field": "b.c", "pattern": "z"}},
            {"IN": "d", "values": [1]}
        ]});
        let evaluation = evaluate(&condition, &json!({"a": 1, "b": {"c": "q"}})).unwrap();
        assert!(!evaluation.result);
        assert_eq!(evaluation.trace.len(), 2);
        assert_eq!(evaluation.failed_checks().count(), 1);
        assert_eq!(referenced_fields(&condition).unwrap(), vec!["a", "b.c", "d"]);
    }

    #[test]
    fn test_context_snapshot() {
        let expression = Expression::parse(&json!({"OR": [
            {"field": "a.length", "operator": ">", "value": 0},
            {"CONTAINS": {"field": "missing", "value": "x"}}
        ]}))
        .unwrap();
        let snapshot = context_snapshot(&expression, &json!({"a": [1, 2]}));
        assert_eq!(snapshot["a.length"], json!(2));
        assert_eq!(snapshot["missing"], Value::Null);
    }
}
