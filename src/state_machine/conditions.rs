//! # Guard Conditions
//!
//! Field/operator/value comparisons against the project record, combinable
//! with `all` / `any`. A list of conditions is an implicit `all`.
//!
//! ```yaml
//! conditions:
//!   - field: validation.score
//!     operator: ge
//!     value: 0.7
//!   - any:
//!       - { field: market.segment, operator: in, value: [b2b, enterprise] }
//!       - { field: override, operator: exists }
//! ```
//!
//! Fields are dotted paths; numeric segments index into arrays. A missing
//! field reads as `null`. Ordering comparisons across mismatched types are
//! false rather than errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    Contains,
    In,
    Exists,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::Exists => "exists",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Compare(Comparison),
}

impl Condition {
    pub fn compare(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Condition::Compare(Comparison {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn evaluate(&self, record: &Value) -> bool {
        match self {
            Condition::All { all } => all.iter().all(|c| c.evaluate(record)),
            Condition::Any { any } => any.iter().any(|c| c.evaluate(record)),
            Condition::Compare(comparison) => comparison.evaluate(record),
        }
    }
}

impl Comparison {
    pub fn evaluate(&self, record: &Value) -> bool {
        let actual = resolve_path(record, &self.field).unwrap_or(&Value::Null);
        let expected = &self.value;
        match self.operator {
            Operator::Eq => loosely_equal(actual, expected),
            Operator::Ne => !loosely_equal(actual, expected),
            Operator::Lt => compare(actual, expected) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Contains => contains(actual, expected),
            Operator::In => contains(expected, actual),
            Operator::Exists => {
                let wanted = expected.as_bool().unwrap_or(true);
                !actual.is_null() == wanted
            }
        }
    }
}

/// Every condition holds; an empty list holds trivially
pub fn evaluate_all(conditions: &[Condition], record: &Value) -> bool {
    conditions.iter().all(|condition| condition.evaluate(record))
}

/// Look up a dotted path such as `validation.scores.0`
pub fn resolve_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(text) => needle.as_str().is_some_and(|n| text.contains(n)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "state": "IDEA_VALIDATION",
            "validation": {"score": 0.82, "verdict": "go", "tags": ["saas", "b2b"]},
            "attempts": 2
        })
    }

    #[test]
    fn test_resolve_path() {
        let record = record();
        assert_eq!(resolve_path(&record, "validation.verdict"), Some(&json!("go")));
        assert_eq!(resolve_path(&record, "validation.tags.1"), Some(&json!("b2b")));
        assert_eq!(resolve_path(&record, "validation.missing"), None);
        assert_eq!(resolve_path(&record, "attempts.deeper"), None);
    }

    #[test]
    fn test_operators() {
        let record = record();
        let check = |field: &str, op: Operator, value: Value| {
            Condition::compare(field, op, value).evaluate(&record)
        };
        assert!(check("validation.score", Operator::Ge, json!(0.7)));
        assert!(check("attempts", Operator::Eq, json!(2.0)));
        assert!(check("attempts", Operator::Lt, json!(3)));
        assert!(!check("attempts", Operator::Gt, json!("1")));
        assert!(check("validation.tags", Operator::Contains, json!("saas")));
        assert!(check("validation.verdict", Operator::In, json!(["go", "pivot"])));
        assert!(check("validation", Operator::Exists, Value::Null));
        assert!(check("nothing", Operator::Exists, json!(false)));
        assert!(check("nothing", Operator::Eq, Value::Null));
        assert!(check("state", Operator::Ne, json!("COMPLETED")));
    }

    #[test]
    fn test_yaml_conditions_with_aliases() {
        let yaml = r#"
- field: validation.score
  operator: ">="
  value: 0.9
- any:
    - { field: validation.verdict, value: go }
    - { field: override, operator: exists }
"#;
        let conditions: Vec<Condition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(matches!(conditions[1], Condition::Any { .. }));

        let record = record();
        assert!(!evaluate_all(&conditions, &record));
        assert!(evaluate_all(&conditions[1..], &record));
        assert!(evaluate_all(&[], &record));
    }
}
