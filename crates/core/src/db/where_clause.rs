//! Structural where-clause evaluation.
//!
//! Non-SQL backends (and the in-memory adapter) reuse this engine instead
//! of building query strings, which also keeps user values out of any
//! query text entirely.

use super::{Connector, Operator, Where};
use serde_json::Value;

/// Evaluates a where clause against a record, left-to-right.
///
/// An empty clause matches everything. The first entry seeds the truth
/// value; each subsequent entry tightens (`And`) or loosens (`Or`) it.
pub fn matches_where(record: &Value, where_clause: &[Where]) -> bool {
    let mut entries = where_clause.iter();
    let Some(first) = entries.next() else {
        return true;
    };
    let mut acc = matches_entry(record, first);
    for entry in entries {
        let hit = matches_entry(record, entry);
        acc = match entry.connector {
            Connector::And => acc && hit,
            Connector::Or => acc || hit,
        };
    }
    acc
}

fn matches_entry(record: &Value, entry: &Where) -> bool {
    let field = record.get(&entry.field).unwrap_or(&Value::Null);
    match entry.operator {
        Operator::Eq => field == &entry.value,
        Operator::Ne => field != &entry.value,
        Operator::In => match &entry.value {
            Value::Array(items) => items.contains(field),
            _ => false,
        },
        Operator::NotIn => match &entry.value {
            Value::Array(items) => !items.contains(field),
            _ => false,
        },
        Operator::Gt => compare(field, &entry.value).map(|o| o.is_gt()).unwrap_or(false),
        Operator::Gte => compare(field, &entry.value).map(|o| o.is_ge()).unwrap_or(false),
        Operator::Lt => compare(field, &entry.value).map(|o| o.is_lt()).unwrap_or(false),
        Operator::Lte => compare(field, &entry.value).map(|o| o.is_le()).unwrap_or(false),
        Operator::Contains => str_pair(field, &entry.value)
            .map(|(a, b)| a.contains(b))
            .unwrap_or(false),
        Operator::StartsWith => str_pair(field, &entry.value)
            .map(|(a, b)| a.starts_with(b))
            .unwrap_or(false),
        Operator::EndsWith => str_pair(field, &entry.value)
            .map(|(a, b)| a.ends_with(b))
            .unwrap_or(false),
    }
}

/// Orders two JSON scalars when they are comparable: numbers numerically,
/// strings lexicographically (which covers RFC 3339 timestamps).
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

fn str_pair<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((a.as_str()?, b.as_str()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({ "id": "u1", "email": "ada@x.io", "age": 36, "name": "Ada" })
    }

    #[test]
    fn test_empty_clause_matches() {
        assert!(matches_where(&record(), &[]));
    }

    #[test]
    fn test_eq_and_ne() {
        assert!(matches_where(&record(), &[Where::eq("email", json!("ada@x.io"))]));
        assert!(!matches_where(&record(), &[Where::eq("email", json!("eve@x.io"))]));
        assert!(matches_where(
            &record(),
            &[Where::new("email", Operator::Ne, json!("eve@x.io"))]
        ));
    }

    #[test]
    fn test_in_not_in() {
        assert!(matches_where(
            &record(),
            &[Where::new("id", Operator::In, json!(["u1", "u2"]))]
        ));
        assert!(matches_where(
            &record(),
            &[Where::new("id", Operator::NotIn, json!(["u2", "u3"]))]
        ));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(matches_where(&record(), &[Where::new("age", Operator::Gt, json!(30))]));
        assert!(matches_where(&record(), &[Where::new("age", Operator::Lte, json!(36))]));
        assert!(!matches_where(&record(), &[Where::new("age", Operator::Lt, json!(36))]));
    }

    #[test]
    fn test_string_operators() {
        assert!(matches_where(
            &record(),
            &[Where::new("email", Operator::Contains, json!("@x."))]
        ));
        assert!(matches_where(
            &record(),
            &[Where::new("email", Operator::StartsWith, json!("ada"))]
        ));
        assert!(matches_where(
            &record(),
            &[Where::new("email", Operator::EndsWith, json!(".io"))]
        ));
    }

    #[test]
    fn test_left_to_right_combination() {
        // false OR true -> true, then AND false -> false.
        let clause = vec![
            Where::eq("email", json!("eve@x.io")),
            Where::eq("id", json!("u1")).or(),
            Where::eq("name", json!("Eve")),
        ];
        assert!(!matches_where(&record(), &clause));

        // false OR true -> true.
        let clause = vec![
            Where::eq("email", json!("eve@x.io")),
            Where::eq("id", json!("u1")).or(),
        ];
        assert!(matches_where(&record(), &clause));
    }

    #[test]
    fn test_missing_field_is_null() {
        assert!(matches_where(&record(), &[Where::eq("missing", json!(null))]));
        assert!(!matches_where(
            &record(),
            &[Where::new("missing", Operator::Gt, json!(1))]
        ));
    }
}
