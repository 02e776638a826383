use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

#[derive(Debug, Clone)]
enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lt(String, Value),
}

/// Conjunction of field conditions evaluated against JSON documents.
///
/// Ordering comparisons understand numbers and RFC 3339 timestamps, which is
/// what every time field in the store looks like.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn one_of(mut self, field: &str, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In(field.to_string(), values));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Lt(field.to_string(), value.into()));
        self
    }

    /// Equality and membership conditions on string values, as
    /// `(field, accepted values)`. A backend can narrow its scan with these;
    /// [`Filter::matches`] still has the final word.
    pub fn string_equalities(&self) -> Vec<(&str, Vec<&str>)> {
        self.conditions
            .iter()
            .filter_map(|condition| match condition {
                Condition::Eq(field, Value::String(value)) => Some((field.as_str(), vec![value.as_str()])),
                Condition::In(field, options) => options
                    .iter()
                    .map(Value::as_str)
                    .collect::<Option<Vec<_>>>()
                    .map(|values| (field.as_str(), values)),
                _ => None,
            })
            .collect()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(field, expected) => doc.get(field) == Some(expected),
            Condition::In(field, options) => doc
                .get(field)
                .is_some_and(|actual| options.iter().any(|option| option == actual)),
            Condition::Gte(field, bound) => doc
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(|ord| ord != Ordering::Less),
            Condition::Lt(field, bound) => doc
                .get(field)
                .and_then(|actual| compare(actual, bound))
                .is_some_and(|ord| ord == Ordering::Less),
        })
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => match (parse_instant(l), parse_instant(r)) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => Some(l.cmp(r)),
        },
        _ => None,
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_bounds_compare_instants_not_text() {
        // Same instant written with and without fractional seconds.
        let doc = json!({"employeeId": "e1", "timestamp": "2024-03-04T09:00:00.500Z"});
        let filter = Filter::all()
            .eq("employeeId", "e1")
            .gte("timestamp", "2024-03-04T00:00:00Z")
            .lt("timestamp", "2024-03-05T00:00:00Z");
        assert!(filter.matches(&doc));

        let next_day = json!({"employeeId": "e1", "timestamp": "2024-03-05T00:00:00Z"});
        assert!(!filter.matches(&next_day));
    }

    #[test]
    fn one_of_and_missing_fields() {
        let filter = Filter::all().one_of("recipientId", vec![json!("e1"), json!("all_employees")]);
        assert!(filter.matches(&json!({"recipientId": "all_employees"})));
        assert!(!filter.matches(&json!({"recipientId": "e2"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn string_equalities_skip_ranges_and_non_strings() {
        let filter = Filter::all()
            .eq("employeeId", "e1")
            .eq("read", false)
            .one_of("recipientId", vec![json!("e1"), json!("all_employees")])
            .one_of("kind", vec![json!("a"), json!(1)])
            .gte("timestamp", "2024-03-04T00:00:00Z");
        assert_eq!(
            filter.string_equalities(),
            vec![("employeeId", vec!["e1"]), ("recipientId", vec!["e1", "all_employees"])]
        );
    }
}
