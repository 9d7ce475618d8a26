//! Range query model: equality filters, an optional ordering and a limit.

use std::cmp::Ordering;

use serde_json::Value as JsonValue;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Query over one collection.
///
/// Field paths are dotted (`processing.attempts`). Timestamps are stored in a
/// fixed-width RFC 3339 form, so ordering by a timestamp field is chronological.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<(String, JsonValue)>,
    pub order_by: Option<(String, SortOrder)>,
    pub limit: usize,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            order_by: None,
            limit: 100,
        }
    }
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a document satisfies every equality filter.
    pub fn matches(&self, body: &JsonValue) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| field_value(body, field) == Some(expected))
    }

    /// Ordering between two documents according to `order_by`.
    pub fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        let Some((field, order)) = &self.order_by else {
            return Ordering::Equal;
        };
        let ord = compare_json(field_value(a, field), field_value(b, field));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn field_value<'a>(body: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(body, |current, segment| current.get(segment))
}

/// Missing/null sorts first, then numbers, then strings, then everything else.
fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
