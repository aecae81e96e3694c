use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One subject as returned by a preview query, keyed by tag.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Serialize)]
pub struct Preview {
    pub url: String,
    pub total: u64,
    pub rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ViewRow {
    #[serde(rename = "view tags", default)]
    pub tags: Option<Vec<String>>,
}

/// Renders a cell as plain text; arrays of a multivalue tag are comma joined.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(values) => values
            .iter()
            .map(value_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Reads `tag` from the single row of a `range=count` response.
pub(crate) fn range_count(rows: &[Row], tag: &str) -> Option<u64> {
    match rows.first()?.get(tag)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Reads `tag` from the single row of a `range=values` response.
pub(crate) fn range_values(rows: &[Row], tag: &str) -> Vec<String> {
    match rows.first().and_then(|r| r.get(tag)) {
        Some(Value::Array(values)) => values.iter().map(value_text).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![value_text(other)],
    }
}
