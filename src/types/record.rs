//! Raw, unvalidated caller input

use serde::Deserialize;
use serde_json::Value;

/// One submitted record: field name to raw JSON value.
pub type RawRecord = serde_json::Map<String, Value>;

/// A tabular batch as rows of raw records.
///
/// Rows may disagree on which fields they carry; a field absent from a row
/// is read as null.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<RawRecord>")]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<RawRecord>,
}

impl RawTable {
    pub fn from_records(rows: Vec<RawRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RawRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Remove the first present column among `names` and return its cells.
    pub fn take_column(&mut self, names: &[&str]) -> Option<Vec<Value>> {
        let name = names.iter().find(|n| self.has_column(n))?.to_string();
        self.columns.retain(|c| *c != name);
        Some(
            self.rows
                .iter_mut()
                .map(|row| row.remove(&name).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

impl From<Vec<RawRecord>> for RawTable {
    fn from(rows: Vec<RawRecord>) -> Self {
        Self::from_records(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> RawTable {
        serde_json::from_value(json!([
            {"albumin": 40, "actual_label": 1},
            {"albumin": 35, "wbc": 6.1},
        ]))
        .unwrap()
    }

    #[test]
    fn test_columns_are_unioned() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.columns(), ["albumin", "actual_label", "wbc"]);
    }

    #[test]
    fn test_take_column_fills_missing_with_null() {
        let mut t = table();
        let labels = t.take_column(&["真实标签", "actual_label"]).unwrap();
        assert_eq!(labels, vec![json!(1), Value::Null]);
        assert!(!t.has_column("actual_label"));
        assert!(t.rows().iter().all(|r| !r.contains_key("actual_label")));
        assert!(t.take_column(&["actual_label"]).is_none());
    }
}
