//! Domain models: the tabular dataset and cell coordinates.
//!
//! A [`Dataset`] is an ordered list of unique column names plus an ordered
//! sequence of rows. Each row maps column name to a nullable scalar
//! (`serde_json::Value`: string, number or null).
//!
//! # Example
//!
//! ```rust
//! use regexflow::{Dataset, Coordinate};
//! use serde_json::json;
//!
//! let dataset = Dataset::from_records(
//!     vec!["Name".into(), "Email".into()],
//!     vec![json!({"Name": "Ada", "Email": "ada@example.com"})],
//! ).unwrap();
//!
//! assert_eq!(dataset.cell(&Coordinate::new(0, "Email")).unwrap(), "ada@example.com");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::ModelError;

/// One dataset row: column name -> nullable scalar.
pub type Row = Map<String, Value>;

// =============================================================================
// Coordinate
// =============================================================================

/// A cell address. `row` is 0-based and excludes the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub row: usize,
    pub column: String,
}

impl Coordinate {
    pub fn new(row: usize, column: impl Into<String>) -> Self {
        Self {
            row,
            column: column.into(),
        }
    }
}

impl fmt::Display for Coordinate {
    /// Rows are shown 1-based, the way users count them.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}, column '{}'", self.row + 1, self.column)
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// The working table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names, unique, in header order.
    pub columns: Vec<String>,
    /// Rows in dataset order.
    pub rows: Vec<Row>,
}

impl Dataset {
    /// Build a dataset, rejecting duplicate column names.
    ///
    /// Missing keys in a row are filled with `null`.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self, ModelError> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.as_str()) {
                return Err(ModelError::DuplicateColumn(col.clone()));
            }
        }

        let mut normalized = Vec::with_capacity(rows.len());
        for (idx, mut row) in rows.into_iter().enumerate() {
            if let Some(stray) = row.keys().find(|k| !seen.contains(k.as_str())) {
                return Err(ModelError::StrayColumn {
                    row: idx,
                    column: stray.clone(),
                });
            }
            for col in &columns {
                row.entry(col.clone()).or_insert(Value::Null);
            }
            normalized.push(row);
        }

        Ok(Self {
            columns,
            rows: normalized,
        })
    }

    /// Build a dataset from JSON objects (non-objects become empty rows).
    pub fn from_records(columns: Vec<String>, records: Vec<Value>) -> Result<Self, ModelError> {
        let rows = records
            .into_iter()
            .map(|r| match r {
                Value::Object(map) => map,
                _ => Map::new(),
            })
            .collect();
        Self::new(columns, rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column in the header, exact match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Read a cell. `None` when the coordinate is outside the dataset.
    pub fn cell(&self, coord: &Coordinate) -> Option<&Value> {
        if !self.has_column(&coord.column) {
            return None;
        }
        self.rows.get(coord.row).and_then(|r| r.get(&coord.column))
    }

    /// Overwrite a cell. Returns the previous value.
    pub fn set_cell(&mut self, coord: &Coordinate, value: Value) -> Option<Value> {
        if !self.has_column(&coord.column) {
            return None;
        }
        let row = self.rows.get_mut(coord.row)?;
        row.insert(coord.column.clone(), value)
    }
}

/// String form of a cell used for matching and diff display.
///
/// `None` for null cells, which never match.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Not produced by ingestion, but stringify rather than drop
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::from_records(
            vec!["Name".into(), "Age".into()],
            vec![json!({"Name": "Ada", "Age": 36}), json!({"Name": "Linus"})],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = Dataset::new(vec!["A".into(), "A".into()], vec![]).unwrap_err();
        assert_eq!(err, ModelError::DuplicateColumn("A".into()));
    }

    #[test]
    fn test_stray_column_rejected() {
        let err = Dataset::from_records(vec!["A".into()], vec![json!({"B": 1})]).unwrap_err();
        assert!(matches!(err, ModelError::StrayColumn { row: 0, .. }));
    }

    #[test]
    fn test_missing_keys_filled_with_null() {
        let ds = sample();
        assert_eq!(ds.cell(&Coordinate::new(1, "Age")), Some(&Value::Null));
    }

    #[test]
    fn test_cell_out_of_range() {
        let ds = sample();
        assert!(ds.cell(&Coordinate::new(5, "Name")).is_none());
        assert!(ds.cell(&Coordinate::new(0, "Email")).is_none());
    }

    #[test]
    fn test_set_cell() {
        let mut ds = sample();
        let prev = ds.set_cell(&Coordinate::new(0, "Name"), json!("Grace"));
        assert_eq!(prev, Some(json!("Ada")));
        assert_eq!(ds.cell(&Coordinate::new(0, "Name")).unwrap(), "Grace");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!("abc")), Some("abc".to_string()));
        assert_eq!(cell_text(&json!(42)), Some("42".to_string()));
        assert_eq!(cell_text(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(cell_text(&json!(true)), Some("true".to_string()));
        assert_eq!(cell_text(&Value::Null), None);
    }

    #[test]
    fn test_coordinate_display_is_one_based() {
        assert_eq!(Coordinate::new(0, "Email").to_string(), "row 1, column 'Email'");
    }
}
