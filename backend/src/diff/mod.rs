//! Diff engine: compute which cells a task batch would change.
//!
//! Tasks run in batch order over a scratch overlay holding only the touched
//! cells, so a later task sees the output of earlier ones (sequential
//! composition) and the snapshot itself is never mutated.
//!
//! ```text
//! snapshot ─┐
//!           ├─▶ overlay {(row, col) -> text} ─▶ ChangeSet ─▶ DiffReport (truncated view)
//! batch ────┘
//! ```
//!
//! A cell whose final text equals its original text is dropped, even if
//! some task matched it along the way.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::TaskResult;
use crate::models::{cell_text, Coordinate, Dataset};
use crate::store::CellWrite;
use crate::task::{CompiledBatch, TaskBatch};

/// Number of entries shown to the user by default.
pub const DEFAULT_PREVIEW_LIMIT: usize = 10;

// =============================================================================
// Entries
// =============================================================================

/// One changed cell, as shown in a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// 1-based row index, header excluded.
    pub row: usize,
    pub column: String,
    pub original: String,
    pub modified: String,
}

/// One changed cell, as reported after an apply.
///
/// Same data as [`DiffEntry`] under the `from`/`to` names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEntry {
    pub row: usize,
    pub column: String,
    pub from: String,
    pub to: String,
}

impl From<DiffEntry> for AppliedEntry {
    fn from(entry: DiffEntry) -> Self {
        Self {
            row: entry.row,
            column: entry.column,
            from: entry.original,
            to: entry.modified,
        }
    }
}

// =============================================================================
// Change set
// =============================================================================

/// A single computed cell change.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    /// 0-based coordinate.
    pub coordinate: Coordinate,
    /// Cell value before the batch.
    pub original: Value,
    pub original_text: String,
    pub modified: String,
}

impl CellChange {
    pub fn entry(&self) -> DiffEntry {
        DiffEntry {
            row: self.coordinate.row + 1,
            column: self.coordinate.column.clone(),
            original: self.original_text.clone(),
            modified: self.modified.clone(),
        }
    }

    pub fn write(&self) -> CellWrite {
        CellWrite {
            coordinate: self.coordinate.clone(),
            expected: self.original.clone(),
            value: Value::String(self.modified.clone()),
        }
    }
}

/// Every change of a batch, ordered by row then header column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub changes: Vec<CellChange>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn entries(&self) -> Vec<DiffEntry> {
        self.changes.iter().map(CellChange::entry).collect()
    }

    pub fn writes(&self) -> Vec<CellWrite> {
        self.changes.iter().map(CellChange::write).collect()
    }
}

/// Run a compiled batch over `snapshot` without touching it.
pub fn compute_changes(batch: &CompiledBatch, snapshot: &Dataset) -> ChangeSet {
    // Keyed by (row, column index) so iteration order is the report order
    let mut overlay: BTreeMap<(usize, usize), String> = BTreeMap::new();

    for task in batch.tasks() {
        for (r, c) in task.candidates(snapshot) {
            let current = match overlay.get(&(r, c)) {
                Some(text) => Some(text.clone()),
                None => original_value(snapshot, r, c).and_then(cell_text),
            };
            let Some(current) = current else {
                continue;
            };
            let Some(next) = task.substitute(&current) else {
                continue;
            };
            if next != current {
                overlay.insert((r, c), next.into_owned());
            }
        }
    }

    let changes: Vec<CellChange> = overlay
        .into_iter()
        .filter_map(|((r, c), modified)| {
            let original = original_value(snapshot, r, c)?.clone();
            let original_text = cell_text(&original)?;
            if original_text == modified {
                return None;
            }
            Some(CellChange {
                coordinate: Coordinate::new(r, snapshot.columns[c].clone()),
                original,
                original_text,
                modified,
            })
        })
        .collect();

    debug!(
        tasks = batch.tasks().len(),
        changes = changes.len(),
        "computed change set"
    );

    ChangeSet { changes }
}

fn original_value(snapshot: &Dataset, row: usize, col: usize) -> Option<&Value> {
    let name = snapshot.columns.get(col)?;
    snapshot.rows.get(row)?.get(name)
}

// =============================================================================
// Preview
// =============================================================================

/// Result of a preview: the full count plus a bounded list to display.
///
/// `shown + omitted == total_matches` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    /// Every changed coordinate across the batch.
    pub total_matches: usize,
    /// Number of entries in `entries`.
    pub shown: usize,
    /// Changed coordinates not listed in `entries`.
    pub omitted: usize,
    /// First `shown` entries in (row, column) order.
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    pub fn from_changes(changes: &ChangeSet, limit: usize) -> Self {
        let entries: Vec<DiffEntry> = changes
            .changes
            .iter()
            .take(limit)
            .map(CellChange::entry)
            .collect();
        let shown = entries.len();
        Self {
            total_matches: changes.len(),
            shown,
            omitted: changes.len() - shown,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_matches == 0
    }
}

/// Preview `batch` against `snapshot`.
///
/// Validates the whole batch first; read-only.
pub fn preview(batch: &TaskBatch, snapshot: &Dataset, limit: usize) -> TaskResult<DiffReport> {
    let compiled = batch.compile(snapshot)?;
    let changes = compute_changes(&compiled, snapshot);
    Ok(DiffReport::from_changes(&changes, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::task::RegexTask;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::from_records(
            vec!["Name".into(), "Email".into(), "Age".into()],
            vec![
                json!({"Name": "abc", "Email": "a@b.com", "Age": 30}),
                json!({"Name": "Bob", "Email": null, "Age": 41}),
                json!({"Name": "", "Email": "c@d.com", "Age": null}),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_sequential_composition() {
        let batch = TaskBatch::new(vec![
            RegexTask::cell(0, "Name", "a", "x"),
            RegexTask::cell(0, "Name", "x", "y"),
        ]);
        let report = preview(&batch, &dataset(), DEFAULT_PREVIEW_LIMIT).unwrap();
        assert_eq!(report.total_matches, 1);
        assert_eq!(report.entries[0].original, "abc");
        assert_eq!(report.entries[0].modified, "ybc");
    }

    #[test]
    fn test_no_op_replacement_excluded() {
        let batch = TaskBatch::new(vec![RegexTask::column("Name", "Bob", "Bob")]);
        let report = preview(&batch, &dataset(), DEFAULT_PREVIEW_LIMIT).unwrap();
        assert_eq!(report.total_matches, 0);
        assert!(report.entries.is_empty());
    }

    #[test]
    fn test_change_then_revert_excluded() {
        let batch = TaskBatch::new(vec![
            RegexTask::column("Name", "Bob", "Rob"),
            RegexTask::column("Name", "Rob", "Bob"),
        ]);
        let report = preview(&batch, &dataset(), DEFAULT_PREVIEW_LIMIT).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_entries_ordered_by_row_then_header() {
        // Tasks listed column-first; entries still come out row-major
        let batch = TaskBatch::new(vec![
            RegexTask::column("Age", r"\d", "9"),
            RegexTask::column("Name", "^", "_"),
        ]);
        let report = preview(&batch, &dataset(), DEFAULT_PREVIEW_LIMIT).unwrap();
        let order: Vec<(usize, &str)> = report
            .entries
            .iter()
            .map(|e| (e.row, e.column.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "Name"), (1, "Age"), (2, "Name"), (2, "Age")]);
        assert_eq!(report.entries[1].original, "30");
        assert_eq!(report.entries[1].modified, "99");
    }

    #[test]
    fn test_null_and_empty_cells_never_match() {
        let batch = TaskBatch::new(vec![RegexTask::all("^.*$", "X")]);
        let report = preview(&batch, &dataset(), 100).unwrap();
        // 9 cells, of which Email row 2, Name row 3 and Age row 3 are null/empty
        assert_eq!(report.total_matches, 6);
        assert!(!report
            .entries
            .iter()
            .any(|e| (e.row == 2 && e.column == "Email") || (e.row == 3 && e.column != "Email")));
    }

    #[test]
    fn test_truncation_keeps_counts_consistent() {
        let batch = TaskBatch::new(vec![RegexTask::all(".", "#")]);
        let report = preview(&batch, &dataset(), 2).unwrap();
        assert_eq!(report.total_matches, 6);
        assert_eq!(report.shown, 2);
        assert_eq!(report.omitted, 4);
        assert_eq!(report.entries.len(), 2);
    }

    #[test]
    fn test_preview_is_read_only() {
        let ds = dataset();
        let before = ds.clone();
        let batch = TaskBatch::new(vec![RegexTask::all(".", "#")]);
        preview(&batch, &ds, DEFAULT_PREVIEW_LIMIT).unwrap();
        assert_eq!(ds, before);
    }

    #[test]
    fn test_invalid_pattern_fails_preview() {
        let batch = TaskBatch::new(vec![
            RegexTask::column("Name", "a", "b"),
            RegexTask::column("Name", "[", "b"),
        ]);
        assert!(matches!(
            preview(&batch, &dataset(), DEFAULT_PREVIEW_LIMIT).unwrap_err(),
            TaskError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn test_applied_entry_uses_from_to() {
        let entry = DiffEntry {
            row: 1,
            column: "Email".into(),
            original: "a@b.com".into(),
            modified: "[redacted]".into(),
        };
        let applied = serde_json::to_value(AppliedEntry::from(entry)).unwrap();
        assert_eq!(applied["from"], "a@b.com");
        assert_eq!(applied["to"], "[redacted]");
    }
}
