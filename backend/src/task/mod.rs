//! Regex task model.
//!
//! A [`RegexTask`] pairs a target scope with a pattern and a replacement.
//! Tasks travel in an ordered [`TaskBatch`]; a batch is compiled against a
//! dataset before anything runs, so one bad task rejects the whole batch.
//!
//! Matching semantics:
//! - every match in a cell is replaced (global)
//! - case-sensitive unless the pattern says otherwise (`(?i)`)
//! - cells are matched on their string form; null and empty cells never match
//!
//! ```text
//! TaskSpec ("column Email") ──expand──▶ RegexTask ──compile──▶ CompiledTask
//! ```

pub mod target;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{TaskError, TaskResult};
use crate::models::{cell_text, Dataset};

pub use target::{column_letter_to_index, TaskSpec};

// =============================================================================
// Task types
// =============================================================================

/// Which cells a task may touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Target {
    /// One cell. `row` is 0-based.
    Cell { row: usize, column: String },
    /// Every column of one row. `row` is 0-based.
    Row { row: usize },
    /// Every row of one named column.
    Column { column: String },
    /// Every cell of the dataset.
    All,
}

/// A single edit instruction. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexTask {
    pub target: Target,
    pub pattern: String,
    pub replacement: String,
}

impl RegexTask {
    pub fn new(target: Target, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            target,
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn column(column: impl Into<String>, pattern: &str, replacement: &str) -> Self {
        Self::new(
            Target::Column {
                column: column.into(),
            },
            pattern,
            replacement,
        )
    }

    pub fn cell(row: usize, column: impl Into<String>, pattern: &str, replacement: &str) -> Self {
        Self::new(
            Target::Cell {
                row,
                column: column.into(),
            },
            pattern,
            replacement,
        )
    }

    pub fn all(pattern: &str, replacement: &str) -> Self {
        Self::new(Target::All, pattern, replacement)
    }
}

/// Ordered tasks produced by one generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub tasks: Vec<RegexTask>,
}

impl TaskBatch {
    pub fn new(tasks: Vec<RegexTask>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Expand wire-format specs into a batch, in order.
    pub fn from_specs(specs: &[TaskSpec], dataset: &Dataset) -> TaskResult<Self> {
        let mut tasks = Vec::new();
        for spec in specs {
            tasks.extend(spec.expand(dataset)?);
        }
        Ok(Self { tasks })
    }

    /// Validate every task against `dataset` and compile its pattern.
    ///
    /// Fails on the first invalid task; nothing is returned for the others.
    pub fn compile(&self, dataset: &Dataset) -> TaskResult<CompiledBatch> {
        let tasks = self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| CompiledTask::compile(index, task, dataset))
            .collect::<TaskResult<Vec<_>>>()?;
        Ok(CompiledBatch { tasks })
    }
}

impl From<Vec<RegexTask>> for TaskBatch {
    fn from(tasks: Vec<RegexTask>) -> Self {
        Self::new(tasks)
    }
}

// =============================================================================
// Compiled tasks
// =============================================================================

/// A validated task with its regex built.
#[derive(Debug, Clone)]
pub struct CompiledTask {
    target: Target,
    regex: Regex,
    replacement: String,
}

impl CompiledTask {
    fn compile(index: usize, task: &RegexTask, dataset: &Dataset) -> TaskResult<Self> {
        let regex = Regex::new(&task.pattern).map_err(|e| TaskError::InvalidPattern {
            index,
            pattern: task.pattern.clone(),
            message: e.to_string(),
        })?;

        let rows = dataset.row_count();
        match &task.target {
            Target::Cell { row, column } => {
                if !dataset.has_column(column) {
                    return Err(TaskError::UnknownColumn(column.clone()));
                }
                if *row >= rows {
                    return Err(TaskError::RowOutOfRange { row: *row, rows });
                }
            }
            Target::Row { row } => {
                if *row >= rows {
                    return Err(TaskError::RowOutOfRange { row: *row, rows });
                }
            }
            Target::Column { column } => {
                if !dataset.has_column(column) {
                    return Err(TaskError::UnknownColumn(column.clone()));
                }
            }
            Target::All => {}
        }

        Ok(Self {
            target: task.target.clone(),
            regex,
            replacement: normalize_replacement(&task.replacement),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Candidate cells as (row, column index), row-major in header order.
    pub fn candidates<'a>(
        &'a self,
        dataset: &'a Dataset,
    ) -> Box<dyn Iterator<Item = (usize, usize)> + 'a> {
        let width = dataset.columns.len();
        match &self.target {
            Target::Cell { row, column } => {
                Box::new(dataset.column_index(column).map(|c| (*row, c)).into_iter())
            }
            Target::Row { row } => {
                let row = *row;
                Box::new((0..width).map(move |c| (row, c)))
            }
            Target::Column { column } => match dataset.column_index(column) {
                Some(c) => Box::new((0..dataset.row_count()).map(move |r| (r, c))),
                None => Box::new(std::iter::empty()),
            },
            Target::All => Box::new(
                (0..dataset.row_count()).flat_map(move |r| (0..width).map(move |c| (r, c))),
            ),
        }
    }

    /// Replace every match in `text`. `None` if the cell is not eligible.
    pub fn substitute<'t>(&self, text: &'t str) -> Option<Cow<'t, str>> {
        if text.is_empty() {
            return None;
        }
        Some(self.regex.replace_all(text, self.replacement.as_str()))
    }

    /// Same as [`substitute`](Self::substitute) on a raw cell value.
    pub fn substitute_value(&self, value: &serde_json::Value) -> Option<String> {
        let text = cell_text(value)?;
        self.substitute(&text).map(Cow::into_owned)
    }
}

/// A batch whose tasks all validated.
#[derive(Debug, Clone)]
pub struct CompiledBatch {
    tasks: Vec<CompiledTask>,
}

impl CompiledBatch {
    pub fn tasks(&self) -> &[CompiledTask] {
        &self.tasks
    }
}

// =============================================================================
// Replacement syntax
// =============================================================================

static DOLLAR_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{[^}]*\}|\$(\d+)|\$").unwrap());

/// Rewrite a replacement for `Regex::replace_all`.
///
/// `$N` becomes `${N}` so `$1st` means group 1 followed by "st", `${name}` is
/// kept, and every other `$` is literal (`"$1 $USD"` keeps `$USD`).
fn normalize_replacement(replacement: &str) -> String {
    DOLLAR_GROUP
        .replace_all(replacement, |caps: &Captures| {
            let whole = &caps[0];
            match caps.get(1) {
                Some(n) => format!("${{{}}}", n.as_str()),
                None if whole.len() > 1 => whole.to_string(),
                None => "$$".to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::from_records(
            vec!["Name".into(), "Email".into()],
            vec![
                json!({"Name": "Ada", "Email": "ada@example.com"}),
                json!({"Name": "Bob", "Email": null}),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_pattern_rejects_batch() {
        let batch = TaskBatch::new(vec![
            RegexTask::column("Name", "A", "a"),
            RegexTask::column("Name", "(unclosed", "x"),
        ]);
        let err = batch.compile(&dataset()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidPattern { index: 1, .. }));
    }

    #[test]
    fn test_unknown_column() {
        let batch = TaskBatch::new(vec![RegexTask::column("Phone", "1", "2")]);
        assert_eq!(
            batch.compile(&dataset()).unwrap_err(),
            TaskError::UnknownColumn("Phone".into())
        );
    }

    #[test]
    fn test_cell_row_out_of_range() {
        let batch = TaskBatch::new(vec![RegexTask::cell(2, "Name", "A", "a")]);
        assert_eq!(
            batch.compile(&dataset()).unwrap_err(),
            TaskError::RowOutOfRange { row: 2, rows: 2 }
        );
    }

    #[test]
    fn test_candidates_all_is_row_major() {
        let ds = dataset();
        let batch = TaskBatch::new(vec![RegexTask::all("x", "y")]).compile(&ds).unwrap();
        let cells: Vec<_> = batch.tasks()[0].candidates(&ds).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_substitute_is_global() {
        let ds = dataset();
        let batch = TaskBatch::new(vec![RegexTask::all("a", "o")]).compile(&ds).unwrap();
        assert_eq!(batch.tasks()[0].substitute("banana").unwrap(), "bonono");
    }

    #[test]
    fn test_substitute_is_case_sensitive_by_default() {
        let ds = dataset();
        let sensitive = TaskBatch::new(vec![RegexTask::all("ada", "X")]).compile(&ds).unwrap();
        assert_eq!(sensitive.tasks()[0].substitute("Ada").unwrap(), "Ada");

        let insensitive = TaskBatch::new(vec![RegexTask::all("(?i)ada", "X")])
            .compile(&ds)
            .unwrap();
        assert_eq!(insensitive.tasks()[0].substitute("Ada").unwrap(), "X");
    }

    #[test]
    fn test_null_and_empty_never_match() {
        let ds = dataset();
        let batch = TaskBatch::new(vec![RegexTask::all("^$", "filled")]).compile(&ds).unwrap();
        let task = &batch.tasks()[0];
        assert!(task.substitute("").is_none());
        assert!(task.substitute_value(&serde_json::Value::Null).is_none());
    }

    #[test]
    fn test_numbers_match_on_string_form() {
        let ds = dataset();
        let batch = TaskBatch::new(vec![RegexTask::all(r"\.5$", ".75")]).compile(&ds).unwrap();
        assert_eq!(batch.tasks()[0].substitute_value(&json!(1.5)).unwrap(), "1.75");
    }

    #[test]
    fn test_dollar_word_stays_literal() {
        let ds = Dataset::from_records(vec!["Price".into()], vec![json!({"Price": "10"})]).unwrap();
        let batch = TaskBatch::new(vec![RegexTask::column("Price", r"^(\d+)$", "$1 $USD")]);
        let report = crate::diff::preview(&batch, &ds, 10).unwrap();
        assert_eq!(report.entries[0].modified, "10 $USD");

        let named = TaskBatch::new(vec![RegexTask::column("Price", r"^(?P<n>\d+)$", "${n}.00 $")])
            .compile(&ds)
            .unwrap();
        assert_eq!(named.tasks()[0].substitute("10").unwrap(), "10.00 $");
    }

    #[test]
    fn test_dollar_backreferences() {
        assert_eq!(normalize_replacement("$1st"), "${1}st");
        assert_eq!(normalize_replacement("$$1"), "$$${1}");
        assert_eq!(normalize_replacement("${name}"), "${name}");
        assert_eq!(normalize_replacement("$USD"), "$$USD");
        assert_eq!(normalize_replacement("cost: $"), "cost: $$");

        let ds = dataset();
        let batch = TaskBatch::new(vec![RegexTask::all(r"(\w+)@(\w+)", "$2 at $1")])
            .compile(&ds)
            .unwrap();
        assert_eq!(batch.tasks()[0].substitute("ada@example").unwrap(), "example at ada");
    }
}
