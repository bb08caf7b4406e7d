//! Textual task targets.
//!
//! Generators describe targets as short phrases. Each phrase expands into one
//! or more [`RegexTask`]s against the current dataset header:
//!
//! | Phrase                         | Expands to                         |
//! |--------------------------------|------------------------------------|
//! | `all`                          | whole dataset                      |
//! | `column Email` / `column B` / `column 1` | one column (name, letter, 0-based index) |
//! | `column A to C`, `column A,Email` | one task per column             |
//! | `row 3`, `row 2 to 4`, `row 1,5`  | whole rows (1-based)            |
//! | `cell B2`                      | one cell (Excel style, 1-based row)|
//! | `cell 0,2`                     | one cell (0-based row, column)     |
//! | `range A1:C3`                  | one task per covered cell          |
//! | `row 2 column Email`           | one cell                           |
//! | `row 2 columns 1 to 3`         | cells of one row (1-based columns) |
//! | `column Email rows 1 to 3`     | cells of one column                |

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{RegexTask, Target};
use crate::error::{TaskError, TaskResult};
use crate::models::Dataset;

/// Wire shape of a task, as produced by generators and sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Target phrase, e.g. `"column Email"`.
    pub target: String,
    /// Regex pattern.
    pub regex: String,
    /// Replacement, `$1`-style backreferences allowed.
    #[serde(default)]
    pub replacement: String,
}

macro_rules! target_regex {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).unwrap());
    };
}

target_regex!(ALL, r"(?i)^(all|everything|whole (table|dataset))$");
target_regex!(CELL_EXCEL, r"(?i)^cell\s+([a-z]+)(\d+)$");
target_regex!(CELL_INDEX, r"(?i)^cell\s+(\d+)\s*,\s*(\d+)$");
target_regex!(RANGE, r"(?i)^range\s+([a-z]+)(\d+)\s*:\s*([a-z]+)(\d+)$");
target_regex!(ROW, r"(?i)^row\s+(\d+)$");
target_regex!(ROW_SPAN, r"(?i)^rows?\s+(\d+)\s+to\s+(\d+)$");
target_regex!(ROW_LIST, r"(?i)^rows?\s+(\d+(?:\s*,\s*\d+)+)$");
target_regex!(ROW_COLUMNS, r"(?i)^row\s+(\d+)\s+columns\s+(\d+)\s+to\s+(\d+)$");
target_regex!(ROW_COLUMN, r"(?i)^row\s+(\d+)\s+column\s+(.+)$");
target_regex!(COLUMN_ROWS, r"(?i)^column\s+(.+?)\s+rows\s+(\d+)\s+to\s+(\d+)$");
target_regex!(COLUMN_SPAN, r"(?i)^columns?\s+([a-z\d]+)\s+to\s+([a-z\d]+)$");
target_regex!(COLUMN, r"(?i)^columns?\s+(.+)$");
target_regex!(LETTERS, r"^[A-Za-z]+$");

impl TaskSpec {
    pub fn new(
        target: impl Into<String>,
        regex: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            regex: regex.into(),
            replacement: replacement.into(),
        }
    }

    /// Resolve the target phrase into concrete tasks.
    pub fn expand(&self, dataset: &Dataset) -> TaskResult<Vec<RegexTask>> {
        let targets = parse_target(self.target.trim(), dataset)?;
        Ok(targets
            .into_iter()
            .map(|t| RegexTask::new(t, self.regex.clone(), self.replacement.clone()))
            .collect())
    }
}

/// Parse a target phrase against the dataset header.
pub fn parse_target(raw: &str, dataset: &Dataset) -> TaskResult<Vec<Target>> {
    let invalid = |message: &str| TaskError::InvalidTarget {
        target: raw.to_string(),
        message: message.to_string(),
    };

    if ALL.is_match(raw) {
        return Ok(vec![Target::All]);
    }

    if let Some(m) = CELL_EXCEL.captures(raw) {
        let column = letter_column(dataset, &m[1])?;
        let row = one_based(raw, &m[2], dataset)?;
        return Ok(vec![Target::Cell { row, column }]);
    }

    if let Some(m) = CELL_INDEX.captures(raw) {
        let row = zero_based(raw, &m[1], dataset)?;
        let column = index_column(dataset, &m[2])?;
        return Ok(vec![Target::Cell { row, column }]);
    }

    if let Some(m) = RANGE.captures(raw) {
        let c1 = letter_index(dataset, &m[1])?;
        let r1 = one_based(raw, &m[2], dataset)?;
        let c2 = letter_index(dataset, &m[3])?;
        let r2 = one_based(raw, &m[4], dataset)?;
        let mut targets = Vec::new();
        for row in r1.min(r2)..=r1.max(r2) {
            for c in c1.min(c2)..=c1.max(c2) {
                targets.push(Target::Cell {
                    row,
                    column: dataset.columns[c].clone(),
                });
            }
        }
        return Ok(targets);
    }

    if let Some(m) = ROW.captures(raw) {
        let row = one_based(raw, &m[1], dataset)?;
        return Ok(vec![Target::Row { row }]);
    }

    if let Some(m) = ROW_SPAN.captures(raw) {
        let a = one_based(raw, &m[1], dataset)?;
        let b = one_based(raw, &m[2], dataset)?;
        return Ok((a.min(b)..=a.max(b)).map(|row| Target::Row { row }).collect());
    }

    if let Some(m) = ROW_LIST.captures(raw) {
        return m[1]
            .split(',')
            .map(|part| one_based(raw, part.trim(), dataset).map(|row| Target::Row { row }))
            .collect();
    }

    if let Some(m) = ROW_COLUMNS.captures(raw) {
        let row = one_based(raw, &m[1], dataset)?;
        let c1 = one_based_column(raw, &m[2], dataset)?;
        let c2 = one_based_column(raw, &m[3], dataset)?;
        return Ok((c1.min(c2)..=c1.max(c2))
            .map(|c| Target::Cell {
                row,
                column: dataset.columns[c].clone(),
            })
            .collect());
    }

    if let Some(m) = ROW_COLUMN.captures(raw) {
        let row = one_based(raw, &m[1], dataset)?;
        let column = resolve_column(dataset, m[2].trim())?;
        return Ok(vec![Target::Cell { row, column }]);
    }

    if let Some(m) = COLUMN_ROWS.captures(raw) {
        let column = resolve_column(dataset, m[1].trim())?;
        let a = one_based(raw, &m[2], dataset)?;
        let b = one_based(raw, &m[3], dataset)?;
        return Ok((a.min(b)..=a.max(b))
            .map(|row| Target::Cell {
                row,
                column: column.clone(),
            })
            .collect());
    }

    // A column literally named "X to Y" wins over the span reading
    if let Some(m) = COLUMN.captures(raw) {
        if let Some(column) = find_column_by_name(dataset, m[1].trim()) {
            return Ok(vec![Target::Column { column }]);
        }
    }

    if let Some(m) = COLUMN_SPAN.captures(raw) {
        let a = column_position(dataset, &m[1])?;
        let b = column_position(dataset, &m[2])?;
        return Ok((a.min(b)..=a.max(b))
            .map(|c| Target::Column {
                column: dataset.columns[c].clone(),
            })
            .collect());
    }

    if let Some(m) = COLUMN.captures(raw) {
        return m[1]
            .split(',')
            .map(|part| {
                resolve_column(dataset, part.trim()).map(|column| Target::Column { column })
            })
            .collect();
    }

    Err(invalid("unrecognized target format"))
}

/// Convert an Excel-style column label ("A", "Z", "AA") to a 0-based index.
pub fn column_letter_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A' + 1) as usize;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve a column reference: name (case-insensitive), 0-based index, or letters.
fn resolve_column(dataset: &Dataset, reference: &str) -> TaskResult<String> {
    column_position(dataset, reference).map(|i| dataset.columns[i].clone())
}

fn column_position(dataset: &Dataset, reference: &str) -> TaskResult<usize> {
    if let Some(name) = find_column_by_name(dataset, reference) {
        if let Some(i) = dataset.column_index(&name) {
            return Ok(i);
        }
    }
    if !reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit()) {
        return reference
            .parse::<usize>()
            .ok()
            .filter(|i| *i < dataset.columns.len())
            .ok_or_else(|| TaskError::UnknownColumn(reference.to_string()));
    }
    if LETTERS.is_match(reference) {
        return letter_index(dataset, reference);
    }
    Err(TaskError::UnknownColumn(reference.to_string()))
}

fn find_column_by_name(dataset: &Dataset, name: &str) -> Option<String> {
    if dataset.has_column(name) {
        return Some(name.to_string());
    }
    let lower = name.to_lowercase();
    dataset
        .columns
        .iter()
        .find(|c| c.to_lowercase() == lower)
        .cloned()
}

fn letter_index(dataset: &Dataset, letters: &str) -> TaskResult<usize> {
    column_letter_to_index(letters)
        .filter(|i| *i < dataset.columns.len())
        .ok_or_else(|| TaskError::UnknownColumn(letters.to_uppercase()))
}

fn letter_column(dataset: &Dataset, letters: &str) -> TaskResult<String> {
    letter_index(dataset, letters).map(|i| dataset.columns[i].clone())
}

fn index_column(dataset: &Dataset, digits: &str) -> TaskResult<String> {
    digits
        .parse::<usize>()
        .ok()
        .and_then(|i| dataset.columns.get(i).cloned())
        .ok_or_else(|| TaskError::UnknownColumn(digits.to_string()))
}

fn one_based_column(raw: &str, digits: &str, dataset: &Dataset) -> TaskResult<usize> {
    let n: usize = parse_number(raw, digits)?;
    n.checked_sub(1)
        .filter(|i| *i < dataset.columns.len())
        .ok_or_else(|| TaskError::UnknownColumn(digits.to_string()))
}

/// 1-based row number as written by users -> 0-based index.
fn one_based(raw: &str, digits: &str, dataset: &Dataset) -> TaskResult<usize> {
    let n = parse_number(raw, digits)?;
    let row = n.checked_sub(1).ok_or_else(|| TaskError::InvalidTarget {
        target: raw.to_string(),
        message: "rows are numbered from 1".to_string(),
    })?;
    check_row(row, dataset)
}

fn zero_based(raw: &str, digits: &str, dataset: &Dataset) -> TaskResult<usize> {
    let row = parse_number(raw, digits)?;
    check_row(row, dataset)
}

fn check_row(row: usize, dataset: &Dataset) -> TaskResult<usize> {
    if row >= dataset.row_count() {
        return Err(TaskError::RowOutOfRange {
            row,
            rows: dataset.row_count(),
        });
    }
    Ok(row)
}

fn parse_number(raw: &str, digits: &str) -> TaskResult<usize> {
    digits.parse().map_err(|_| TaskError::InvalidTarget {
        target: raw.to_string(),
        message: format!("'{}' is not a valid number", digits),
    })
}
