//! Error types for the RegexFlow workflow.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ModelError`] - Dataset shape errors
//! - [`CsvError`] - CSV ingestion errors
//! - [`TaskError`] - Regex task validation errors
//! - [`StoreError`] - Dataset store read/write errors
//! - [`ApplyError`] - Commit errors from the apply engine
//! - [`GeneratorError`] - Task generation errors
//! - [`WorkflowError`] - Top-level conversational workflow errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::Coordinate;

// =============================================================================
// Dataset Model Errors
// =============================================================================

/// Errors when building a dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Two columns share the same name.
    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    /// A row carries a key that is not a dataset column.
    #[error("Row {row} has unknown column '{column}'")]
    StrayColumn { row: usize, column: String },
}

// =============================================================================
// CSV Ingestion Errors
// =============================================================================

/// Errors during CSV ingestion.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid CSV format.
    #[error("Invalid CSV format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Empty file.
    #[error("CSV file is empty")]
    EmptyFile,

    /// Header row produced an unusable dataset.
    #[error("Invalid header: {0}")]
    Header(#[from] ModelError),

    /// Spreadsheet workbooks are not read; export them as CSV first.
    #[error("Unsupported file format '{0}'. Please upload a .csv file")]
    UnsupportedFormat(String),

    /// Serializing the dataset failed.
    #[error("CSV export failed: {0}")]
    Export(String),
}

// =============================================================================
// Task Errors
// =============================================================================

/// Errors raised while validating a task batch.
///
/// All of these are raised before any preview or apply side effect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// Malformed regex syntax.
    #[error("Invalid regex pattern in task {index} ('{pattern}'): {message}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        message: String,
    },

    /// Scope references a column the dataset does not have.
    #[error("Column '{0}' does not exist in the table")]
    UnknownColumn(String),

    /// Textual target could not be parsed.
    #[error("Cannot parse target '{target}': {message}")]
    InvalidTarget { target: String, message: String },

    /// Row index outside the dataset.
    #[error("Row {row} out of range (dataset has {rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the dataset store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Nothing has been uploaded yet.
    #[error("No dataset loaded. Please upload a file first")]
    NoDataset,

    /// Page or page size below 1.
    #[error("Invalid pagination: page {page}, page size {page_size} (both must be >= 1)")]
    InvalidPage { page: usize, page_size: usize },

    /// Page past the last page.
    #[error("Page {page} out of range ({total_pages} pages)")]
    PageOutOfRange { page: usize, total_pages: usize },

    /// Coordinate outside the dataset.
    #[error("No cell at {0}")]
    NoSuchCell(Coordinate),

    /// Cell no longer holds the value the write was computed from.
    #[error("Cell {coordinate} changed concurrently: expected '{expected}', found '{found}'")]
    Conflict {
        coordinate: Coordinate,
        expected: String,
        found: String,
    },

    /// Generic downstream failure.
    #[error("Dataset store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Apply Errors
// =============================================================================

/// Errors from the apply engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    /// Batch failed validation; nothing was written.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Store failed before any write was attempted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A write failed mid-batch.
    #[error("Apply failed at {failed_at} after {written}/{attempted} writes ({}): {source}",
        rollback_note(.rolled_back))]
    PartialApplyFailure {
        failed_at: Coordinate,
        written: usize,
        attempted: usize,
        rolled_back: bool,
        source: StoreError,
    },
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "rolled back"
    } else {
        "NOT rolled back"
    }
}

// =============================================================================
// Generator Errors
// =============================================================================

/// Errors from the task generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Missing API key.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned an error.
    #[error("API error: {0}")]
    ApiError(String),

    /// Response could not be turned into tasks.
    #[error("Invalid generator response: {0}")]
    InvalidResponse(String),

    /// Instruction was empty or unusable.
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable held a value that does not parse.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

// =============================================================================
// Workflow Errors (top-level)
// =============================================================================

/// Top-level errors of a conversational turn.
///
/// Every variant is surfaced to the user as a message.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Validation error (InvalidPattern, UnknownColumn, ...).
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Generation succeeded but yielded an empty batch.
    #[error("Could not generate any tasks for that description")]
    NoTasksGenerated,

    /// Generator failed.
    #[error("Task generation failed: {0}")]
    Generator(#[from] GeneratorError),

    /// Store failure outside of a commit.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// Commit failure.
    #[error(transparent)]
    Apply(ApplyError),
}

impl From<ApplyError> for WorkflowError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Task(e) => WorkflowError::Task(e),
            ApplyError::Store(e) => WorkflowError::StoreUnavailable(e),
            other => WorkflowError::Apply(other),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for task validation.
pub type TaskResult<T> = Result<T, TaskError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for generator operations.
pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // TaskError -> ApplyError -> WorkflowError keeps the validation variant
        let task_err = TaskError::UnknownColumn("Email".into());
        let apply_err: ApplyError = task_err.into();
        let workflow_err: WorkflowError = apply_err.into();
        assert!(matches!(workflow_err, WorkflowError::Task(TaskError::UnknownColumn(_))));
        assert!(workflow_err.to_string().contains("Email"));

        // StoreError -> WorkflowError
        let workflow_err: WorkflowError = StoreError::NoDataset.into();
        assert!(matches!(workflow_err, WorkflowError::StoreUnavailable(_)));
    }

    #[test]
    fn test_partial_apply_failure_format() {
        let err = ApplyError::PartialApplyFailure {
            failed_at: Coordinate::new(2, "Name"),
            written: 2,
            attempted: 5,
            rolled_back: true,
            source: StoreError::Unavailable("disk full".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("'Name'"));
        assert!(msg.contains("2/5"));
        assert!(msg.contains("rolled back"));
        assert!(msg.contains("disk full"));
    }
}
