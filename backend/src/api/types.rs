//! REST API types and error mapping.
//!
//! Bodies are camelCase JSON. Every failure is answered with
//! `{"status": "error", "error": "<message>"}` and a status code:
//!
//! | Error                                     | Status |
//! |-------------------------------------------|--------|
//! | validation (pattern, column, target, page)| 400    |
//! | no dataset loaded                         | 400    |
//! | concurrent edit detected at commit        | 409    |
//! | anything else                             | 500    |

use axum::{http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;

use crate::apply::ApplyReport;
use crate::diff::{AppliedEntry, DiffEntry, DiffReport};
use crate::error::{ApplyError, CsvError, GeneratorError, StoreError};
use crate::models::Row;
use crate::session::{ChatMessage, TurnOutcome};
use crate::store::Page;
use crate::task::TaskSpec;

// =============================================================================
// Requests
// =============================================================================

/// `GET /api/preview_data` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    #[serde(alias = "pageSize")]
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub description: String,
}

/// Body of `preview_replace` and `replace`
#[derive(Debug, Clone, Deserialize)]
pub struct TasksRequest {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Sent after a successful upload: file metadata plus the first page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status: String,
    pub filename: Option<String>,
    pub encoding: String,
    pub delimiter: String,
    pub columns: Vec<String>,
    pub preview: Vec<Row>,
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    pub total_pages: usize,
}

impl UploadResponse {
    pub fn new(
        filename: Option<String>,
        encoding: String,
        delimiter: String,
        columns: Vec<String>,
        first_page: Page,
    ) -> Self {
        Self {
            status: "ok".to_string(),
            filename,
            encoding,
            delimiter,
            columns,
            preview: first_page.rows,
            page: first_page.page,
            page_size: first_page.page_size,
            total_rows: first_page.total_rows,
            total_pages: first_page.total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub message: String,
    pub total_matches: usize,
    pub shown: usize,
    pub omitted: usize,
    pub preview: Vec<DiffEntry>,
}

impl From<DiffReport> for PreviewResponse {
    fn from(report: DiffReport) -> Self {
        Self {
            message: format!("Found {} matches.", report.total_matches),
            total_matches: report.total_matches,
            shown: report.shown,
            omitted: report.omitted,
            preview: report.entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceResponse {
    pub message: String,
    pub total_replacements: usize,
    pub shown: usize,
    pub omitted: usize,
    pub preview: Vec<AppliedEntry>,
}

impl From<ApplyReport> for ReplaceResponse {
    fn from(report: ApplyReport) -> Self {
        Self {
            message: format!("Replaced {} items.", report.total_replacements),
            total_replacements: report.total_replacements,
            shown: report.shown,
            omitted: report.omitted,
            preview: report.entries,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub session_id: String,
    /// Bot messages produced by this turn
    pub replies: Vec<ChatMessage>,
    /// State after the turn
    pub state: String,
    pub outcome: Option<TurnOutcome>,
    pub error: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Error half of every handler result
pub type Rejection = (StatusCode, Json<Value>);

/// Create an error response body
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

pub fn reject(status: StatusCode, message: impl Display) -> Rejection {
    (status, Json(error_response(&message.to_string())))
}

pub fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NoDataset
        | StoreError::InvalidPage { .. }
        | StoreError::PageOutOfRange { .. }
        | StoreError::NoSuchCell(_) => StatusCode::BAD_REQUEST,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn apply_status(err: &ApplyError) -> StatusCode {
    match err {
        ApplyError::Task(_) => StatusCode::BAD_REQUEST,
        ApplyError::Store(e) => store_status(e),
        ApplyError::PartialApplyFailure { source, .. } => match source {
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

pub fn generator_status(err: &GeneratorError) -> StatusCode {
    match err {
        GeneratorError::InvalidInstruction(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn csv_status(err: &CsvError) -> StatusCode {
    match err {
        CsvError::IoError(_) | CsvError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::models::Coordinate;

    #[test]
    fn test_error_response_shape() {
        let body = error_response("boom");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "boom");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(store_status(&StoreError::NoDataset), StatusCode::BAD_REQUEST);
        assert_eq!(
            store_status(&StoreError::PageOutOfRange { page: 9, total_pages: 2 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            apply_status(&ApplyError::Task(TaskError::UnknownColumn("X".into()))),
            StatusCode::BAD_REQUEST
        );

        let conflict = StoreError::Conflict {
            coordinate: Coordinate::new(0, "Email"),
            expected: "a".into(),
            found: "b".into(),
        };
        assert_eq!(
            apply_status(&ApplyError::PartialApplyFailure {
                failed_at: Coordinate::new(0, "Email"),
                written: 0,
                attempted: 1,
                rolled_back: true,
                source: conflict,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            generator_status(&GeneratorError::ApiError("overloaded".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_preview_response_from_report() {
        let response = PreviewResponse::from(DiffReport {
            total_matches: 12,
            shown: 10,
            omitted: 2,
            entries: vec![],
        });
        let json = serde_json::to_value(response).unwrap();
        assert_eq!(json["totalMatches"], 12);
        assert_eq!(json["omitted"], 2);
        assert_eq!(json["message"], "Found 12 matches.");
    }
}
