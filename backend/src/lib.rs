//! # RegexFlow - conversational regex editing of tabular data
//!
//! RegexFlow turns a natural-language instruction into an ordered batch of
//! regex replacement tasks, previews the exact cell changes, and commits them
//! to the dataset only after the user confirms.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │ Instruction│────▶│ Generator  │────▶│ Diff Engine│────▶│  Confirm?  │
//! │  (chat)    │     │ (TaskSpec) │     │ (preview)  │     │ yes / no   │
//! └────────────┘     └────────────┘     └────────────┘     └─────┬──────┘
//!                                                                │ yes
//!                    ┌────────────┐     ┌────────────┐           │
//!                    │  Dataset   │◀────│Apply Engine│◀──────────┘
//!                    │  Store     │     │ (atomic)   │
//!                    └────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use regexflow::{apply, preview, Dataset, MemoryStore, RegexTask, TaskBatch};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dataset = Dataset::from_records(
//!     vec!["Email".into()],
//!     vec![json!({"Email": "a@b.com"})],
//! ).unwrap();
//!
//! let batch = TaskBatch::new(vec![RegexTask::column("Email", ".+@.+", "[redacted]")]);
//! let report = preview(&batch, &dataset, 10).unwrap();
//! assert_eq!(report.total_matches, 1);
//!
//! let store = MemoryStore::with_dataset(dataset);
//! let applied = apply(&batch, &store, 10).await.unwrap();
//! assert_eq!(applied.entries[0].to, "[redacted]");
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Environment configuration
//! - [`models`] - Dataset and coordinates
//! - [`task`] - Regex tasks, targets and batches
//! - [`diff`] - Preview of a batch (read-only)
//! - [`apply`] - Atomic commit of a batch
//! - [`store`] - Dataset store trait, in-memory store, pagination
//! - [`generator`] - Instruction to tasks (AI)
//! - [`session`] - Conversation state machine
//! - [`parser`] - CSV ingestion and export
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Engines
pub mod apply;
pub mod diff;
pub mod task;

// Storage
pub mod store;

// Parsing
pub mod parser;

// Generation
pub mod generator;

// Conversation
pub mod session;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ApplyError, ConfigError, CsvError, GeneratorError, ModelError, StoreError, TaskError,
    WorkflowError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{cell_text, Coordinate, Dataset, Row};

// =============================================================================
// Re-exports - Engines
// =============================================================================

pub use apply::{apply, ApplyReport};
pub use diff::{compute_changes, preview, AppliedEntry, ChangeSet, DiffEntry, DiffReport};
pub use task::{RegexTask, Target, TaskBatch, TaskSpec};

// =============================================================================
// Re-exports - Store
// =============================================================================

pub use store::{paginate, CellWrite, CommitFailure, DatasetStore, MemoryStore, Page};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{parse_bytes_auto, parse_csv_file_auto, to_csv, ParseResult};

// =============================================================================
// Re-exports - Generation and sessions
// =============================================================================

pub use config::Config;
pub use generator::{AiClient, DisabledGenerator, TaskGenerator};
pub use session::{ConversationSession, SessionManager, SessionState, TurnOutcome};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
