//! Apply engine: commit a task batch to the store.
//!
//! Apply computes exactly the change set a preview would show on the same
//! snapshot, then hands every write to [`DatasetStore::commit`] in one go.
//!
//! ```text
//! store.snapshot() ─▶ compile ─▶ compute_changes ─▶ writes ─▶ store.commit()
//!                        │                                        │
//!                   TaskError (nothing written)     CommitFailure ─▶ PartialApplyFailure
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::diff::{compute_changes, AppliedEntry, CellChange};
use crate::error::ApplyError;
use crate::store::DatasetStore;
use crate::task::TaskBatch;

/// What an apply changed.
///
/// `shown + omitted == total_replacements`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub total_replacements: usize,
    pub shown: usize,
    pub omitted: usize,
    pub entries: Vec<AppliedEntry>,
}

impl ApplyReport {
    fn new(changes: &[CellChange], limit: usize) -> Self {
        let entries: Vec<AppliedEntry> = changes
            .iter()
            .take(limit)
            .map(|c| AppliedEntry::from(c.entry()))
            .collect();
        let shown = entries.len();
        Self {
            total_replacements: changes.len(),
            shown,
            omitted: changes.len() - shown,
            entries,
        }
    }
}

/// Apply `batch` to the dataset held by `store`.
///
/// The whole batch is validated before the first write. A batch that
/// changes nothing commits nothing and reports zero replacements.
pub async fn apply(
    batch: &TaskBatch,
    store: &dyn DatasetStore,
    limit: usize,
) -> Result<ApplyReport, ApplyError> {
    let snapshot = store.snapshot().await?;
    let compiled = batch.compile(&snapshot)?;
    let changes = compute_changes(&compiled, &snapshot);

    if changes.is_empty() {
        info!(tasks = batch.len(), "apply matched nothing");
        return Ok(ApplyReport::new(&[], limit));
    }

    let writes = changes.writes();
    if let Err(failure) = store.commit(&writes).await {
        warn!(
            failed_at = %failure.failed_at,
            written = failure.written,
            attempted = failure.attempted,
            rolled_back = failure.rolled_back,
            "commit failed"
        );
        return Err(ApplyError::PartialApplyFailure {
            failed_at: failure.failed_at,
            written: failure.written,
            attempted: failure.attempted,
            rolled_back: failure.rolled_back,
            source: failure.error,
        });
    }

    info!(
        tasks = batch.len(),
        replacements = changes.len(),
        "batch applied"
    );
    Ok(ApplyReport::new(&changes.changes, limit))
}
