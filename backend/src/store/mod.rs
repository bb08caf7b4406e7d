//! Dataset store: the working table behind the workflow.
//!
//! The engines only talk to the [`DatasetStore`] trait. [`MemoryStore`] is
//! the in-process implementation used by the server and the CLI; it holds
//! one dataset behind a `tokio::sync::RwLock`, so concurrent applies from
//! different sessions are serialized per dataset.
//!
//! Commits are all-or-nothing. [`MemoryStore`] stages the touched rows,
//! applies the writes to the staged copies and swaps them in. Stores that
//! only have per-cell writes get the trait's default [`DatasetStore::commit`],
//! which restores already written cells when a later write fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{cell_text, Coordinate, Dataset, Row};

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

// =============================================================================
// Writes
// =============================================================================

/// A staged cell write.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub coordinate: Coordinate,
    /// Value the cell must still hold for the write to proceed.
    pub expected: Value,
    pub value: Value,
}

/// Why a commit did not go through.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitFailure {
    /// First coordinate whose write failed.
    pub failed_at: Coordinate,
    /// Writes that reached the store before the failure.
    pub written: usize,
    /// Writes in the batch.
    pub attempted: usize,
    /// Whether the store is back to its pre-commit state.
    pub rolled_back: bool,
    pub error: StoreError,
}

// =============================================================================
// Pagination
// =============================================================================

/// One page of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Row>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub total_rows: usize,
    /// `ceil(total_rows / page_size)`
    pub total_pages: usize,
}

/// Cut page `page` (1-based) of `page_size` rows out of `dataset`.
///
/// An empty dataset has zero pages; its first page is empty rather than
/// out of range.
pub fn paginate(dataset: &Dataset, page: usize, page_size: usize) -> StoreResult<Page> {
    if page < 1 || page_size < 1 {
        return Err(StoreError::InvalidPage { page, page_size });
    }

    let total_rows = dataset.row_count();
    let total_pages = total_rows.div_ceil(page_size);

    if page > total_pages && !(page == 1 && total_rows == 0) {
        return Err(StoreError::PageOutOfRange { page, total_pages });
    }

    let start = (page - 1) * page_size;
    let rows = dataset
        .rows
        .iter()
        .skip(start)
        .take(page_size)
        .cloned()
        .collect();

    Ok(Page {
        rows,
        page,
        page_size,
        total_rows,
        total_pages,
    })
}

// =============================================================================
// Store trait
// =============================================================================

/// Access to the working dataset.
///
/// Reads and writes may suspend; everything else in the workflow is
/// synchronous.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Replace the whole dataset (upload).
    async fn load(&self, dataset: Dataset) -> StoreResult<()>;

    /// Copy of the current contents.
    async fn snapshot(&self) -> StoreResult<Dataset>;

    async fn read_cell(&self, coordinate: &Coordinate) -> StoreResult<Value>;

    async fn write_cell(&self, coordinate: &Coordinate, value: Value) -> StoreResult<()>;

    async fn read_page(&self, page: usize, page_size: usize) -> StoreResult<Page> {
        let dataset = self.snapshot().await?;
        paginate(&dataset, page, page_size)
    }

    /// Commit every write or none of them.
    async fn commit(&self, writes: &[CellWrite]) -> Result<(), CommitFailure> {
        for (i, write) in writes.iter().enumerate() {
            if let Err(error) = checked_write(self, write).await {
                let mut rolled_back = true;
                for done in writes[..i].iter().rev() {
                    if let Err(e) = self.write_cell(&done.coordinate, done.expected.clone()).await {
                        warn!(coordinate = %done.coordinate, error = %e, "rollback write failed");
                        rolled_back = false;
                    }
                }
                return Err(CommitFailure {
                    failed_at: write.coordinate.clone(),
                    written: i,
                    attempted: writes.len(),
                    rolled_back,
                    error,
                });
            }
        }
        Ok(())
    }
}

async fn checked_write<S: DatasetStore + ?Sized>(store: &S, write: &CellWrite) -> StoreResult<()> {
    let current = store.read_cell(&write.coordinate).await?;
    if current != write.expected {
        return Err(conflict(&write.coordinate, &write.expected, &current));
    }
    store.write_cell(&write.coordinate, write.value.clone()).await
}

fn conflict(coordinate: &Coordinate, expected: &Value, found: &Value) -> StoreError {
    StoreError::Conflict {
        coordinate: coordinate.clone(),
        expected: cell_text(expected).unwrap_or_default(),
        found: cell_text(found).unwrap_or_default(),
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Dataset held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    dataset: RwLock<Option<Dataset>>,
}

impl MemoryStore {
    /// A store with nothing loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            dataset: RwLock::new(Some(dataset)),
        }
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn load(&self, dataset: Dataset) -> StoreResult<()> {
        info!(
            rows = dataset.row_count(),
            columns = dataset.columns.len(),
            "dataset loaded"
        );
        *self.dataset.write().await = Some(dataset);
        Ok(())
    }

    async fn snapshot(&self) -> StoreResult<Dataset> {
        self.dataset.read().await.clone().ok_or(StoreError::NoDataset)
    }

    async fn read_cell(&self, coordinate: &Coordinate) -> StoreResult<Value> {
        let guard = self.dataset.read().await;
        let dataset = guard.as_ref().ok_or(StoreError::NoDataset)?;
        dataset
            .cell(coordinate)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchCell(coordinate.clone()))
    }

    async fn write_cell(&self, coordinate: &Coordinate, value: Value) -> StoreResult<()> {
        let mut guard = self.dataset.write().await;
        let dataset = guard.as_mut().ok_or(StoreError::NoDataset)?;
        dataset
            .set_cell(coordinate, value)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchCell(coordinate.clone()))
    }

    async fn read_page(&self, page: usize, page_size: usize) -> StoreResult<Page> {
        let guard = self.dataset.read().await;
        let dataset = guard.as_ref().ok_or(StoreError::NoDataset)?;
        paginate(dataset, page, page_size)
    }

    /// Stage touched rows, apply every write, then swap the rows in.
    async fn commit(&self, writes: &[CellWrite]) -> Result<(), CommitFailure> {
        let mut guard = self.dataset.write().await;
        let fail = |write: &CellWrite, error: StoreError| CommitFailure {
            failed_at: write.coordinate.clone(),
            written: 0,
            attempted: writes.len(),
            rolled_back: true,
            error,
        };

        let Some(dataset) = guard.as_mut() else {
            return match writes.first() {
                Some(first) => Err(fail(first, StoreError::NoDataset)),
                None => Ok(()),
            };
        };

        let mut staged: BTreeMap<usize, Row> = BTreeMap::new();
        for write in writes {
            let coordinate = &write.coordinate;
            if !dataset.has_column(&coordinate.column) || coordinate.row >= dataset.row_count() {
                return Err(fail(write, StoreError::NoSuchCell(coordinate.clone())));
            }
            let row = staged
                .entry(coordinate.row)
                .or_insert_with(|| dataset.rows[coordinate.row].clone());
            let current = row.get(&coordinate.column).cloned().unwrap_or(Value::Null);
            if current != write.expected {
                return Err(fail(write, conflict(coordinate, &write.expected, &current)));
            }
            row.insert(coordinate.column.clone(), write.value.clone());
        }

        let touched = staged.len();
        for (index, row) in staged {
            dataset.rows[index] = row;
        }
        debug!(writes = writes.len(), rows = touched, "commit swapped rows");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dataset(rows: usize) -> Dataset {
        let records = (0..rows)
            .map(|i| json!({"Id": i, "Name": format!("name{}", i)}))
            .collect();
        Dataset::from_records(vec!["Id".into(), "Name".into()], records).unwrap()
    }

    #[test]
    fn test_pagination_arithmetic() {
        let ds = dataset(250);
        let page = paginate(&ds, 1, 50).unwrap();
        assert_eq!(page.total_pages, 5);
        assert_eq!(page.total_rows, 250);
        assert_eq!(page.rows.len(), 50);

        let last = paginate(&ds, 5, 50).unwrap();
        assert_eq!(last.rows[0]["Id"], 200);

        let uneven = paginate(&dataset(251), 6, 50).unwrap();
        assert_eq!(uneven.total_pages, 6);
        assert_eq!(uneven.rows.len(), 1);
    }

    #[test]
    fn test_pagination_empty_dataset() {
        let page = paginate(&dataset(0), 1, 50).unwrap();
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.total_rows, 0);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_pagination_errors() {
        let ds = dataset(10);
        assert_eq!(
            paginate(&ds, 0, 50).unwrap_err(),
            StoreError::InvalidPage { page: 0, page_size: 50 }
        );
        assert_eq!(
            paginate(&ds, 1, 0).unwrap_err(),
            StoreError::InvalidPage { page: 1, page_size: 0 }
        );
        assert_eq!(
            paginate(&ds, 2, 50).unwrap_err(),
            StoreError::PageOutOfRange { page: 2, total_pages: 1 }
        );
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = MemoryStore::new();
        assert_eq!(store.snapshot().await.unwrap_err(), StoreError::NoDataset);
        assert_eq!(store.read_page(1, 10).await.unwrap_err(), StoreError::NoDataset);
    }

    #[tokio::test]
    async fn test_memory_commit_is_atomic() {
        let store = MemoryStore::with_dataset(dataset(3));
        let writes = vec![
            CellWrite {
                coordinate: Coordinate::new(0, "Name"),
                expected: json!("name0"),
                value: json!("first"),
            },
            CellWrite {
                coordinate: Coordinate::new(2, "Name"),
                expected: json!("stale"),
                value: json!("third"),
            },
        ];

        let failure = store.commit(&writes).await.unwrap_err();
        assert_eq!(failure.failed_at, Coordinate::new(2, "Name"));
        assert!(failure.rolled_back);
        assert!(matches!(failure.error, StoreError::Conflict { .. }));

        // First write was staged but never swapped in
        assert_eq!(store.read_cell(&Coordinate::new(0, "Name")).await.unwrap(), "name0");
    }

    #[tokio::test]
    async fn test_memory_commit_success() {
        let store = MemoryStore::with_dataset(dataset(2));
        let writes = vec![CellWrite {
            coordinate: Coordinate::new(1, "Id"),
            expected: json!(1),
            value: json!("one"),
        }];
        store.commit(&writes).await.unwrap();
        assert_eq!(store.read_cell(&Coordinate::new(1, "Id")).await.unwrap(), "one");
    }

    /// Store whose writes start failing after a fixed number of calls.
    struct FlakyStore {
        inner: MemoryStore,
        writes_allowed: AtomicUsize,
    }

    #[async_trait]
    impl DatasetStore for FlakyStore {
        async fn load(&self, dataset: Dataset) -> StoreResult<()> {
            self.inner.load(dataset).await
        }

        async fn snapshot(&self) -> StoreResult<Dataset> {
            self.inner.snapshot().await
        }

        async fn read_cell(&self, coordinate: &Coordinate) -> StoreResult<Value> {
            self.inner.read_cell(coordinate).await
        }

        async fn write_cell(&self, coordinate: &Coordinate, value: Value) -> StoreResult<()> {
            let left = self.writes_allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::Unavailable("write quota exhausted".into()));
            }
            self.writes_allowed.store(left - 1, Ordering::SeqCst);
            self.inner.write_cell(coordinate, value).await
        }
    }

    #[tokio::test]
    async fn test_default_commit_rolls_back() {
        let store = FlakyStore {
            inner: MemoryStore::with_dataset(dataset(3)),
            // two forward writes, then one failure, then rollback needs 2 more
            writes_allowed: AtomicUsize::new(2),
        };
        let writes: Vec<CellWrite> = (0..3)
            .map(|i| CellWrite {
                coordinate: Coordinate::new(i, "Name"),
                expected: json!(format!("name{}", i)),
                value: json!("changed"),
            })
            .collect();

        let failure = store.commit(&writes).await.unwrap_err();
        assert_eq!(failure.failed_at, Coordinate::new(2, "Name"));
        assert_eq!(failure.written, 2);
        assert_eq!(failure.attempted, 3);
        // Quota is exhausted, so the rollback writes fail too
        assert!(!failure.rolled_back);
    }

    #[tokio::test]
    async fn test_default_commit_restores_on_failure() {
        let store = FlakyStore {
            inner: MemoryStore::with_dataset(dataset(3)),
            writes_allowed: AtomicUsize::new(usize::MAX),
        };
        let writes = vec![
            CellWrite {
                coordinate: Coordinate::new(0, "Name"),
                expected: json!("name0"),
                value: json!("changed"),
            },
            CellWrite {
                coordinate: Coordinate::new(1, "Name"),
                expected: json!("not name1"),
                value: json!("changed"),
            },
        ];

        let failure = store.commit(&writes).await.unwrap_err();
        assert!(failure.rolled_back);
        assert_eq!(failure.written, 1);
        assert_eq!(store.read_cell(&Coordinate::new(0, "Name")).await.unwrap(), "name0");
    }
}
