use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::{RowKey, RowUpdate, StoreLease, StoredRow, TabularStore};

/// Workbook-wide lock serializing every read-modify-write.
///
/// The mutex orders callers inside this process; the store lease orders
/// processes sharing the same workbook. Both come out of one wait budget.
pub struct DocumentLock {
    inner: Mutex<()>,
    store: Arc<dyn TabularStore>,
    wait: Duration,
}

/// Proof that the document lock is held. Helpers that must run inside the
/// critical section take `&Held` and write through it, so a failed
/// operation can undo what it already wrote.
pub struct Held<'a> {
    store: &'a dyn TabularStore,
    journal: StdMutex<Vec<Undo>>,
    _lease: StoreLease,
    _guard: MutexGuard<'a, ()>,
}

/// Inverse of one write made under the lock.
#[derive(Debug)]
enum Undo {
    Appended { table: String, keys: Vec<RowKey> },
    Overwritten { table: String, rows: Vec<StoredRow> },
    Deleted { table: String, rows: Vec<Vec<String>> },
}

impl Undo {
    async fn revert(self, store: &dyn TabularStore) -> Result<()> {
        match self {
            Undo::Appended { table, keys } => {
                store.delete_rows(&table, &keys).await?;
            }
            Undo::Overwritten { table, rows } => {
                let mut updates = Vec::with_capacity(rows.len());
                for previous in rows {
                    let Some(current) = store.row(&table, previous.key).await? else {
                        continue;
                    };
                    let width = current.cells.len().max(previous.cells.len());
                    let mut update = RowUpdate::new(previous.key);
                    for column in 0..width {
                        let value = previous.cells.get(column).cloned().unwrap_or_default();
                        update = update.set(column, value);
                    }
                    updates.push(update);
                }
                store.update_rows(&table, &updates).await?;
            }
            Undo::Deleted { table, rows } => {
                store.append_rows(&table, rows).await?;
            }
        }
        Ok(())
    }
}

impl DocumentLock {
    pub fn new(wait: Duration, store: Arc<dyn TabularStore>) -> Self {
        Self {
            inner: Mutex::new(()),
            store,
            wait,
        }
    }

    pub async fn acquire(&self) -> Result<Held<'_>> {
        let started = Instant::now();
        let guard = match timeout(self.wait, self.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Err(self.expired()),
        };
        let remaining = self.wait.saturating_sub(started.elapsed());
        let lease = match self.store.lease(remaining).await {
            Ok(lease) => lease,
            Err(Error::LockTimeout(_)) => return Err(self.expired()),
            Err(err) => return Err(err),
        };
        Ok(Held {
            store: self.store.as_ref(),
            journal: StdMutex::new(Vec::new()),
            _lease: lease,
            _guard: guard,
        })
    }

    fn expired(&self) -> Error {
        warn!(wait_ms = self.wait.as_millis() as u64, "document lock wait expired");
        Error::LockTimeout(self.wait)
    }
}

impl Held<'_> {
    fn journal(&self) -> StdMutexGuard<'_, Vec<Undo>> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, step: Undo) {
        self.journal().push(step);
    }

    pub async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>> {
        let keys = self.store.append_rows(table, rows).await?;
        if !keys.is_empty() {
            self.record(Undo::Appended {
                table: table.to_string(),
                keys: keys.clone(),
            });
        }
        Ok(keys)
    }

    pub async fn append_row(&self, table: &str, row: Vec<String>) -> Result<RowKey> {
        self.append_rows(table, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::MissingTable(table.to_string()))
    }

    pub async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>> {
        let touched: HashSet<RowKey> = updates.iter().map(|update| update.key).collect();
        let before: Vec<StoredRow> = self
            .store
            .rows(table)
            .await?
            .into_iter()
            .filter(|row| touched.contains(&row.key))
            .collect();
        let applied = self.store.update_rows(table, updates).await?;
        if !before.is_empty() {
            self.record(Undo::Overwritten {
                table: table.to_string(),
                rows: before,
            });
        }
        Ok(applied)
    }

    pub async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize> {
        let doomed: HashSet<RowKey> = keys.iter().copied().collect();
        let before: Vec<Vec<String>> = self
            .store
            .rows(table)
            .await?
            .into_iter()
            .filter(|row| doomed.contains(&row.key))
            .map(|row| row.cells)
            .collect();
        let removed = self.store.delete_rows(table, keys).await?;
        if removed > 0 {
            self.record(Undo::Deleted {
                table: table.to_string(),
                rows: before,
            });
        }
        Ok(removed)
    }

    /// Revert every write made through this hold, newest first. Returns the
    /// number of steps replayed; the first failing step's error wins.
    pub async fn roll_back(&self) -> Result<usize> {
        let steps = std::mem::take(&mut *self.journal());
        let count = steps.len();
        let mut first_error = None;
        for step in steps.into_iter().rev() {
            if let Err(err) = step.revert(self.store).await {
                warn!(error = %err, "undo step failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn second_writer_times_out_while_first_holds() {
        let lock = DocumentLock::new(Duration::from_millis(20), Arc::new(MemoryStore::new()));
        let held = lock.acquire().await.unwrap();
        let blocked = lock.acquire().await;
        assert!(matches!(blocked, Err(Error::LockTimeout(_))));
        drop(held);
        assert!(lock.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn roll_back_restores_appends_updates_and_deletes() {
        let store = Arc::new(MemoryStore::new());
        store.create_table("t", &cells(&["A", "B"])).await.unwrap();
        store
            .append_rows("t", vec![cells(&["1", "x"]), cells(&["2", "y"])])
            .await
            .unwrap();
        let lock = DocumentLock::new(Duration::from_secs(1), store.clone());

        let held = lock.acquire().await.unwrap();
        held.append_row("t", cells(&["3", "z"])).await.unwrap();
        held.update_rows("t", &[RowUpdate::new(1).set(1, "changed").set(3, "wide")])
            .await
            .unwrap();
        held.delete_rows("t", &[2]).await.unwrap();
        assert_eq!(held.roll_back().await.unwrap(), 3);
        assert_eq!(held.roll_back().await.unwrap(), 0);
        drop(held);

        let rows: Vec<Vec<String>> = store
            .rows("t")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.cells.into_iter().filter(|cell| !cell.is_empty()).collect())
            .collect();
        assert_eq!(rows, vec![cells(&["1", "x"]), cells(&["2", "y"])]);
    }
}
