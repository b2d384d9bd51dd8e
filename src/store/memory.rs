use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{pad_to, write_cell, RowKey, RowUpdate, StoredRow, TabularStore};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
struct MemTable {
    header: Vec<String>,
    rows: Vec<StoredRow>,
    next_key: RowKey,
}

impl MemTable {
    fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
            next_key: 1,
        }
    }

    fn width(&self) -> usize {
        self.header.len()
    }
}

/// Tables held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<String, MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, MemTable>> {
        match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, MemTable>> {
        match self.tables.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install a table loaded from elsewhere. Rows keep the key they were
    /// saved with; rows without one, or repeating one already seen, get
    /// keys past the largest.
    pub(crate) fn load_table(
        &self,
        table: &str,
        header: Vec<String>,
        rows: Vec<(Option<RowKey>, Vec<String>)>,
    ) {
        let mut seen = HashSet::new();
        let rows: Vec<(Option<RowKey>, Vec<String>)> = rows
            .into_iter()
            .map(|(key, cells)| (key.filter(|key| *key > 0 && seen.insert(*key)), cells))
            .collect();
        let mut loaded = MemTable::new(header);
        loaded.next_key = seen.iter().max().map_or(1, |max| max + 1);
        for (key, cells) in rows {
            let key = match key {
                Some(key) => key,
                None => {
                    let key = loaded.next_key;
                    loaded.next_key += 1;
                    key
                }
            };
            loaded.rows.push(StoredRow { key, cells });
        }
        self.write().insert(table.to_string(), loaded);
    }

    /// Header plus keyed, padded data rows, for serializing a table elsewhere.
    pub(crate) fn snapshot(&self, table: &str) -> Option<(Vec<String>, Vec<StoredRow>)> {
        let tables = self.read();
        let found = tables.get(table)?;
        let width = found.width();
        let rows = found
            .rows
            .iter()
            .map(|row| StoredRow {
                key: row.key,
                cells: pad_to(row.cells.clone(), width),
            })
            .collect();
        Some((found.header.clone(), rows))
    }

    /// Swap in every table of `fresh` at once, dropping the current set.
    pub(crate) fn adopt(&self, fresh: MemoryStore) {
        let tables = match fresh.tables.into_inner() {
            Ok(tables) => tables,
            Err(poisoned) => poisoned.into_inner(),
        };
        *self.write() = tables;
    }
}

#[async_trait]
impl TabularStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.read().contains_key(table))
    }

    async fn create_table(&self, table: &str, header: &[String]) -> Result<()> {
        self.write()
            .entry(table.to_string())
            .or_insert_with(|| MemTable::new(header.to_vec()));
        Ok(())
    }

    async fn header(&self, table: &str) -> Result<Vec<String>> {
        self.read()
            .get(table)
            .map(|found| found.header.clone())
            .ok_or_else(|| Error::MissingTable(table.to_string()))
    }

    async fn set_header(&self, table: &str, header: &[String]) -> Result<()> {
        let mut tables = self.write();
        let found = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        found.header = header.to_vec();
        Ok(())
    }

    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>> {
        let tables = self.read();
        let found = tables
            .get(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let width = found.width();
        Ok(found
            .rows
            .iter()
            .map(|row| StoredRow {
                key: row.key,
                cells: pad_to(row.cells.clone(), width),
            })
            .collect())
    }

    async fn row(&self, table: &str, key: RowKey) -> Result<Option<StoredRow>> {
        let tables = self.read();
        let found = tables
            .get(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let width = found.width();
        Ok(found.rows.iter().find(|row| row.key == key).map(|row| StoredRow {
            key: row.key,
            cells: pad_to(row.cells.clone(), width),
        }))
    }

    async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>> {
        let mut tables = self.write();
        let found = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let mut keys = Vec::with_capacity(rows.len());
        for cells in rows {
            let key = found.next_key;
            found.next_key += 1;
            found.rows.push(StoredRow { key, cells });
            keys.push(key);
        }
        Ok(keys)
    }

    async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>> {
        let mut tables = self.write();
        let found = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let mut applied = Vec::new();
        for update in updates {
            let Some(row) = found.rows.iter_mut().find(|row| row.key == update.key) else {
                continue;
            };
            for (column, value) in &update.cells {
                write_cell(&mut row.cells, *column, value.clone());
            }
            applied.push(update.key);
        }
        Ok(applied)
    }

    async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize> {
        let doomed: HashSet<RowKey> = keys.iter().copied().collect();
        let mut tables = self.write();
        let found = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let before = found.rows.len();
        found.rows.retain(|row| !doomed.contains(&row.key));
        Ok(before - found.rows.len())
    }
}
