//! Header-driven tabular storage.
//!
//! A store holds named tables. Each table has a header row of free-form
//! column titles and data rows of string cells. Rows are addressed by a
//! [`RowKey`] that the adapter assigns when the row is appended and that
//! never changes afterwards, whatever the row's physical position.

use std::any::Any;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod csv_dir;
mod memory;
mod postgres;

pub use csv_dir::CsvStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type RowKey = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub key: RowKey,
    /// Cells aligned to the current header, padded with blanks
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub key: RowKey,
    /// (physical column index, new value)
    pub cells: Vec<(usize, String)>,
}

impl RowUpdate {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            cells: Vec::new(),
        }
    }

    pub fn set(mut self, column: usize, value: impl Into<String>) -> Self {
        self.cells.push((column, value.into()));
        self
    }
}

/// Exclusive hold on a workbook that other processes may also open.
/// Dropping the lease releases the hold.
pub struct StoreLease {
    _hold: Option<Mutex<Box<dyn Any + Send>>>,
}

impl StoreLease {
    /// A lease for stores nothing outside this process can reach.
    pub fn local() -> Self {
        Self { _hold: None }
    }

    pub(crate) fn holding(hold: impl Any + Send) -> Self {
        Self {
            _hold: Some(Mutex::new(Box::new(hold))),
        }
    }
}

#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Take the workbook-wide write lease, waiting at most `wait`, and make
    /// sure reads after it see every write committed before it.
    async fn lease(&self, _wait: Duration) -> Result<StoreLease> {
        Ok(StoreLease::local())
    }

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create `table` with `header`; a no-op when the table already exists.
    async fn create_table(&self, table: &str, header: &[String]) -> Result<()>;

    /// Header row of `table`. Fails with `MissingTable` when absent.
    async fn header(&self, table: &str) -> Result<Vec<String>>;

    /// Replace the header row. Existing data cells keep their positions.
    async fn set_header(&self, table: &str, header: &[String]) -> Result<()>;

    /// All data rows in insertion order.
    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>>;

    async fn row(&self, table: &str, key: RowKey) -> Result<Option<StoredRow>>;

    async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>>;

    /// Apply cell writes. Keys that no longer exist are skipped; the keys
    /// that were written are returned.
    async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>>;

    async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize>;

    async fn append_row(&self, table: &str, row: Vec<String>) -> Result<RowKey> {
        let keys = self.append_rows(table, vec![row]).await?;
        keys.into_iter()
            .next()
            .ok_or_else(|| crate::error::Error::MissingTable(table.to_string()))
    }
}

/// Pad or keep `cells` so it is at least `width` long.
pub(crate) fn pad_to(mut cells: Vec<String>, width: usize) -> Vec<String> {
    if cells.len() < width {
        cells.resize(width, String::new());
    }
    cells
}

/// Write `value` at `column`, growing the row when the column lies past its end.
pub(crate) fn write_cell(cells: &mut Vec<String>, column: usize, value: String) {
    if cells.len() <= column {
        cells.resize(column + 1, String::new());
    }
    cells[column] = value;
}
