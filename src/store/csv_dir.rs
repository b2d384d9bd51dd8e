use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs2::FileExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{MemoryStore, RowKey, RowUpdate, StoreLease, StoredRow, TabularStore};
use crate::error::{Error, Result};

/// First column of every file; holds the row key and never reaches callers.
const KEY_COLUMN: &str = "_row_key";
const LOCK_FILE: &str = ".workbook.lock";
const LOCK_POLL: Duration = Duration::from_millis(25);

/// A directory of `<table>.csv` files, one header row each.
///
/// Tables are loaded into memory on open and again whenever a lease is
/// taken. Every mutation rewrites the touched file through a temporary file
/// and a rename. Row keys are stored in a leading `_row_key` column so they
/// survive rows being deleted or reordered by hand.
pub struct CsvStore {
    dir: PathBuf,
    tables: MemoryStore,
    flush: Mutex<()>,
}

/// Exclusive `flock` on the workbook's lock file.
struct LockFile(File);

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.0) {
            warn!(error = %err, "failed to unlock csv workbook");
        }
    }
}

impl CsvStore {
    pub async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let tables = load_dir(dir).await?;
        info!(dir = %dir.display(), "opened csv workbook");
        Ok(Self {
            dir: dir.to_path_buf(),
            tables,
            flush: Mutex::new(()),
        })
    }

    fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    async fn reload(&self) -> Result<()> {
        let fresh = load_dir(&self.dir).await?;
        self.tables.adopt(fresh);
        Ok(())
    }

    async fn persist(&self, table: &str) -> Result<()> {
        let _guard = self.flush.lock().await;
        let Some((header, rows)) = self.tables.snapshot(table) else {
            return Err(Error::MissingTable(table.to_string()));
        };
        let bytes = render_table(&header, &rows)?;
        let path = self.path_for(table);
        let staging = path.with_extension("csv.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

async fn load_dir(dir: &Path) -> Result<MemoryStore> {
    let tables = MemoryStore::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let bytes = tokio::fs::read(&path).await?;
        let (header, rows) = parse_table(&bytes)?;
        debug!(table = name, rows = rows.len(), "loaded csv table");
        tables.load_table(name, header, rows);
    }
    Ok(tables)
}

type ParsedTable = (Vec<String>, Vec<(Option<RowKey>, Vec<String>)>);

fn parse_table(bytes: &[u8]) -> Result<ParsedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = reader.records();
    let mut header: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => Vec::new(),
    };
    let keyed = header.first().map(String::as_str) == Some(KEY_COLUMN);
    if keyed {
        header.remove(0);
    }
    let mut rows = Vec::new();
    for record in records {
        let mut cells: Vec<String> = record?.iter().map(str::to_string).collect();
        let key = if keyed && !cells.is_empty() {
            cells.remove(0).trim().parse::<RowKey>().ok()
        } else {
            None
        };
        rows.push((key, cells));
    }
    Ok((header, rows))
}

fn render_table(header: &[String], rows: &[StoredRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(std::iter::once(KEY_COLUMN).chain(header.iter().map(String::as_str)))?;
    for row in rows {
        let key = row.key.to_string();
        writer.write_record(
            std::iter::once(key.as_str()).chain(row.cells.iter().map(String::as_str)),
        )?;
    }
    writer.into_inner().map_err(|err| Error::Io(err.into_error()))
}

#[async_trait]
impl TabularStore for CsvStore {
    fn backend(&self) -> &'static str {
        "csv"
    }

    async fn lease(&self, wait: Duration) -> Result<StoreLease> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))
            .await?
            .into_std()
            .await;
        let deadline = Instant::now() + wait;
        let contended = fs2::lock_contended_error().raw_os_error();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if err.raw_os_error() == contended => {
                    if Instant::now() >= deadline {
                        warn!(dir = %self.dir.display(), "csv workbook lock wait expired");
                        return Err(Error::LockTimeout(wait));
                    }
                    sleep(LOCK_POLL).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        let lease = StoreLease::holding(LockFile(file));
        self.reload().await?;
        debug!(dir = %self.dir.display(), "took csv workbook lock");
        Ok(lease)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.tables.table_exists(table).await
    }

    async fn create_table(&self, table: &str, header: &[String]) -> Result<()> {
        if self.tables.table_exists(table).await? {
            return Ok(());
        }
        self.tables.create_table(table, header).await?;
        self.persist(table).await
    }

    async fn header(&self, table: &str) -> Result<Vec<String>> {
        self.tables.header(table).await
    }

    async fn set_header(&self, table: &str, header: &[String]) -> Result<()> {
        self.tables.set_header(table, header).await?;
        self.persist(table).await
    }

    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>> {
        self.tables.rows(table).await
    }

    async fn row(&self, table: &str, key: RowKey) -> Result<Option<StoredRow>> {
        self.tables.row(table, key).await
    }

    async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>> {
        let keys = self.tables.append_rows(table, rows).await?;
        self.persist(table).await?;
        Ok(keys)
    }

    async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>> {
        let applied = self.tables.update_rows(table, updates).await?;
        if !applied.is_empty() {
            self.persist(table).await?;
        }
        Ok(applied)
    }

    async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize> {
        let removed = self.tables.delete_rows(table, keys).await?;
        if removed > 0 {
            self.persist(table).await?;
        }
        Ok(removed)
    }
}
