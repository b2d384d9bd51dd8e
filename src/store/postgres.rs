use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, PgPool};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{pad_to, write_cell, RowKey, RowUpdate, StoreLease, StoredRow, TabularStore};
use crate::error::{Error, Result};

/// Advisory lock id shared by every desk process on one database.
const WORKBOOK_LOCK: i64 = 0x5349_474e_4445_534b;
const LOCK_POLL: Duration = Duration::from_millis(100);

/// Tables kept in Postgres: headers in `workbook_tables`, rows as JSONB
/// cell arrays in `workbook_rows` keyed by a BIGSERIAL.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("connected to postgres workbook");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn width(&self, table: &str) -> Result<usize> {
        Ok(self.header(table).await?.len())
    }
}

/// Session-level advisory lock, held on a connection taken out of the pool.
/// Closing the connection releases the lock.
struct AdvisoryLock {
    conn: Option<PgConnection>,
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(WORKBOOK_LOCK)
                    .execute(&mut conn)
                    .await
                {
                    warn!(error = %err, "failed to release workbook advisory lock");
                }
                let _ = conn.close().await;
            });
        }
    }
}

fn to_key(raw: i64) -> RowKey {
    raw.max(0) as RowKey
}

fn to_raw(key: RowKey) -> i64 {
    i64::try_from(key).unwrap_or(i64::MAX)
}

#[async_trait]
impl TabularStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn lease(&self, wait: Duration) -> Result<StoreLease> {
        let mut conn = self.pool.acquire().await?.detach();
        let deadline = Instant::now() + wait;
        loop {
            let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
                .bind(WORKBOOK_LOCK)
                .fetch_one(&mut conn)
                .await?;
            if locked {
                break;
            }
            if Instant::now() >= deadline {
                warn!("workbook advisory lock wait expired");
                return Err(Error::LockTimeout(wait));
            }
            sleep(LOCK_POLL).await;
        }
        debug!("took workbook advisory lock");
        Ok(StoreLease::holding(AdvisoryLock { conn: Some(conn) }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM workbook_tables WHERE name = $1")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn create_table(&self, table: &str, header: &[String]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workbook_tables (name, header)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(Json(header.to_vec()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn header(&self, table: &str) -> Result<Vec<String>> {
        let found: Option<(Json<Vec<String>>,)> =
            sqlx::query_as("SELECT header FROM workbook_tables WHERE name = $1")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        found
            .map(|(header,)| header.0)
            .ok_or_else(|| Error::MissingTable(table.to_string()))
    }

    async fn set_header(&self, table: &str, header: &[String]) -> Result<()> {
        let result = sqlx::query("UPDATE workbook_tables SET header = $2 WHERE name = $1")
            .bind(table)
            .bind(Json(header.to_vec()))
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::MissingTable(table.to_string()));
        }
        Ok(())
    }

    async fn rows(&self, table: &str) -> Result<Vec<StoredRow>> {
        let width = self.width(table).await?;
        let records: Vec<(i64, Json<Vec<String>>)> = sqlx::query_as(
            "SELECT row_key, cells FROM workbook_rows WHERE table_name = $1 ORDER BY row_key",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|(key, cells)| StoredRow {
                key: to_key(key),
                cells: pad_to(cells.0, width),
            })
            .collect())
    }

    async fn row(&self, table: &str, key: RowKey) -> Result<Option<StoredRow>> {
        let width = self.width(table).await?;
        let record: Option<(i64, Json<Vec<String>>)> = sqlx::query_as(
            "SELECT row_key, cells FROM workbook_rows WHERE table_name = $1 AND row_key = $2",
        )
        .bind(table)
        .bind(to_raw(key))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|(key, cells)| StoredRow {
            key: to_key(key),
            cells: pad_to(cells.0, width),
        }))
    }

    async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>> {
        if !self.table_exists(table).await? {
            return Err(Error::MissingTable(table.to_string()));
        }
        let mut tx = self.pool.begin().await?;
        let mut keys = Vec::with_capacity(rows.len());
        for cells in rows {
            let (key,): (i64,) = sqlx::query_as(
                "INSERT INTO workbook_rows (table_name, cells) VALUES ($1, $2) RETURNING row_key",
            )
            .bind(table)
            .bind(Json(cells))
            .fetch_one(&mut *tx)
            .await?;
            keys.push(to_key(key));
        }
        tx.commit().await?;
        Ok(keys)
    }

    async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>> {
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::new();
        for update in updates {
            let current: Option<(Json<Vec<String>>,)> = sqlx::query_as(
                "SELECT cells FROM workbook_rows WHERE table_name = $1 AND row_key = $2 FOR UPDATE",
            )
            .bind(table)
            .bind(to_raw(update.key))
            .fetch_optional(&mut *tx)
            .await?;
            let Some((Json(mut cells),)) = current else {
                continue;
            };
            for (column, value) in &update.cells {
                write_cell(&mut cells, *column, value.clone());
            }
            sqlx::query("UPDATE workbook_rows SET cells = $3 WHERE table_name = $1 AND row_key = $2")
                .bind(table)
                .bind(to_raw(update.key))
                .bind(Json(cells))
                .execute(&mut *tx)
                .await?;
            applied.push(update.key);
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize> {
        let raw: Vec<i64> = keys.iter().copied().map(to_raw).collect();
        let result =
            sqlx::query("DELETE FROM workbook_rows WHERE table_name = $1 AND row_key = ANY($2)")
                .bind(table)
                .bind(raw)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }
}
