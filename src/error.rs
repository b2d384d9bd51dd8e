//! Error taxonomy for desk operations.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed caller input (blank id, date, label, ...)
    #[error("{0}")]
    Validation(String),

    /// Referenced session, row or record does not exist
    #[error("{0}")]
    NotFound(String),

    /// The document lock could not be taken within the wait budget
    #[error("Timed out after {:?} waiting for the document lock", .0)]
    LockTimeout(Duration),

    /// A logical column could not be resolved even after header repair
    #[error("Column '{column}' is unavailable in table '{table}'")]
    ColumnUnavailable { table: String, column: String },

    /// A table the operation writes to does not exist (misconfiguration)
    #[error("Table '{0}' not found")]
    MissingTable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn column(table: &str, column: &str) -> Self {
        Self::ColumnUnavailable {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// Fatal errors escape the operation boundary instead of becoming `{ok:false}`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTable(_) | Self::Config(_))
    }
}
