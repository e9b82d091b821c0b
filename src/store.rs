//! Persistent idempotency store
//!
//! Maps message UIDs to [`ProcessingRecord`]s in a SQLite database. Records
//! are isolated per [`Namespace`], which is derived from the connection and
//! mailbox parameters of a run, so scan and learn state for different
//! mailboxes never collide. Concurrent use of one namespace by two processes
//! is not supported; SQLite locking is the only protection.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::errors::{AppError, AppResult};
use crate::models::ProcessingRecord;

/// Database file name inside the data directory
pub const DB_FILENAME: &str = "records.db";

/// Dedup isolation unit
///
/// SHA-256 over the length-prefixed parameter tuple, so adjacent fields
/// cannot run together (`("ab", "c")` and `("a", "bc")` differ).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Derive the namespace for an operation on a connection and mailbox set
    ///
    /// Unset optional mailboxes should be passed as `""` so that the tuple
    /// keeps a fixed arity per operation.
    pub fn derive(operation: &str, host: &str, port: u16, user: &str, mailboxes: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        let port = port.to_string();
        for field in [operation, host, port.as_str(), user]
            .into_iter()
            .chain(mailboxes.iter().copied())
        {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store handle bound to one namespace
pub struct RecordStore {
    pool: SqlitePool,
    namespace: Namespace,
}

impl RecordStore {
    /// Open (creating if missing) the database at `db_path`
    ///
    /// # Errors
    ///
    /// - `Store` if the directory, database or schema cannot be created
    pub async fn open(db_path: &Path, namespace: Namespace) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Store(format!("cannot open {}: {e}", db_path.display())))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processing_records (
                namespace TEXT NOT NULL,
                uid INTEGER NOT NULL,
                processed_at DATETIME NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (namespace, uid)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, namespace })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Look up the record for `uid`
    ///
    /// A stored record that no longer decodes is logged and reported as
    /// absent, so the message is processed again instead of blocking the run.
    pub async fn get(&self, uid: u32) -> AppResult<Option<ProcessingRecord>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"SELECT record FROM processing_records WHERE namespace = ?1 AND uid = ?2"#,
        )
        .bind(self.namespace.as_str())
        .bind(i64::from(uid))
        .fetch_optional(&self.pool)
        .await?;

        let Some((raw,)) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<ProcessingRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(
                    target: "store",
                    uid,
                    error = %err,
                    "stored record does not decode; treating message as unprocessed"
                );
                Ok(None)
            }
        }
    }

    /// Write the record for `record.id`, replacing any previous one
    ///
    /// Callers are expected to check [`RecordStore::get`] first.
    pub async fn put(&self, record: &ProcessingRecord) -> AppResult<()> {
        let raw = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(format!("cannot encode record: {e}")))?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO processing_records (namespace, uid, processed_at, record)
                VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(self.namespace.as_str())
        .bind(i64::from(record.id))
        .bind(record.processed_at)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete every record in this namespace, returning how many were removed
    pub async fn reset(&self) -> AppResult<u64> {
        let affected = sqlx::query(r#"DELETE FROM processing_records WHERE namespace = ?1"#)
            .bind(self.namespace.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    /// Number of records in this namespace
    pub async fn count(&self) -> AppResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM processing_records WHERE namespace = ?1"#)
                .bind(self.namespace.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Flush and close the underlying pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    async fn put_raw(&self, uid: u32, raw: &str) -> AppResult<()> {
        sqlx::query(
            r#"INSERT OR REPLACE INTO processing_records (namespace, uid, processed_at, record)
                VALUES (?1, ?2, CURRENT_TIMESTAMP, ?3)"#,
        )
        .bind(self.namespace.as_str())
        .bind(i64::from(uid))
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
