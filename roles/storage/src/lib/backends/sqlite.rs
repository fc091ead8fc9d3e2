//! SQLite storage backend.
//!
//! Shares and verified hashes live in two tables keyed by share hash. An
//! autoincrement id keeps the order they were first stored in, so a replay
//! hands the tracker parents before children. Forgets are plain deletes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use sharechain::ShareHash;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    error::{StorageError, StorageResult},
    share_store::ShareStore,
    types::{Replay, StorageHealth, StoredShare},
};

/// SQLite implementation of [`ShareStore`].
pub struct SqliteStorage {
    pool: Option<SqlitePool>,
    database_path: PathBuf,
    last_operation_timestamp: Option<u64>,
}

impl SqliteStorage {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            pool: None,
            database_path: database_path.into(),
            last_operation_timestamp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.database_path
    }

    fn get_pool(&self) -> StorageResult<&SqlitePool> {
        self.pool.as_ref().ok_or(StorageError::BackendUnavailable)
    }

    async fn create_tables(&self) -> StorageResult<()> {
        let pool = self.get_pool()?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE,
                share_type INTEGER NOT NULL,
                contents BLOB NOT NULL,
                time_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(backend_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verified_shares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash BLOB NOT NULL UNIQUE
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(backend_error)?;

        Ok(())
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        let pool = self.get_pool()?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .map_err(backend_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn backend_error(err: sqlx::Error) -> StorageError {
    StorageError::BackendError(err.to_string())
}

fn to_sql_int(value: u64, field: &str) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("{field} {value} does not fit a column")))
}

fn from_sql_int(value: i64, field: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::InvalidData(format!("negative {field} {value}")))
}

fn hash_column(row: &SqliteRow) -> StorageResult<ShareHash> {
    let bytes: Vec<u8> = row.try_get("hash").map_err(backend_error)?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StorageError::InvalidData("Invalid share hash length".to_string()))?;
    Ok(ShareHash::from_byte_array(array))
}

fn share_from_row(row: &SqliteRow) -> StorageResult<StoredShare> {
    Ok(StoredShare {
        hash: hash_column(row)?,
        share_type: from_sql_int(row.try_get("share_type").map_err(backend_error)?, "share type")?,
        contents: row.try_get("contents").map_err(backend_error)?,
        time_seen: from_sql_int(row.try_get("time_seen").map_err(backend_error)?, "time seen")?,
    })
}

#[async_trait]
impl ShareStore for SqliteStorage {
    async fn initialize(&mut self) -> StorageResult<()> {
        tracing::info!(path = %self.database_path.display(), "Initializing SQLite storage backend");

        if let Some(parent) = self
            .database_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::BackendError(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(true);
        self.pool = Some(
            SqlitePool::connect_with(options)
                .await
                .map_err(backend_error)?,
        );
        self.create_tables().await?;
        self.last_operation_timestamp = Some(crate::unix_now());

        let shares = self.count("shares").await?;
        let verified = self.count("verified_shares").await?;
        tracing::info!(
            shares = shares,
            verified = verified,
            "SQLite storage initialized"
        );
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::info!("SQLite storage closed");
        }
        Ok(())
    }

    async fn add_share(&mut self, share: &StoredShare) -> StorageResult<()> {
        let pool = self.get_pool()?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO shares (hash, share_type, contents, time_seen)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&share.hash.as_byte_array()[..])
        .bind(to_sql_int(share.share_type, "share type")?)
        .bind(&share.contents)
        .bind(to_sql_int(share.time_seen, "time seen")?)
        .execute(pool)
        .await
        .map_err(backend_error)?;
        self.last_operation_timestamp = Some(crate::unix_now());
        Ok(())
    }

    async fn add_verified_hash(&mut self, hash: ShareHash) -> StorageResult<()> {
        let pool = self.get_pool()?;
        sqlx::query("INSERT OR IGNORE INTO verified_shares (hash) VALUES (?1)")
            .bind(&hash.as_byte_array()[..])
            .execute(pool)
            .await
            .map_err(backend_error)?;
        self.last_operation_timestamp = Some(crate::unix_now());
        Ok(())
    }

    async fn forget_share(&mut self, hash: ShareHash) -> StorageResult<()> {
        let pool = self.get_pool()?;
        let mut tx = pool.begin().await.map_err(backend_error)?;
        sqlx::query("DELETE FROM verified_shares WHERE hash = ?1")
            .bind(&hash.as_byte_array()[..])
            .execute(&mut *tx)
            .await
            .map_err(backend_error)?;
        sqlx::query("DELETE FROM shares WHERE hash = ?1")
            .bind(&hash.as_byte_array()[..])
            .execute(&mut *tx)
            .await
            .map_err(backend_error)?;
        tx.commit().await.map_err(backend_error)?;
        self.last_operation_timestamp = Some(crate::unix_now());
        Ok(())
    }

    async fn forget_verified_share(&mut self, hash: ShareHash) -> StorageResult<()> {
        let pool = self.get_pool()?;
        sqlx::query("DELETE FROM verified_shares WHERE hash = ?1")
            .bind(&hash.as_byte_array()[..])
            .execute(pool)
            .await
            .map_err(backend_error)?;
        self.last_operation_timestamp = Some(crate::unix_now());
        Ok(())
    }

    async fn replay(&self) -> StorageResult<Replay> {
        let pool = self.get_pool()?;

        let share_rows = sqlx::query(
            "SELECT hash, share_type, contents, time_seen FROM shares ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .map_err(backend_error)?;
        let verified_rows = sqlx::query("SELECT hash FROM verified_shares ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(backend_error)?;

        Ok(Replay {
            shares: share_rows
                .iter()
                .map(share_from_row)
                .collect::<StorageResult<_>>()?,
            verified: verified_rows
                .iter()
                .map(hash_column)
                .collect::<StorageResult<_>>()?,
        })
    }

    async fn health_check(&self) -> StorageResult<StorageHealth> {
        let Some(pool) = &self.pool else {
            return Ok(StorageHealth {
                is_healthy: false,
                backend_type: "sqlite".to_string(),
                share_count: 0,
                verified_count: 0,
                last_operation_timestamp: self.last_operation_timestamp,
                error_message: Some("Not initialized".to_string()),
            });
        };
        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
            Ok(_) => Ok(StorageHealth {
                is_healthy: true,
                backend_type: "sqlite".to_string(),
                share_count: self.count("shares").await?,
                verified_count: self.count("verified_shares").await?,
                last_operation_timestamp: self.last_operation_timestamp,
                error_message: None,
            }),
            Err(e) => Ok(StorageHealth {
                is_healthy: false,
                backend_type: "sqlite".to_string(),
                share_count: 0,
                verified_count: 0,
                last_operation_timestamp: self.last_operation_timestamp,
                error_message: Some(e.to_string()),
            }),
        }
    }
}
