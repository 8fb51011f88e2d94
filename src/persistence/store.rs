//! SQLite-based persistence store
//!
//! One database holds run history, the artifact store and the cache index.

use crate::cache::CacheKey;
use crate::core::{error::StoreError, state::RunStatus};
use crate::persistence::{PersistenceBackend, RunSummary};
use crate::store::{ArtifactId, ArtifactStore, CacheIndex, OutputArtifacts, TypedValue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`; `:memory:` is
    /// accepted for ephemeral use
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:";
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // every in-memory connection is its own database, so keep exactly one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Default database location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orchestra")
            .join("orchestra.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                succeeded INTEGER NOT NULL DEFAULT 0,
                cached INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                total_nodes INTEGER NOT NULL DEFAULT 0,
                fatal_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                ty TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                outputs TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.get("status");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline: row.get("pipeline"),
            status: RunStatus::parse(&status)
                .with_context(|| format!("Unknown run status '{}'", status))?,
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            succeeded: row.get::<i64, _>("succeeded") as usize,
            cached: row.get::<i64, _>("cached") as usize,
            failed: row.get::<i64, _>("failed") as usize,
            total_nodes: row.get::<i64, _>("total_nodes") as usize,
            fatal_error: row.get("fatal_error"),
        })
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn serialization(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

#[async_trait]
impl PersistenceBackend for SqliteStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline, status, started_at, finished_at, succeeded, cached, failed, total_nodes, fatal_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline)
        .bind(run.status.as_str())
        .bind(Self::to_naive(run.started_at))
        .bind(run.finished_at.map(Self::to_naive))
        .bind(run.succeeded as i64)
        .bind(run.cached as i64)
        .bind(run.failed as i64)
        .bind(run.total_nodes as i64)
        .bind(&run.fatal_error)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(
            r#"
            SELECT id, pipeline, status, started_at, finished_at, succeeded, cached, failed, total_nodes, fatal_error
            FROM runs
            WHERE id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_runs(&self, pipeline: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pipeline, status, started_at, finished_at, succeeded, cached, failed, total_nodes, fatal_error
            FROM runs
            WHERE pipeline = ?1
            ORDER BY started_at DESC
            "#,
        )
        .bind(pipeline)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline
            FROM runs
            ORDER BY pipeline ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline")).collect())
    }
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn put(&self, value: TypedValue) -> Result<ArtifactId, StoreError> {
        let id = ArtifactId::for_value(&value);
        let json = serde_json::to_string(&value.value).map_err(serialization)?;

        sqlx::query("INSERT OR IGNORE INTO artifacts (id, ty, value) VALUES (?1, ?2, ?3)")
            .bind(id.as_str())
            .bind(&value.ty)
            .bind(json)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(id)
    }

    async fn get(&self, id: &ArtifactId) -> Result<TypedValue, StoreError> {
        let row = sqlx::query("SELECT ty, value FROM artifacts WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let value: String = row.get("value");
        Ok(TypedValue {
            ty: row.get("ty"),
            value: serde_json::from_str(&value).map_err(serialization)?,
        })
    }

    async fn contains(&self, id: &ArtifactId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM artifacts WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CacheIndex for SqliteStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<OutputArtifacts>, StoreError> {
        let row = sqlx::query("SELECT outputs FROM cache_entries WHERE key = ?1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match row {
            Some(row) => {
                let outputs: String = row.get("outputs");
                Ok(Some(serde_json::from_str(&outputs).map_err(serialization)?))
            }
            None => Ok(None),
        }
    }

    async fn record(&self, key: &CacheKey, outputs: &OutputArtifacts) -> Result<(), StoreError> {
        let json = serde_json::to_string(outputs).map_err(serialization)?;
        sqlx::query("INSERT OR REPLACE INTO cache_entries (key, outputs) VALUES (?1, ?2)")
            .bind(key.as_str())
            .bind(json)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
