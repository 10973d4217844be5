//! SQLite implementation of the queuectl job store.
//!
//! A single database file is the only thing producers, workers, and the
//! admin CLI share. This crate provides a production-ready [`JobStore`]
//! backed by that file.
//!
//! # Features
//!
//! - Atomic claiming via a conditional `UPDATE ... RETURNING` (never
//!   select-then-update)
//! - Priority + aging scheduling: `(priority + waiting_time) DESC`, oldest
//!   first on ties
//! - Exponential backoff retry routing with a dead-letter queue
//! - Lease-based reclaim of rows orphaned by killed workers
//! - WAL journal mode with a 30 s busy timeout so contended writes retry
//!   instead of failing
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id TEXT PRIMARY KEY,
//!     command TEXT NOT NULL,
//!     state TEXT NOT NULL DEFAULT 'pending',
//!
//!     -- Retry bookkeeping
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     timeout INTEGER NOT NULL DEFAULT 20,
//!     backoff_base INTEGER NOT NULL DEFAULT 2,
//!
//!     -- Scheduling
//!     priority INTEGER NOT NULL DEFAULT 5,
//!     waiting_time INTEGER NOT NULL DEFAULT 0,
//!     next_retry_at TEXT,
//!
//!     -- Worker tracking
//!     locked_by TEXT,
//!     locked_at TEXT,
//!
//!     -- Last-attempt results
//!     output TEXT,
//!     error_message TEXT,
//!     execution_time REAL,
//!
//!     -- Timestamps (RFC 3339 UTC)
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//!
//! CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT NOT NULL);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl_job_sqlite::SqliteJobStore;
//! use queuectl_core::{JobStore, NewJob};
//!
//! let store = SqliteJobStore::open("~/.queuectl/data/queuectl.db").await?;
//! store.enqueue(NewJob::new("greet", "echo Hello")).await?;
//! let job = store.acquire("worker-1").await?;
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use queuectl_core::{
    Job, JobState, JobStore, NewJob, QueueError, QueueStats, RetryDecision, DEFAULT_BACKOFF_BASE,
    DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECS, LEASE_MULTIPLIER,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};


#[cfg(test)]
mod worker_tests;

/// Contended writes retry transparently for this long before surfacing an
/// error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    timeout INTEGER NOT NULL DEFAULT 20,
    backoff_base INTEGER NOT NULL DEFAULT 2,
    priority INTEGER NOT NULL DEFAULT 5,
    waiting_time INTEGER NOT NULL DEFAULT 0,
    next_retry_at TEXT,
    locked_by TEXT,
    locked_at TEXT,
    output TEXT,
    error_message TEXT,
    execution_time REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs (state, locked_by);

CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite job store.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if necessary) the database at `db_path` and bring the
    /// schema up to date.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("initializing schema")?;

        // Additive migrations for databases created before these columns
        // existed.
        let columns: Vec<String> = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        if !columns.iter().any(|c| c == "waiting_time") {
            tracing::debug!("adding jobs.waiting_time column");
            sqlx::query("ALTER TABLE jobs ADD COLUMN waiting_time INTEGER NOT NULL DEFAULT 0")
                .execute(&self.pool)
                .await?;
        }
        if !columns.iter().any(|c| c == "execution_time") {
            tracing::debug!("adding jobs.execution_time column");
            sqlx::query("ALTER TABLE jobs ADD COLUMN execution_time REAL")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

/// Raw row shape; `state` is decoded separately so an unknown value is an
/// explicit error rather than a panic.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    timeout: i64,
    backoff_base: i64,
    priority: i64,
    waiting_time: i64,
    next_retry_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    output: Option<String>,
    error_message: Option<String>,
    execution_time: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            state: row.state.parse()?,
            id: row.id,
            command: row.command,
            attempts: row.attempts,
            max_retries: row.max_retries,
            timeout: row.timeout,
            backoff_base: row.backoff_base,
            priority: row.priority,
            waiting_time: row.waiting_time,
            next_retry_at: row.next_retry_at,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            output: row.output,
            error_message: row.error_message,
            execution_time: row.execution_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Read an integer default from the config table, falling back when the key
/// is absent or unparseable.
async fn config_default(pool: &SqlitePool, key: &str, fallback: i64) -> Result<i64> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(match value {
        Some(raw) => match raw.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(key, value = %raw, "config value is not an integer, using fallback");
                fallback
            }
        },
        None => fallback,
    })
}

fn validate(job: &NewJob, max_retries: i64, timeout: i64, backoff_base: i64) -> Result<()> {
    let reason = if job.id.trim().is_empty() {
        Some("id must not be empty")
    } else if job.command.trim().is_empty() {
        Some("command must not be empty")
    } else if max_retries < 1 {
        Some("max_retries must be at least 1")
    } else if timeout < 1 {
        Some("timeout must be at least 1 second")
    } else if backoff_base < 2 {
        Some("backoff_base must be at least 2")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(QueueError::Invalid {
            reason: reason.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<()> {
        // Defaults are resolved before the write transaction so it opens
        // with a write statement and never has to upgrade a read snapshot.
        let max_retries = match job.max_retries {
            Some(v) => v,
            None => config_default(&self.pool, "max-retries", DEFAULT_MAX_RETRIES).await?,
        };
        let backoff_base = match job.backoff_base {
            Some(v) => v,
            None => config_default(&self.pool, "backoff-base", DEFAULT_BACKOFF_BASE).await?,
        };
        let timeout = job.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let priority = job.priority.unwrap_or(DEFAULT_PRIORITY);

        validate(&job, max_retries, timeout, backoff_base)?;

        let mut tx = self.pool.begin().await?;

        // Aging: every job still waiting has now outlived one more
        // newcomer. Rolled back with the insert on failure.
        sqlx::query(
            r#"
            UPDATE jobs
            SET waiting_time = waiting_time + 1
            WHERE state IN ('pending', 'failed') AND locked_by IS NULL
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, timeout,
                              backoff_base, priority, waiting_time, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5, ?6, 0, ?7, ?7)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(max_retries)
        .bind(timeout)
        .bind(backoff_base)
        .bind(priority)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(QueueError::DuplicateId { id: job.id }.into());
            }
            return Err(e).context("inserting job");
        }

        tx.commit().await?;
        tracing::debug!(job_id = %job.id, priority, "job enqueued");
        Ok(())
    }

    /// Claim the highest-ranked eligible job.
    ///
    /// Selection and claim happen in one conditional UPDATE; the outer
    /// predicate re-checks claimability so a row selected moments before a
    /// competing claim is simply not updated and the caller sees `None`.
    async fn acquire(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'processing',
                locked_by = ?1,
                locked_at = ?2,
                updated_at = ?2
            WHERE id = (
                SELECT id
                FROM jobs
                WHERE (locked_by IS NULL
                       AND (state = 'pending'
                            OR (state = 'failed'
                                AND julianday(next_retry_at) <= julianday(?2))))
                   OR (state = 'processing'
                       AND locked_at IS NOT NULL
                       AND (julianday(?2) - julianday(locked_at)) * 86400.0 >= ?3 * timeout)
                ORDER BY (priority + waiting_time) DESC, created_at ASC
                LIMIT 1
            )
            AND (locked_by IS NULL
                 OR (state = 'processing'
                     AND locked_at IS NOT NULL
                     AND (julianday(?2) - julianday(locked_at)) * 86400.0 >= ?3 * timeout))
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(LEASE_MULTIPLIER)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job: Job = row.try_into()?;
                tracing::debug!(job_id = %job.id, worker_id, "job acquired");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: &str, output: &str, execution_time: f64) -> Result<()> {
        // The state guard both counts the attempt exactly once and makes
        // repeated calls no-ops.
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                attempts = attempts + 1,
                output = ?1,
                execution_time = ?2,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = ?3
            WHERE id = ?4 AND state = 'processing'
            "#,
        )
        .bind(output)
        .bind(execution_time)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Route a failed attempt.
    ///
    /// Optimistic: the decision is computed from a snapshot and applied
    /// with an `attempts`-guarded update. A concurrent mutation of the same
    /// row makes the guard miss and the loop re-reads.
    async fn fail(&self, job_id: &str, error_message: &str, execution_time: f64) -> Result<()> {
        loop {
            let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else {
                return Ok(());
            };
            let job: Job = row.try_into()?;

            let now = Utc::now();
            let applied = match RetryDecision::decide(
                job.attempts,
                job.max_retries,
                job.backoff_base,
                now,
            ) {
                RetryDecision::Dead { attempts } => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET state = 'dead',
                            attempts = ?1,
                            error_message = ?2,
                            execution_time = ?3,
                            locked_by = NULL,
                            locked_at = NULL,
                            next_retry_at = NULL,
                            updated_at = ?4
                        WHERE id = ?5 AND attempts = ?6
                        "#,
                    )
                    .bind(attempts)
                    .bind(error_message)
                    .bind(execution_time)
                    .bind(now)
                    .bind(job_id)
                    .bind(job.attempts)
                    .execute(&self.pool)
                    .await?
                }
                RetryDecision::Retry {
                    attempts,
                    next_retry_at,
                } => {
                    sqlx::query(
                        r#"
                        UPDATE jobs
                        SET state = 'failed',
                            attempts = ?1,
                            error_message = ?2,
                            execution_time = ?3,
                            locked_by = NULL,
                            locked_at = NULL,
                            next_retry_at = ?4,
                            updated_at = ?5
                        WHERE id = ?6 AND attempts = ?7
                        "#,
                    )
                    .bind(attempts)
                    .bind(error_message)
                    .bind(execution_time)
                    .bind(next_retry_at)
                    .bind(now)
                    .bind(job_id)
                    .bind(job.attempts)
                    .execute(&self.pool)
                    .await?
                }
            };

            if applied.rows_affected() > 0 {
                tracing::debug!(job_id, attempts = job.attempts + 1, "failed attempt recorded");
                return Ok(());
            }
            tracing::debug!(job_id, "lost a routing race, re-reading");
        }
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose().map_err(Into::into)
    }

    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at DESC",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(|row| Job::try_from(row).map_err(Into::into))
            .collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE state = 'pending') AS pending,
                COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'failed') AS failed,
                COUNT(*) FILTER (WHERE state = 'dead') AS dead
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: row.get("total"),
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            dead: row.get("dead"),
        })
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn dlq_retry(&self, job_id: &str) -> Result<()> {
        // The state guard makes the reset atomic; a miss is diagnosed
        // afterwards so the caller learns why.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                error_message = NULL,
                next_retry_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = ?1
            WHERE id = ?2 AND state = 'dead'
            "#,
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let state: Option<String> = sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            return Err(match state {
                None => QueueError::NotFound {
                    id: job_id.to_string(),
                },
                Some(raw) => QueueError::NotDead {
                    id: job_id.to_string(),
                    state: raw.parse()?,
                },
            }
            .into());
        }

        tracing::debug!(job_id, "dead job reset to pending");
        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
