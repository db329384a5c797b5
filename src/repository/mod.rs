//! Durable storage: the crawl ledger and the pipeline run audit trail.
//!
//! Both tables live in one SQLite database accessed through a shared r2d2
//! pool. The pool is created once and handed to [`CrawlLedger`] and
//! [`RunRepository`]; nothing in the crate keeps a global connection.

pub mod diesel_ledger;
pub mod diesel_models;
pub mod diesel_pool;
pub mod diesel_run;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use thiserror::Error;

use crate::models::LedgerState;
use diesel_pool::{create_diesel_pool_with, run_blocking, SqlitePool, SqlitePragmas};

pub use diesel_ledger::CrawlLedger;
pub use diesel_run::RunRepository;

/// DDL for the ledger database. Every statement is idempotent.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'discovered',
    discovered_at TEXT NOT NULL,
    last_fetched_at TEXT,
    http_status INTEGER,
    text_hash TEXT,
    minhash_signature TEXT,
    silver_id TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    etag TEXT,
    last_modified TEXT,
    content_length INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_ledger_source ON crawl_ledger(source);
CREATE INDEX IF NOT EXISTS idx_crawl_ledger_state ON crawl_ledger(state);
CREATE INDEX IF NOT EXISTS idx_crawl_ledger_source_state ON crawl_ledger(source, state);
CREATE INDEX IF NOT EXISTS idx_crawl_ledger_text_hash ON crawl_ledger(text_hash);
CREATE INDEX IF NOT EXISTS idx_crawl_ledger_minhash ON crawl_ledger(minhash_signature);
CREATE INDEX IF NOT EXISTS idx_crawl_ledger_silver_id ON crawl_ledger(silver_id);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    pipeline_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL,
    records_discovered INTEGER NOT NULL DEFAULT 0,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0,
    records_skipped INTEGER NOT NULL DEFAULT 0,
    records_duplicate INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    config_snapshot TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_pipeline_runs_source ON pipeline_runs(source, start_time);
"#;

/// Errors raised by the ledger and run repositories.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The operation referenced a URL the ledger has never seen.
    #[error("no ledger entry for {0}")]
    NotFound(String),

    /// The entry is not in a state that allows the requested transition.
    #[error("cannot move {url} from {from} to {to}")]
    InvalidTransition {
        url: String,
        from: LedgerState,
        to: LedgerState,
    },

    /// The run audit table has no row for this run id.
    #[error("no pipeline run {0}")]
    RunNotFound(String),

    /// A stored row could not be decoded.
    #[error("corrupt ledger row for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A durable write or transaction failed.
    #[error("ledger integrity error: {0}")]
    Integrity(#[from] diesel::result::Error),

    /// The connection pool could not be built.
    #[error("ledger pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

/// Open (creating if needed) the ledger database and return its pool.
pub async fn open_database(
    db_path: &Path,
    pool_size: u32,
    busy_timeout_ms: u64,
) -> Result<SqlitePool, LedgerError> {
    let url = db_path.display().to_string();
    let pool = create_diesel_pool_with(&url, pool_size, SqlitePragmas { busy_timeout_ms })?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create the ledger tables and indexes if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), LedgerError> {
    run_blocking(pool.clone(), |conn| conn.batch_execute(SCHEMA_SQL)).await?;
    Ok(())
}

/// Format a timestamp for storage.
///
/// Fixed width (microseconds, `Z` suffix) so text order matches time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, formatted for storage.
pub fn now_string() -> String {
    format_datetime(&Utc::now())
}

/// Parse a stored timestamp, falling back to the epoch on malformed input.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Parse an optional stored timestamp.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
