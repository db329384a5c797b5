//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! For SQLite, operations are wrapped in spawn_blocking since diesel-async
//! only supports Postgres/MySQL.

use diesel::prelude::*;

use crate::schema;

/// Ledger row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::crawl_ledger)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LedgerRecord {
    pub id: i32,
    pub url: String,
    pub source: String,
    pub state: String,
    pub discovered_at: String,
    pub last_fetched_at: Option<String>,
    pub http_status: Option<i32>,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    pub silver_id: Option<String>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<i64>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New ledger row for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::crawl_ledger)]
pub struct NewLedgerRecord<'a> {
    pub url: &'a str,
    pub source: &'a str,
    pub state: &'a str,
    pub discovered_at: &'a str,
    pub retry_count: i32,
    pub metadata: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Signature projection used by the near-duplicate scan.
#[derive(Queryable, Debug, Clone)]
pub struct SignatureRow {
    pub id: i32,
    pub url: String,
    pub discovered_at: String,
    pub minhash_signature: String,
}

/// Pipeline run row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::pipeline_runs)]
#[diesel(primary_key(run_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PipelineRunRecord {
    pub run_id: String,
    pub source: String,
    pub pipeline_type: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: String,
    pub records_discovered: i64,
    pub records_processed: i64,
    pub records_failed: i64,
    pub records_skipped: i64,
    pub records_duplicate: i64,
    pub errors: String,
    pub config_snapshot: String,
}

/// Pipeline run row for insertion and full-row updates.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::pipeline_runs)]
#[diesel(primary_key(run_id))]
#[diesel(treat_none_as_null = true)]
pub struct NewPipelineRun<'a> {
    pub run_id: &'a str,
    pub source: &'a str,
    pub pipeline_type: &'a str,
    pub start_time: &'a str,
    pub end_time: Option<&'a str>,
    pub status: &'a str,
    pub records_discovered: i64,
    pub records_processed: i64,
    pub records_failed: i64,
    pub records_skipped: i64,
    pub records_duplicate: i64,
    pub errors: &'a str,
    pub config_snapshot: &'a str,
}
