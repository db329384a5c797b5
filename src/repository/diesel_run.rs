//! Diesel-based pipeline run audit trail.

use diesel::prelude::*;

use super::diesel_models::{NewPipelineRun, PipelineRunRecord};
use super::diesel_pool::{run_blocking, SqlitePool};
use super::{format_datetime, parse_datetime, parse_datetime_opt, LedgerError};
use crate::models::{PipelineRun, RunStatus};
use crate::schema::pipeline_runs;

impl TryFrom<PipelineRunRecord> for PipelineRun {
    type Error = LedgerError;

    fn try_from(record: PipelineRunRecord) -> Result<Self, Self::Error> {
        let status = RunStatus::from_str(&record.status).ok_or_else(|| LedgerError::Corrupt {
            key: record.run_id.clone(),
            reason: format!("unknown run status '{}'", record.status),
        })?;
        let count = |v: i64| u64::try_from(v).unwrap_or(0);

        Ok(PipelineRun {
            status,
            start_time: parse_datetime(&record.start_time),
            end_time: parse_datetime_opt(record.end_time),
            records_discovered: count(record.records_discovered),
            records_processed: count(record.records_processed),
            records_failed: count(record.records_failed),
            records_skipped: count(record.records_skipped),
            records_duplicate: count(record.records_duplicate),
            errors: serde_json::from_str(&record.errors).unwrap_or_default(),
            config_snapshot: serde_json::from_str(&record.config_snapshot)
                .unwrap_or(serde_json::Value::Null),
            run_id: record.run_id,
            source: record.source,
            pipeline_type: record.pipeline_type,
        })
    }
}

/// Owned column values of a run, borrowed into a [`NewPipelineRun`].
struct RunRow {
    run_id: String,
    source: String,
    pipeline_type: String,
    start_time: String,
    end_time: Option<String>,
    status: &'static str,
    counts: [i64; 5],
    errors: String,
    config_snapshot: String,
}

impl RunRow {
    fn from_run(run: &PipelineRun) -> Self {
        let count = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        Self {
            run_id: run.run_id.clone(),
            source: run.source.clone(),
            pipeline_type: run.pipeline_type.clone(),
            start_time: format_datetime(&run.start_time),
            end_time: run.end_time.as_ref().map(format_datetime),
            status: run.status.as_str(),
            counts: [
                count(run.records_discovered),
                count(run.records_processed),
                count(run.records_failed),
                count(run.records_skipped),
                count(run.records_duplicate),
            ],
            errors: serde_json::to_string(&run.errors).unwrap_or_else(|_| "[]".to_string()),
            config_snapshot: serde_json::to_string(&run.config_snapshot)
                .unwrap_or_else(|_| "{}".to_string()),
        }
    }

    fn as_insertable(&self) -> NewPipelineRun<'_> {
        NewPipelineRun {
            run_id: &self.run_id,
            source: &self.source,
            pipeline_type: &self.pipeline_type,
            start_time: &self.start_time,
            end_time: self.end_time.as_deref(),
            status: self.status,
            records_discovered: self.counts[0],
            records_processed: self.counts[1],
            records_failed: self.counts[2],
            records_skipped: self.counts[3],
            records_duplicate: self.counts[4],
            errors: &self.errors,
            config_snapshot: &self.config_snapshot,
        }
    }
}

/// Persistence for [`PipelineRun`] audit records.
#[derive(Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new run record.
    pub async fn create(&self, run: &PipelineRun) -> Result<(), LedgerError> {
        let row = RunRow::from_run(run);

        run_blocking(self.pool.clone(), move |conn| -> Result<(), LedgerError> {
            diesel::insert_into(pipeline_runs::table)
                .values(&row.as_insertable())
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Overwrite a run record with the run's current counters and status.
    pub async fn update(&self, run: &PipelineRun) -> Result<(), LedgerError> {
        let row = RunRow::from_run(run);

        run_blocking(self.pool.clone(), move |conn| -> Result<(), LedgerError> {
            let rows = diesel::update(pipeline_runs::table.find(&row.run_id))
                .set(&row.as_insertable())
                .execute(conn)?;
            if rows == 0 {
                return Err(LedgerError::RunNotFound(row.run_id.clone()));
            }
            Ok(())
        })
        .await
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<PipelineRun>, LedgerError> {
        let run_id = run_id.to_string();

        let record = run_blocking(self.pool.clone(), move |conn| {
            pipeline_runs::table
                .find(&run_id)
                .select(PipelineRunRecord::as_select())
                .first(conn)
                .optional()
        })
        .await?;

        record.map(PipelineRun::try_from).transpose()
    }

    /// Most recent runs for a source, newest first.
    pub async fn recent(&self, source: &str, limit: usize) -> Result<Vec<PipelineRun>, LedgerError> {
        let source = source.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let records = run_blocking(self.pool.clone(), move |conn| {
            pipeline_runs::table
                .filter(pipeline_runs::source.eq(&source))
                .order(pipeline_runs::start_time.desc())
                .limit(limit)
                .select(PipelineRunRecord::as_select())
                .load(conn)
        })
        .await?;

        records.into_iter().map(PipelineRun::try_from).collect()
    }
}
