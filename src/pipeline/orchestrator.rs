//! Drives one source through discover, fetch and process.
//!
//! Every step is a ledger transition, so a run that stops for any reason
//! (crash, cancellation, fatal error) is resumed by simply running again:
//! stale `fetching`/`fetched` entries are reset at start, processed ones are
//! skipped during discovery.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::collaborators::{
    MetricsCollector, PipelineStage, SilverWriter, StageMetrics, TracingMetricsCollector,
};
use super::{CancelFlag, PipelineConfig, PipelineError};
use crate::dedup::{ContentFingerprints, DedupEngine};
use crate::models::{
    ConditionalHeaders, FetchResult, LedgerEntry, LedgerState, PipelineRun, RawRecord, RunStatus,
};
use crate::repository::{CrawlLedger, LedgerError, RunRepository};
use crate::sources::{RateLimiter, SourceAdapter};

/// How the stages ended.
enum Outcome {
    Finished,
    Cancelled,
}

/// A fetched record waiting for the process stage.
struct FetchedRecord {
    index: usize,
    url: String,
    record: RawRecord,
    fingerprints: ContentFingerprints,
}

enum FetchOutcome {
    Fetched(Box<FetchedRecord>),
    /// 304 on a forced refetch; the previous outcome was put back.
    Unchanged,
    Failed { url: String, message: String },
    Cancelled,
}

pub struct Orchestrator {
    ledger: CrawlLedger,
    runs: RunRepository,
    engine: DedupEngine,
    writer: Arc<dyn SilverWriter>,
    metrics: Arc<dyn MetricsCollector>,
    rate_limiter: RateLimiter,
    config: PipelineConfig,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        ledger: CrawlLedger,
        runs: RunRepository,
        engine: DedupEngine,
        writer: Arc<dyn SilverWriter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ledger,
            runs,
            engine,
            writer,
            metrics: Arc::new(TracingMetricsCollector),
            rate_limiter: RateLimiter::new(),
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share a rate limiter with other orchestrators hitting the same hosts.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling runs of this orchestrator from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &DedupEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &CrawlLedger {
        &self.ledger
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Run one source to completion.
    ///
    /// With `force`, URLs that an earlier run already processed or skipped
    /// are reset and go through fetch and dedup again, unless the listing's
    /// validators show them unchanged. The refetch is conditional; a 304
    /// keeps the earlier outcome.
    ///
    /// Per-record failures are counted on the returned run. Ledger failures
    /// abort the run and come back as [`PipelineError::Aborted`] carrying the
    /// `failed` run record.
    pub async fn run(
        &self,
        adapter: &dyn SourceAdapter,
        force: bool,
    ) -> Result<PipelineRun, PipelineError> {
        let source = adapter.source().to_string();
        let snapshot = json!({
            "source": adapter.config_snapshot(),
            "pipeline": self.config,
            "dedup": self.engine.config(),
            "force": force,
        });
        let mut run = PipelineRun::start(&source, adapter.kind().as_str(), snapshot);
        let mut stages = StageMetrics::default();
        info!(run_id = %run.run_id, source = %source, force, "Starting pipeline run");

        let result = match self.execute(adapter, force, &mut run, &mut stages).await {
            Ok(outcome) => {
                let status = match outcome {
                    Outcome::Finished => run.completion_status(),
                    Outcome::Cancelled => {
                        info!(run_id = %run.run_id, source = %source, "Run cancelled");
                        RunStatus::Cancelled
                    }
                };
                run.finish(status);
                self.runs.update(&run).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(run_id = %run.run_id, source = %source, error = %e, "Pipeline run aborted");
            run.push_error(format!("fatal: {e}"), self.config.max_recorded_errors);
            run.finish(RunStatus::Failed);
            if let Err(persist) = self.runs.update(&run).await {
                error!(run_id = %run.run_id, error = %persist, "Failed to persist aborted run");
            }
            self.export_metrics(&run, &stages).await;
            return Err(PipelineError::Aborted {
                run: Box::new(run),
                source: e,
            });
        }

        self.export_metrics(&run, &stages).await;
        Ok(run)
    }

    async fn execute(
        &self,
        adapter: &dyn SourceAdapter,
        force: bool,
        run: &mut PipelineRun,
        stages: &mut StageMetrics,
    ) -> Result<Outcome, LedgerError> {
        let source = adapter.source();
        self.runs.create(run).await?;
        self.rate_limiter
            .configure(source, adapter.rate_limit().into())
            .await;

        let reset = self.ledger.reset_stale(source).await?;
        if reset > 0 {
            info!(source, reset, "Reset entries left over from an interrupted run");
        }

        let started = Instant::now();
        let outcome = self.discover(adapter, force, run).await?;
        stages.record(
            PipelineStage::Discover,
            started.elapsed(),
            run.records_discovered,
        );
        self.runs.update(run).await?;
        if let Outcome::Cancelled = outcome {
            return Ok(outcome);
        }

        let workers = adapter
            .max_workers()
            .unwrap_or(self.config.max_workers)
            .max(1);
        let batch_size = self.config.batch_size.max(1);
        debug!(source, workers, batch_size, "Fetching pending entries");

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let batch = self.ledger.pending_urls(source, batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let started = Instant::now();
            let attempted = batch.len() as u64;
            let fetched = self.fetch_batch(adapter, batch, workers, run).await?;
            stages.record(PipelineStage::Fetch, started.elapsed(), attempted);

            let started = Instant::now();
            let before = run.records_processed + run.records_duplicate;
            let outcome = self.process_batch(fetched, run).await?;
            stages.record(
                PipelineStage::Process,
                started.elapsed(),
                run.records_processed + run.records_duplicate - before,
            );

            self.runs.update(run).await?;
            if let Outcome::Cancelled = outcome {
                return Ok(outcome);
            }
        }

        Ok(Outcome::Finished)
    }

    /// Register every candidate the adapter yields and decide whether it
    /// still needs fetching.
    ///
    /// A URL yielded more than once is handled and counted once.
    async fn discover(
        &self,
        adapter: &dyn SourceAdapter,
        force: bool,
        run: &mut PipelineRun,
    ) -> Result<Outcome, LedgerError> {
        let source = adapter.source();
        let mut candidates = adapter.discover();
        let mut seen = HashSet::new();

        while let Some(candidate) = candidates.next().await {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let candidate = match candidate {
                Ok(candidate) => candidate,
                Err(e) => {
                    self.record_failure(run, source, &format!("discovery failed: {e}"));
                    continue;
                }
            };

            if !seen.insert(candidate.url.clone()) {
                debug!(url = %candidate.url, "Already discovered in this run");
                continue;
            }
            run.records_discovered += 1;
            let entry = self
                .ledger
                .register_discovered(&candidate.url, source, &candidate.metadata)
                .await?;
            self.admit(entry, &candidate.validator_hints(), force, run)
                .await?;
        }

        Ok(Outcome::Finished)
    }

    async fn admit(
        &self,
        entry: LedgerEntry,
        hints: &ConditionalHeaders,
        force: bool,
        run: &mut PipelineRun,
    ) -> Result<(), LedgerError> {
        let decision = self.engine.check_discovery_stage(&entry.url).await?;

        if decision.is_duplicate {
            let changed = !force
                || hints.is_empty()
                || self
                    .ledger
                    .needs_refetch(
                        &entry.url,
                        hints.etag.as_deref(),
                        hints.last_modified.as_deref(),
                    )
                    .await?;
            if force && changed {
                let previous = self.ledger.reset_for_reprocess(&entry.url).await?;
                if let Some(hash) = previous.text_hash.as_deref() {
                    self.engine.forget(hash);
                }
                debug!(url = %entry.url, from = %previous.state, "Reset for forced reprocessing");
            } else {
                run.records_skipped += 1;
                debug!(
                    url = %entry.url,
                    state = %entry.state,
                    unchanged = !changed,
                    "Already handled, skipping"
                );
            }
            return Ok(());
        }

        match entry.state {
            LedgerState::Failed if force => {
                self.ledger.reset_for_reprocess(&entry.url).await?;
            }
            LedgerState::Failed => {
                debug!(url = %entry.url, retries = entry.retry_count, "Retrying failed entry");
                self.ledger.mark_for_retry(&entry.url).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Fetch and fingerprint a batch concurrently; results come back in
    /// batch order.
    async fn fetch_batch(
        &self,
        adapter: &dyn SourceAdapter,
        batch: Vec<LedgerEntry>,
        workers: usize,
        run: &mut PipelineRun,
    ) -> Result<Vec<FetchedRecord>, LedgerError> {
        let outcomes: Vec<FetchOutcome> = stream::iter(batch.into_iter().enumerate())
            .map(|(index, entry)| self.fetch_one(adapter, index, entry))
            .buffer_unordered(workers)
            .try_collect()
            .await?;

        let mut fetched = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Fetched(record) => fetched.push(*record),
                FetchOutcome::Unchanged => run.records_skipped += 1,
                FetchOutcome::Failed { url, message } => {
                    self.record_failure(run, &url, &message)
                }
                FetchOutcome::Cancelled => {}
            }
        }
        fetched.sort_by_key(|record| record.index);
        Ok(fetched)
    }

    async fn fetch_one(
        &self,
        adapter: &dyn SourceAdapter,
        index: usize,
        entry: LedgerEntry,
    ) -> Result<FetchOutcome, LedgerError> {
        if self.cancel.is_cancelled() {
            return Ok(FetchOutcome::Cancelled);
        }
        let source = adapter.source();
        let conditional = entry.conditional_headers();
        let url = entry.url;

        self.ledger.mark_fetching(&url).await?;
        let waited = self.rate_limiter.acquire(source).await;
        if !waited.is_zero() {
            debug!(url = %url, "Waited {:?} for rate limit", waited);
        }

        let response = match adapter.fetch(&url, &conditional).await {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                self.ledger
                    .record_fetch_result(&url, FetchResult::failed(&message))
                    .await?;
                return Ok(FetchOutcome::Failed { url, message });
            }
        };
        self.rate_limiter
            .report_status(source, response.status)
            .await;

        let mut result = FetchResult {
            http_status: Some(response.status),
            etag: response.etag().map(str::to_string),
            last_modified: response.last_modified().map(str::to_string),
            content_length: Some(response.content_length()),
            ..Default::default()
        };
        if result.is_not_modified() {
            if let Some(restored) = self.ledger.restore_previous_outcome(&url).await? {
                if let (LedgerState::Processed, Some(hash)) =
                    (restored.state, restored.text_hash.as_deref())
                {
                    self.engine.register(hash, &url);
                }
                debug!(url = %url, state = %restored.state, "Not modified, kept previous outcome");
                return Ok(FetchOutcome::Unchanged);
            }
        }
        if !response.is_success() {
            let message = result.failure_message();
            self.ledger.record_fetch_result(&url, result).await?;
            return Ok(FetchOutcome::Failed { url, message });
        }

        let extracted = adapter
            .extract(&url, &response.body)
            .map_err(|e| e.to_string())
            .and_then(|record| {
                self.engine
                    .fingerprint(&record.text)
                    .map(|fingerprints| (record, fingerprints))
                    .map_err(|e| format!("fingerprint failed: {e}"))
            });

        match extracted {
            Ok((record, fingerprints)) => {
                result.text_hash = Some(fingerprints.text_hash.clone());
                result.minhash_signature = fingerprints.signature.as_ref().map(|s| s.to_hex());
                self.ledger.record_fetch_result(&url, result).await?;
                Ok(FetchOutcome::Fetched(Box::new(FetchedRecord {
                    index,
                    url,
                    record,
                    fingerprints,
                })))
            }
            Err(message) => {
                // The body arrived, so the fetch itself succeeded.
                self.ledger.record_fetch_result(&url, result).await?;
                self.ledger.record_error(&url, &message).await?;
                Ok(FetchOutcome::Failed { url, message })
            }
        }
    }

    /// Dedup and write fetched records one at a time, so a record always
    /// sees every record accepted before it.
    async fn process_batch(
        &self,
        fetched: Vec<FetchedRecord>,
        run: &mut PipelineRun,
    ) -> Result<Outcome, LedgerError> {
        for item in fetched {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let decision = self.engine.check_fingerprints(&item.fingerprints).await?;
            if let (true, Some(matched)) = (decision.is_duplicate, decision.matched_url.as_deref())
            {
                self.ledger.mark_skipped_duplicate(&item.url, matched).await?;
                run.records_duplicate += 1;
                info!(
                    url = %item.url,
                    matched,
                    kind = ?decision.match_kind,
                    similarity = ?decision.similarity,
                    "Skipped duplicate"
                );
                continue;
            }

            let text_hash = &item.fingerprints.text_hash;
            match self.writer.write(&item.record, text_hash).await {
                Ok(silver_id) => {
                    self.ledger.record_processed(&item.url, &silver_id).await?;
                    self.engine.register(text_hash, &item.url);
                    run.records_processed += 1;
                    debug!(url = %item.url, silver_id = %silver_id, "Processed");
                }
                Err(e) => {
                    let message = format!("silver write failed: {e:#}");
                    self.ledger.record_error(&item.url, &message).await?;
                    self.record_failure(run, &item.url, &message);
                }
            }
        }
        Ok(Outcome::Finished)
    }

    fn record_failure(&self, run: &mut PipelineRun, key: &str, message: &str) {
        warn!(run_id = %run.run_id, key, error = message, "Record failed");
        run.records_failed += 1;
        run.push_error(format!("{key}: {message}"), self.config.max_recorded_errors);
    }

    async fn export_metrics(&self, run: &PipelineRun, stages: &StageMetrics) {
        if let Err(e) = self.metrics.export(run, stages).await {
            warn!(run_id = %run.run_id, error = %e, "Metrics export failed");
        }
    }
}
