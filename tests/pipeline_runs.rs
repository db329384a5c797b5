//! End-to-end orchestrator runs over a temporary SQLite ledger.
//!
//! The adapter, silver writer and metrics collector are in-memory fakes; the
//! ledger, run audit, dedup engine and rate limiter are the real ones.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use corpus_ingest::dedup::{DedupConfig, DedupEngine};
use corpus_ingest::models::{
    ConditionalHeaders, DiscoveredUrl, LedgerState, PipelineRun, RawRecord, RunStatus,
    ETAG_HINT_KEY,
};
use corpus_ingest::pipeline::{
    CancelFlag, MetricsCollector, Orchestrator, PipelineConfig, PipelineError, PipelineStage,
    SilverWriter, StageMetrics,
};
use corpus_ingest::repository::{open_database, CrawlLedger, RunRepository};
use corpus_ingest::sources::{
    AdapterError, FetchResponse, SourceAdapter, SourceKind, SourceRateLimit,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `words` distinct words, optionally with one replaced.
fn article(words: usize, changed_at: Option<usize>) -> String {
    (0..words)
        .map(|i| {
            if Some(i) == changed_at {
                "beddelay".to_string()
            } else {
                format!("erey{i}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable ETag for a page body.
fn etag_for(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone)]
enum Page {
    Text(String),
    Status(u16),
    Unreachable,
}

struct MockAdapter {
    name: String,
    urls: Vec<String>,
    pages: Mutex<HashMap<String, Page>>,
    fetches: AtomicUsize,
    /// Validators each fetch was sent, in fetch order.
    sent: Mutex<Vec<(String, ConditionalHeaders)>>,
    /// Answer 304 when the sent ETag matches the page.
    honours_validators: bool,
    /// Report each page's current ETag in discovery metadata.
    lists_validators: bool,
}

impl MockAdapter {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            urls: Vec::new(),
            pages: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            honours_validators: false,
            lists_validators: false,
        }
    }

    fn honouring_validators(mut self) -> Self {
        self.honours_validators = true;
        self
    }

    fn listing_validators(mut self) -> Self {
        self.lists_validators = true;
        self
    }

    /// ETags sent for `url`, one per fetch.
    fn sent_etags(&self, url: &str) -> Vec<Option<String>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(sent_url, _)| sent_url == url)
            .map(|(_, headers)| headers.etag.clone())
            .collect()
    }

    fn page(mut self, url: &str, page: Page) -> Self {
        self.urls.push(url.to_string());
        self.pages.lock().unwrap().insert(url.to_string(), page);
        self
    }

    fn text(self, url: &str, text: &str) -> Self {
        self.page(url, Page::Text(text.to_string()))
    }

    fn set_page(&self, url: &str, page: Page) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn source(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::News
    }

    fn rate_limit(&self) -> SourceRateLimit {
        SourceRateLimit {
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn discover(&self) -> BoxStream<'_, Result<DiscoveredUrl, AdapterError>> {
        let pages = self.pages.lock().unwrap().clone();
        let candidates: Vec<_> = self
            .urls
            .iter()
            .map(|url| {
                let mut candidate = DiscoveredUrl::new(url.as_str()).with_metadata("lang", "so");
                if let (true, Some(Page::Text(text))) = (self.lists_validators, pages.get(url)) {
                    candidate = candidate.with_metadata(ETAG_HINT_KEY, etag_for(text));
                }
                Ok(candidate)
            })
            .collect();
        stream::iter(candidates).boxed()
    }

    async fn fetch(
        &self,
        url: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<FetchResponse, AdapterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), conditional.clone()));
        let page = self.pages.lock().unwrap().get(url).cloned();
        match page {
            Some(Page::Text(text)) => {
                let etag = etag_for(&text);
                if self.honours_validators && conditional.etag.as_deref() == Some(etag.as_str()) {
                    return Ok(FetchResponse::new(304, Vec::new()).with_header("ETag", etag));
                }
                Ok(FetchResponse::new(200, text).with_header("ETag", etag))
            }
            Some(Page::Status(status)) => Ok(FetchResponse::new(status, Vec::new())),
            Some(Page::Unreachable) => Err(AdapterError::Transient("connection reset".to_string())),
            None => Ok(FetchResponse::new(404, Vec::new())),
        }
    }

    fn extract(&self, url: &str, body: &[u8]) -> Result<RawRecord, AdapterError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| AdapterError::Extraction(e.to_string()))?;
        Ok(RawRecord::new(url, "", text))
    }
}

#[derive(Default)]
struct MockWriter {
    written: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    cancel_after_write: Option<CancelFlag>,
}

impl MockWriter {
    fn failing_for(url: &str) -> Self {
        let writer = Self::default();
        writer.failing.lock().unwrap().insert(url.to_string());
        writer
    }

    fn cancelling(flag: CancelFlag) -> Self {
        Self {
            cancel_after_write: Some(flag),
            ..Default::default()
        }
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn urls(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl SilverWriter for MockWriter {
    async fn write(&self, record: &RawRecord, text_hash: &str) -> anyhow::Result<String> {
        if self.failing.lock().unwrap().contains(&record.url) {
            anyhow::bail!("silver store unavailable");
        }
        let mut written = self.written.lock().unwrap();
        written.push((record.url.clone(), text_hash.to_string()));
        if let Some(flag) = &self.cancel_after_write {
            flag.cancel();
        }
        Ok(format!("silver-{}", written.len()))
    }
}

#[derive(Default)]
struct MockMetrics {
    exported: Mutex<Vec<(PipelineRun, StageMetrics)>>,
}

#[async_trait]
impl MetricsCollector for MockMetrics {
    async fn export(&self, run: &PipelineRun, stages: &StageMetrics) -> anyhow::Result<()> {
        self.exported
            .lock()
            .unwrap()
            .push((run.clone(), stages.clone()));
        Ok(())
    }
}

struct Harness {
    ledger: CrawlLedger,
    runs: RunRepository,
    metrics: Arc<MockMetrics>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = open_database(&dir.path().join("ledger.db"), 4, 5_000)
            .await
            .expect("Failed to open ledger");
        Self {
            ledger: CrawlLedger::new(pool.clone()),
            runs: RunRepository::new(pool),
            metrics: Arc::new(MockMetrics::default()),
            _dir: dir,
        }
    }

    /// A fresh orchestrator, as a new process would build it.
    fn orchestrator(&self, writer: Arc<MockWriter>, config: PipelineConfig) -> Orchestrator {
        let engine = DedupEngine::new(self.ledger.clone(), DedupConfig::default())
            .expect("valid dedup config");
        Orchestrator::new(
            self.ledger.clone(),
            self.runs.clone(),
            engine,
            writer,
            config,
        )
        .with_metrics(self.metrics.clone())
    }

    async fn state(&self, url: &str) -> LedgerState {
        self.ledger.get(url).await.unwrap().unwrap().state
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn identical_articles_are_written_once() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "Habeen wanaagsan")
        .text("https://news.example/b", "Habeen wanaagsan");
    let writer = Arc::new(MockWriter::default());

    let run = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_discovered, 2);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_duplicate, 1);
    assert_eq!(run.records_failed, 0);
    assert_eq!(writer.urls(), vec!["https://news.example/a"]);

    let a = h.ledger.get("https://news.example/a").await.unwrap().unwrap();
    assert_eq!(a.state, LedgerState::Processed);
    assert_eq!(a.silver_id.as_deref(), Some("silver-1"));
    assert_eq!(a.metadata.get("lang").and_then(|v| v.as_str()), Some("so"));

    let b = h.ledger.get("https://news.example/b").await.unwrap().unwrap();
    assert_eq!(b.state, LedgerState::SkippedDuplicate);
    assert_eq!(b.duplicate_of(), Some("https://news.example/a"));
    assert_eq!(b.text_hash, a.text_hash);
}

#[tokio::test]
async fn second_run_fetches_nothing() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "Habeen wanaagsan")
        .text("https://news.example/b", "Habeen wanaagsan")
        .text("https://news.example/c", "Subax wanaagsan");
    let writer = Arc::new(MockWriter::default());

    h.orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(adapter.fetches(), 3);

    let second = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.records_discovered, 3);
    assert_eq!(second.records_skipped, 3);
    assert_eq!(second.records_processed, 0);
    assert_eq!(second.records_duplicate, 0);
    assert_eq!(adapter.fetches(), 3);
    assert_eq!(writer.urls().len(), 2);
}

#[tokio::test]
async fn one_unreachable_url_does_not_fail_the_run() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/1", "maqaal kowaad")
        .page("https://news.example/2", Page::Unreachable)
        .text("https://news.example/3", "maqaal saddexaad");
    let writer = Arc::new(MockWriter::default());

    let run = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.records_processed, 2);
    assert_eq!(run.records_failed, 1);
    assert_eq!(run.errors.len(), 1);
    assert!(run.errors[0].contains("https://news.example/2"));

    let failed = h.ledger.get("https://news.example/2").await.unwrap().unwrap();
    assert_eq!(failed.state, LedgerState::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.unwrap().contains("connection reset"));

    // Once reachable, the next run retries only the failed URL.
    adapter.set_page("https://news.example/2", Page::Text("maqaal labaad".to_string()));
    let retry = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    assert_eq!(retry.records_processed, 1);
    assert_eq!(retry.records_skipped, 2);
    assert_eq!(adapter.fetches(), 4);

    let entry = h.ledger.get("https://news.example/2").await.unwrap().unwrap();
    assert_eq!(entry.state, LedgerState::Processed);
    assert_eq!(entry.retry_count, 1);
}

#[tokio::test]
async fn http_errors_are_recorded_with_status() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .page("https://news.example/gone", Page::Status(404))
        .page("https://news.example/busy", Page::Status(503));
    let writer = Arc::new(MockWriter::default());

    let run = h
        .orchestrator(writer, PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.records_failed, 2);
    let gone = h.ledger.get("https://news.example/gone").await.unwrap().unwrap();
    assert_eq!(gone.state, LedgerState::Failed);
    assert_eq!(gone.http_status, Some(404));
    assert_eq!(gone.error_message.as_deref(), Some("HTTP 404"));
}

#[tokio::test]
async fn force_refetches_and_rededuplicates() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "Habeen wanaagsan")
        .text("https://news.example/b", "Habeen wanaagsan");
    let writer = Arc::new(MockWriter::default());
    let orchestrator = h.orchestrator(writer.clone(), PipelineConfig::default());

    orchestrator.run(&adapter, false).await.unwrap();
    let forced = orchestrator.run(&adapter, true).await.unwrap();

    assert_eq!(forced.status, RunStatus::Completed);
    assert_eq!(forced.records_skipped, 0);
    assert_eq!(forced.records_processed, 1);
    assert_eq!(forced.records_duplicate, 1);
    assert_eq!(adapter.fetches(), 4);
    assert_eq!(
        writer.urls(),
        vec!["https://news.example/a", "https://news.example/a"]
    );
    assert_eq!(forced.config_snapshot["force"], serde_json::json!(true));

    let b = h.ledger.get("https://news.example/b").await.unwrap().unwrap();
    assert_eq!(b.state, LedgerState::SkippedDuplicate);
    assert_eq!(b.duplicate_of(), Some("https://news.example/a"));
}

/// Run `first` then `second` over one ledger; returns the second run and
/// what the second source's URL was recorded as a duplicate of.
async fn near_duplicate_across_sources(
    first: &MockAdapter,
    second: &MockAdapter,
) -> (PipelineRun, Option<String>) {
    let h = Harness::new().await;
    let writer = Arc::new(MockWriter::default());
    let orchestrator = h.orchestrator(writer, PipelineConfig::default());
    let run = orchestrator.run(first, false).await.unwrap();
    assert_eq!(run.records_processed, 1);
    let run = orchestrator.run(second, false).await.unwrap();

    let entry = h.ledger.get(&second.urls[0]).await.unwrap().unwrap();
    assert_eq!(entry.state, LedgerState::SkippedDuplicate);
    (run, entry.duplicate_of().map(str::to_string))
}

#[tokio::test]
async fn near_duplicates_match_regardless_of_source_order() {
    let original = article(100, None);
    let edited = article(100, Some(50));
    let news = || MockAdapter::new("news").text("https://news.example/a", &original);
    let wiki = || MockAdapter::new("wiki").text("https://wiki.example/a", &edited);

    let (news_then_wiki, wiki_original) = near_duplicate_across_sources(&news(), &wiki()).await;
    let (wiki_then_news, news_original) = near_duplicate_across_sources(&wiki(), &news()).await;

    for run in [&news_then_wiki, &wiki_then_news] {
        assert_eq!(run.records_duplicate, 1);
        assert_eq!(run.records_processed, 0);
    }
    // The same pair matches, swapped with the order.
    assert_eq!(wiki_original.as_deref(), Some("https://news.example/a"));
    assert_eq!(news_original.as_deref(), Some("https://wiki.example/a"));
}

#[tokio::test]
async fn forced_run_revalidates_with_stored_etag() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "Habeen wanaagsan")
        .text("https://news.example/b", "Habeen wanaagsan")
        .text("https://news.example/c", "Subax wanaagsan")
        .honouring_validators();
    let writer = Arc::new(MockWriter::default());

    h.orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(adapter.sent_etags("https://news.example/a"), vec![None]);

    adapter.set_page("https://news.example/c", Page::Text("Galab wanaagsan".to_string()));
    let forced = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, true)
        .await
        .unwrap();

    // Every refetch carried the ETag stored by the first run.
    let greeting = etag_for("Habeen wanaagsan");
    for url in ["https://news.example/a", "https://news.example/b"] {
        assert_eq!(adapter.sent_etags(url), vec![None, Some(greeting.clone())]);
    }
    assert_eq!(
        adapter.sent_etags("https://news.example/c"),
        vec![None, Some(etag_for("Subax wanaagsan"))]
    );

    assert_eq!(forced.status, RunStatus::Completed);
    assert_eq!(forced.records_skipped, 2);
    assert_eq!(forced.records_processed, 1);
    assert_eq!(forced.records_duplicate, 0);
    assert_eq!(forced.records_failed, 0);
    assert_eq!(
        writer.urls(),
        vec![
            "https://news.example/a",
            "https://news.example/c",
            "https://news.example/c"
        ]
    );

    // 304s put the earlier outcomes back instead of failing.
    let a = h.ledger.get("https://news.example/a").await.unwrap().unwrap();
    assert_eq!(a.state, LedgerState::Processed);
    assert_eq!(a.http_status, Some(304));
    assert_eq!(a.silver_id.as_deref(), Some("silver-1"));
    let b = h.ledger.get("https://news.example/b").await.unwrap().unwrap();
    assert_eq!(b.state, LedgerState::SkippedDuplicate);
    assert_eq!(b.duplicate_of(), Some("https://news.example/a"));
    let c = h.ledger.get("https://news.example/c").await.unwrap().unwrap();
    assert_eq!(c.state, LedgerState::Processed);
    assert_eq!(c.etag, Some(etag_for("Galab wanaagsan")));
}

#[tokio::test]
async fn forced_run_skips_urls_the_listing_reports_unchanged() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "maqaal kowaad")
        .text("https://news.example/b", "maqaal labaad")
        .honouring_validators()
        .listing_validators();
    let writer = Arc::new(MockWriter::default());

    h.orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(adapter.fetches(), 2);

    let forced = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, true)
        .await
        .unwrap();
    assert_eq!(forced.records_skipped, 2);
    assert_eq!(adapter.fetches(), 2);

    adapter.set_page("https://news.example/a", Page::Text("maqaal cusub".to_string()));
    let forced = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, true)
        .await
        .unwrap();
    assert_eq!(forced.records_skipped, 1);
    assert_eq!(forced.records_processed, 1);
    assert_eq!(adapter.fetches(), 3);
    assert_eq!(
        adapter.sent_etags("https://news.example/a"),
        vec![None, Some(etag_for("maqaal kowaad"))]
    );
}

#[tokio::test]
async fn repeated_url_in_discovery_is_counted_once() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "maqaal kowaad")
        .text("https://news.example/b", "maqaal labaad")
        .text("https://news.example/a", "maqaal kowaad");
    assert_eq!(adapter.urls.len(), 3);

    let run = h
        .orchestrator(Arc::new(MockWriter::default()), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.records_discovered, 2);
    assert_eq!(run.records_processed, 2);
    assert_eq!(run.records_skipped, 0);
    assert_eq!(adapter.fetches(), 2);
    assert_eq!(h.ledger.stats("somali_news").await.unwrap().total, 2);
}

#[tokio::test]
async fn interrupted_fetch_is_resumed() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news").text("https://news.example/a", "Habeen wanaagsan");

    // A crashed run left the entry mid-fetch.
    h.ledger
        .register_discovered("https://news.example/a", "somali_news", &Default::default())
        .await
        .unwrap();
    h.ledger.mark_fetching("https://news.example/a").await.unwrap();

    let writer = Arc::new(MockWriter::default());
    let run = h
        .orchestrator(writer, PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.records_processed, 1);
    assert_eq!(h.state("https://news.example/a").await, LedgerState::Processed);
}

#[tokio::test]
async fn cancellation_leaves_remaining_urls_discovered() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/1", "maqaal kowaad")
        .text("https://news.example/2", "maqaal labaad")
        .text("https://news.example/3", "maqaal saddexaad");
    let config = PipelineConfig {
        batch_size: 1,
        ..Default::default()
    };
    let cancel = CancelFlag::new();
    let writer = Arc::new(MockWriter::cancelling(cancel.clone()));

    let run = h
        .orchestrator(writer, config.clone())
        .with_cancel_flag(cancel)
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.records_processed, 1);
    assert_eq!(h.state("https://news.example/1").await, LedgerState::Processed);
    assert_eq!(h.state("https://news.example/2").await, LedgerState::Discovered);
    assert_eq!(h.state("https://news.example/3").await, LedgerState::Discovered);

    let stored = h.runs.get(&run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);

    let resumed = h
        .orchestrator(Arc::new(MockWriter::default()), config)
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.records_skipped, 1);
    assert_eq!(resumed.records_processed, 2);
}

#[tokio::test]
async fn failed_silver_write_is_retried_next_run() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "maqaal kowaad")
        .text("https://news.example/b", "maqaal labaad");
    let writer = Arc::new(MockWriter::failing_for("https://news.example/b"));

    let run = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 1);
    let b = h.ledger.get("https://news.example/b").await.unwrap().unwrap();
    assert_eq!(b.state, LedgerState::Fetched);
    assert!(b.error_message.unwrap().contains("silver store unavailable"));

    writer.heal();
    let retry = h
        .orchestrator(writer.clone(), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();
    assert_eq!(retry.status, RunStatus::Completed);
    assert_eq!(retry.records_processed, 1);
    assert_eq!(h.state("https://news.example/b").await, LedgerState::Processed);
}

#[tokio::test]
async fn blank_body_counts_as_failed_record() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/blank", "  \n\t ")
        .text("https://news.example/ok", "Habeen wanaagsan");

    let run = h
        .orchestrator(Arc::new(MockWriter::default()), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    assert_eq!(run.records_failed, 1);
    assert_eq!(run.records_processed, 1);
    let blank = h.ledger.get("https://news.example/blank").await.unwrap().unwrap();
    assert_eq!(blank.state, LedgerState::Fetched);
    assert!(blank.text_hash.is_none());
    assert!(blank.error_message.unwrap().contains("fingerprint"));
}

#[tokio::test]
async fn metrics_and_audit_record_the_run() {
    let h = Harness::new().await;
    let adapter = MockAdapter::new("somali_news")
        .text("https://news.example/a", "Habeen wanaagsan")
        .text("https://news.example/b", "Habeen wanaagsan");

    let run = h
        .orchestrator(Arc::new(MockWriter::default()), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap();

    let exported = h.metrics.exported.lock().unwrap().clone();
    assert_eq!(exported.len(), 1);
    let (exported_run, stages) = &exported[0];
    assert_eq!(exported_run, &run);
    assert_eq!(stages.get(PipelineStage::Discover).items, 2);
    assert_eq!(stages.get(PipelineStage::Fetch).items, 2);
    assert_eq!(stages.get(PipelineStage::Process).items, 2);

    let stored = h.runs.get(&run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.records_processed, 1);
    assert_eq!(stored.records_duplicate, 1);
    assert!(stored.end_time.is_some());

    let recent = h.runs.recent("somali_news", 10).await.unwrap();
    assert_eq!(recent.len(), 1);

    let stats = h.ledger.stats("somali_news").await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped_duplicate, 1);
    assert_eq!(stats.pending(), 0);
}

#[tokio::test]
async fn ledger_failure_aborts_the_run() {
    use diesel::connection::SimpleConnection;

    let h = Harness::new().await;
    {
        let mut conn = h.ledger.pool().get().unwrap();
        conn.batch_execute("DROP TABLE crawl_ledger").unwrap();
    }
    let adapter = MockAdapter::new("somali_news").text("https://news.example/a", "Habeen wanaagsan");

    let err = h
        .orchestrator(Arc::new(MockWriter::default()), PipelineConfig::default())
        .run(&adapter, false)
        .await
        .unwrap_err();

    let PipelineError::Aborted { run, .. } = &err;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.errors.is_empty());
    assert_eq!(adapter.fetches(), 0);

    let stored = h.runs.get(&err.run().run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(h.metrics.exported.lock().unwrap().len(), 1);
}
