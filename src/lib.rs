//! corpus-ingest: idempotent, resumable, deduplicated ingestion of text
//! corpora from many sources.
//!
//! A durable crawl ledger records every URL's lifecycle, a two-tier dedup
//! engine (exact SHA-256 plus MinHash near-duplicates) keeps repeated
//! content out of the corpus, and the orchestrator drives each source
//! through discover, fetch and process.

pub mod config;
pub mod dedup;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod sources;

pub use config::{Config, Settings};
pub use dedup::{DedupConfig, DedupDecision, DedupEngine};
pub use models::{LedgerEntry, LedgerState, PipelineRun, RunStatus};
pub use pipeline::{Orchestrator, PipelineConfig, PipelineError};
pub use repository::{CrawlLedger, LedgerError, RunRepository};
pub use sources::{AdapterRegistry, SourceAdapter, SourceConfig, SourceKind};
