//! Pipeline orchestration: one run of one source from discovery to the
//! silver layer.

pub mod collaborators;
pub mod orchestrator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::PipelineRun;
use crate::repository::LedgerError;

pub use collaborators::{
    MetricsCollector, PipelineStage, SilverWriter, StageMetrics, StageTiming,
    TracingMetricsCollector,
};
pub use orchestrator::Orchestrator;

/// Run-level knobs shared by all sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent fetch workers per source, unless the source overrides it.
    pub max_workers: usize,
    /// Pending entries fetched and processed per batch.
    pub batch_size: usize,
    /// Error messages kept on a run record.
    pub max_recorded_errors: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            batch_size: 64,
            max_recorded_errors: 100,
        }
    }
}

/// Cooperative cancellation for a running pipeline.
///
/// Checked after every ledger transition; once set, the run stops at the
/// next checkpoint and ends `cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// An infrastructure failure ended the run. `run` is the persisted,
    /// `failed` run record.
    #[error("pipeline run {} aborted", .run.run_id)]
    Aborted {
        run: Box<PipelineRun>,
        #[source]
        source: LedgerError,
    },
}

impl PipelineError {
    pub fn run(&self) -> &PipelineRun {
        match self {
            Self::Aborted { run, .. } => run,
        }
    }
}
