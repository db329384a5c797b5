//! Collaborators the orchestrator hands results to: the silver-layer
//! writer and the metrics exporter.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::models::{PipelineRun, RawRecord};

/// Persists accepted records to the silver layer.
#[async_trait]
pub trait SilverWriter: Send + Sync {
    /// Write one record and return its silver id.
    async fn write(&self, record: &RawRecord, text_hash: &str) -> anyhow::Result<String>;
}

/// Receives a finished run and its per-stage breakdown.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn export(&self, run: &PipelineRun, stages: &StageMetrics) -> anyhow::Result<()>;
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Discover,
    Fetch,
    Process,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Fetch => "fetch",
            Self::Process => "process",
        }
    }
}

/// Time spent and items handled in one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub duration: Duration,
    pub items: u64,
}

/// Per-stage breakdown of a run. Fetch and process accumulate over batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageMetrics {
    pub discover: StageTiming,
    pub fetch: StageTiming,
    pub process: StageTiming,
}

impl StageMetrics {
    pub fn record(&mut self, stage: PipelineStage, elapsed: Duration, items: u64) {
        let timing = self.get_mut(stage);
        timing.duration += elapsed;
        timing.items += items;
    }

    pub fn get(&self, stage: PipelineStage) -> StageTiming {
        match stage {
            PipelineStage::Discover => self.discover,
            PipelineStage::Fetch => self.fetch,
            PipelineStage::Process => self.process,
        }
    }

    fn get_mut(&mut self, stage: PipelineStage) -> &mut StageTiming {
        match stage {
            PipelineStage::Discover => &mut self.discover,
            PipelineStage::Fetch => &mut self.fetch,
            PipelineStage::Process => &mut self.process,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.discover.duration + self.fetch.duration + self.process.duration
    }
}

/// Metrics collector that logs the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsCollector;

#[async_trait]
impl MetricsCollector for TracingMetricsCollector {
    async fn export(&self, run: &PipelineRun, stages: &StageMetrics) -> anyhow::Result<()> {
        info!(
            run_id = %run.run_id,
            source = %run.source,
            status = %run.status,
            discovered = run.records_discovered,
            processed = run.records_processed,
            duplicates = run.records_duplicate,
            skipped = run.records_skipped,
            failed = run.records_failed,
            "Run finished"
        );
        for stage in [
            PipelineStage::Discover,
            PipelineStage::Fetch,
            PipelineStage::Process,
        ] {
            let timing = stages.get(stage);
            info!(
                run_id = %run.run_id,
                stage = stage.as_str(),
                items = timing.items,
                "Stage took {:?}",
                timing.duration
            );
        }
        Ok(())
    }
}
