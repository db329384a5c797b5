//! Pipeline run audit model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final or in-progress status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_errors" => Some(Self::CompletedWithErrors),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of the orchestrator for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub source: String,
    pub pipeline_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_discovered: u64,
    pub records_processed: u64,
    pub records_failed: u64,
    /// URLs already handled by an earlier run and left alone.
    pub records_skipped: u64,
    /// URLs moved to `skipped_duplicate` by this run.
    pub records_duplicate: u64,
    pub errors: Vec<String>,
    pub config_snapshot: serde_json::Value,
}

impl PipelineRun {
    /// Start a new run record in the `running` state.
    pub fn start(source: &str, pipeline_type: &str, config_snapshot: serde_json::Value) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            pipeline_type: pipeline_type.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            records_discovered: 0,
            records_processed: 0,
            records_failed: 0,
            records_skipped: 0,
            records_duplicate: 0,
            errors: Vec::new(),
            config_snapshot,
        }
    }

    /// Record an error message, keeping at most `cap` messages.
    pub fn push_error(&mut self, message: impl Into<String>, cap: usize) {
        if self.errors.len() < cap {
            self.errors.push(message.into());
        }
    }

    /// Status a run ends with when no fatal error occurred.
    pub fn completion_status(&self) -> RunStatus {
        if self.records_failed > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        }
    }

    /// Close the run with a final status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}
