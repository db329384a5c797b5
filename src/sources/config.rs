//! Typed per-source configuration.
//!
//! Each source kind has its own variant; the `kind` field in a config file
//! selects it, and a missing required field for that kind fails at load time.

use serde::{Deserialize, Serialize};

/// The closed set of adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    WikiDump,
    DatasetApi,
    VideoCaptions,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::WikiDump => "wiki_dump",
            Self::DatasetApi => "dataset_api",
            Self::VideoCaptions => "video_captions",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_split() -> String {
    "train".to_string()
}

/// Adapter-specific settings, one variant per [`SourceKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    News {
        base_url: String,
        #[serde(default)]
        seed_urls: Vec<String>,
    },
    WikiDump {
        language: String,
        #[serde(default)]
        dump_url: Option<String>,
    },
    DatasetApi {
        dataset: String,
        #[serde(default = "default_split")]
        split: String,
    },
    VideoCaptions {
        query: String,
        #[serde(default)]
        max_videos: Option<usize>,
    },
}

impl AdapterConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::News { .. } => SourceKind::News,
            Self::WikiDump { .. } => SourceKind::WikiDump,
            Self::DatasetApi { .. } => SourceKind::DatasetApi,
            Self::VideoCaptions { .. } => SourceKind::VideoCaptions,
        }
    }
}

/// Minimum and maximum spacing between two requests to one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRateLimit {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for SourceRateLimit {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
        }
    }
}

impl SourceRateLimit {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Full configuration of one named source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub rate_limit: SourceRateLimit,
    /// Overrides the pipeline-wide worker count for this source.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

impl SourceConfig {
    pub fn new(adapter: AdapterConfig) -> Self {
        Self {
            adapter,
            rate_limit: SourceRateLimit::default(),
            max_workers: None,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.adapter.kind()
    }

    pub fn validate(&self) -> Result<(), String> {
        self.rate_limit.validate()?;
        if self.max_workers == Some(0) {
            return Err("max_workers must be at least 1".to_string());
        }
        Ok(())
    }

    /// JSON form recorded in a run's `config_snapshot`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
