//! Configuration management for corpus-ingest using the prefer crate.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupConfig;
use crate::pipeline::PipelineConfig;
use crate::sources::{AdapterRegistry, RegistryError, SourceAdapter, SourceConfig};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "CORPUS_INGEST_DATA_DIR";

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Ledger database filename.
    pub database_filename: String,
    /// Maximum pooled SQLite connections.
    pub pool_size: u32,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    pub dedup: DedupConfig,
    pub pipeline: PipelineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.local/share/corpus-ingest on Linux
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("corpus-ingest");

        Self {
            data_dir,
            database_filename: "ledger.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
            dedup: DedupConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the ledger database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }

    /// Apply a data directory override, expanding `~`.
    pub fn override_data_dir(&mut self, dir: &str) {
        let path = shellexpand::tilde(dir);
        self.data_dir = PathBuf::from(path.as_ref());
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub pool_size: Option<u32>,
    #[serde(default)]
    pub busy_timeout_ms: Option<u64>,
    #[serde(default)]
    pub dedup: Option<DedupConfig>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    /// Source configurations, keyed by source name.
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Discovers corpus-ingest config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("corpus-ingest").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").ok();
                let database: Option<String> = pref_config.get("database").ok();
                let pool_size: Option<u32> = pref_config.get("pool_size").ok();
                let busy_timeout_ms: Option<u64> = pref_config.get("busy_timeout_ms").ok();
                let dedup: Option<DedupConfig> = pref_config.get("dedup").ok();
                let pipeline: Option<PipelineConfig> = pref_config.get("pipeline").ok();
                let sources: HashMap<String, SourceConfig> =
                    pref_config.get("sources").unwrap_or_default();

                Config {
                    target,
                    database,
                    pool_size,
                    busy_timeout_ms,
                    dedup,
                    pipeline,
                    sources,
                }
            }
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            settings.override_data_dir(target);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(pool_size) = self.pool_size {
            settings.pool_size = pool_size;
        }
        if let Some(busy) = self.busy_timeout_ms {
            settings.busy_timeout_ms = busy;
        }
        if let Some(ref dedup) = self.dedup {
            settings.dedup = dedup.clone();
        }
        if let Some(ref pipeline) = self.pipeline {
            settings.pipeline = pipeline.clone();
        }
    }

    /// Source names in a stable order.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build an adapter for every configured source, sorted by name.
    pub fn build_adapters(
        &self,
        registry: &AdapterRegistry,
    ) -> Result<Vec<Box<dyn SourceAdapter>>, RegistryError> {
        self.source_names()
            .into_iter()
            .map(|name| registry.build(name, &self.sources[name]))
            .collect()
    }
}

/// Load settings from `.env`, the config file and the environment.
///
/// Precedence: `CORPUS_INGEST_DATA_DIR` > config file > defaults.
pub async fn load_settings() -> (Settings, Config) {
    dotenvy::dotenv().ok();

    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        settings.override_data_dir(&dir);
    }
    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    const CONFIG_JSON: &str = r#"{
        "target": "~/corpora/somali",
        "database": "somali.db",
        "dedup": { "similarity_threshold": 0.9 },
        "sources": {
            "bbc_somali": {
                "kind": "news",
                "base_url": "https://www.bbc.com/somali",
                "seed_urls": ["https://www.bbc.com/somali/war-1"],
                "rate_limit": { "min_delay_ms": 2000, "max_delay_ms": 4000 }
            },
            "wikipedia_so": { "kind": "wiki_dump", "language": "so" }
        }
    }"#;

    #[test]
    fn test_apply_to_settings() {
        let config: Config = serde_json::from_str(CONFIG_JSON).unwrap();
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/unused"));
        config.apply_to_settings(&mut settings);

        assert!(settings.data_dir.ends_with("corpora/somali"));
        assert!(settings.database_path().ends_with("corpora/somali/somali.db"));
        assert_eq!(settings.dedup.similarity_threshold, 0.9);
        assert_eq!(settings.dedup.num_permutations, 128);
        assert_eq!(settings.pipeline, PipelineConfig::default());
        assert_eq!(settings.pool_size, 8);
    }

    #[test]
    fn test_sources_parse_by_kind() {
        let config: Config = serde_json::from_str(CONFIG_JSON).unwrap();
        assert_eq!(config.source_names(), vec!["bbc_somali", "wikipedia_so"]);
        assert_eq!(config.sources["bbc_somali"].kind(), SourceKind::News);
        assert_eq!(config.sources["bbc_somali"].rate_limit.min_delay_ms, 2000);
        assert_eq!(config.sources["wikipedia_so"].kind(), SourceKind::WikiDump);
    }

    #[test]
    fn test_build_adapters_requires_registered_kinds() {
        let config: Config = serde_json::from_str(CONFIG_JSON).unwrap();
        let registry = AdapterRegistry::new();
        assert!(matches!(
            config.build_adapters(&registry),
            Err(RegistryError::NotRegistered(_))
        ));
        assert!(Config::default()
            .build_adapters(&registry)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path().join("nested").join("data"));
        settings.ensure_directories().unwrap();
        assert!(settings.data_dir.is_dir());
    }
}
