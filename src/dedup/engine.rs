//! Two-tier duplicate detection over the crawl ledger.
//!
//! Tier one compares exact fingerprints (cache first, then the ledger).
//! Tier two, when enabled, compares MinHash signatures against every
//! processed entry. Only content-derived keys are compared, so the outcome
//! for two documents never depends on which source or run saw them first.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::cache::SignatureCache;
use super::hasher::{
    normalize_text, ContentFingerprints, ContentHasher, HashError, DEFAULT_NUM_PERMUTATIONS,
    DEFAULT_SHINGLE_SIZE,
};
use crate::repository::{CrawlLedger, LedgerError};

/// Near-duplicate detection and cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Turn off to run in exact-only mode.
    pub enable_minhash: bool,
    /// Minimum estimated Jaccard similarity for a near-duplicate.
    pub similarity_threshold: f64,
    pub shingle_size: usize,
    pub num_permutations: usize,
    pub cache_capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enable_minhash: true,
            similarity_threshold: 0.85,
            shingle_size: DEFAULT_SHINGLE_SIZE,
            num_permutations: DEFAULT_NUM_PERMUTATIONS,
            cache_capacity: 10_000,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), HashError> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(HashError::InvalidParameters(format!(
                "similarity threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.cache_capacity == 0 {
            return Err(HashError::InvalidParameters(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        // Shingle size and permutation count are checked by the hasher.
        Ok(())
    }
}

/// How a duplicate was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    None,
    Exact,
    Near,
}

/// Result of a dedup check. "Not a duplicate" is a value, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupDecision {
    pub is_duplicate: bool,
    pub match_kind: MatchKind,
    pub matched_url: Option<String>,
    pub similarity: Option<f64>,
}

impl DedupDecision {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            match_kind: MatchKind::None,
            matched_url: None,
            similarity: None,
        }
    }

    pub fn exact(matched_url: impl Into<String>) -> Self {
        Self {
            is_duplicate: true,
            match_kind: MatchKind::Exact,
            matched_url: Some(matched_url.into()),
            similarity: Some(1.0),
        }
    }

    pub fn near(matched_url: impl Into<String>, similarity: f64) -> Self {
        Self {
            is_duplicate: true,
            match_kind: MatchKind::Near,
            matched_url: Some(matched_url.into()),
            similarity: Some(similarity),
        }
    }
}

/// Errors from a dedup check.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The text could not be fingerprinted. Affects one record only.
    #[error("fingerprint failed: {0}")]
    Fingerprint(#[from] HashError),

    /// The ledger lookup failed. Aborts the run.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DedupError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}

/// Deduplication engine shared by all workers of a run.
pub struct DedupEngine {
    ledger: CrawlLedger,
    hasher: ContentHasher,
    cache: SignatureCache,
    config: DedupConfig,
}

impl DedupEngine {
    /// Build an engine, validating the configuration once.
    pub fn new(ledger: CrawlLedger, config: DedupConfig) -> Result<Self, HashError> {
        config.validate()?;
        let hasher = ContentHasher::new(config.shingle_size, config.num_permutations)?;
        let cache = SignatureCache::new(config.cache_capacity);
        if !config.enable_minhash {
            debug!("Near-duplicate detection disabled; running exact-only");
        }
        Ok(Self {
            ledger,
            hasher,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn cache(&self) -> &SignatureCache {
        &self.cache
    }

    /// Compute the fingerprints this engine matches on.
    ///
    /// The signature is omitted in exact-only mode.
    pub fn fingerprint(&self, text: &str) -> Result<ContentFingerprints, HashError> {
        if normalize_text(text).is_empty() {
            return Err(HashError::EmptyText);
        }
        let signature = if self.config.enable_minhash {
            Some(self.hasher.near_signature(text)?)
        } else {
            None
        };
        Ok(ContentFingerprints {
            text_hash: self.hasher.exact_fingerprint(text),
            signature,
        })
    }

    /// Pre-fetch check: is this URL itself already processed or skipped?
    ///
    /// A skipped duplicate reports the original it was matched against.
    pub async fn check_discovery_stage(&self, url: &str) -> Result<DedupDecision, LedgerError> {
        match self.ledger.get(url).await? {
            Some(entry) if entry.state.is_done() => {
                let matched = entry.duplicate_of().map(str::to_string);
                Ok(DedupDecision::exact(matched.unwrap_or(entry.url)))
            }
            _ => Ok(DedupDecision::unique()),
        }
    }

    /// Post-fetch check of extracted text.
    pub async fn check_file_duplicate(&self, text: &str) -> Result<DedupDecision, DedupError> {
        let fingerprints = self.fingerprint(text)?;
        Ok(self.check_fingerprints(&fingerprints).await?)
    }

    /// Post-fetch check with fingerprints that were already computed.
    ///
    /// Only ledger failures can occur here.
    pub async fn check_fingerprints(
        &self,
        fingerprints: &ContentFingerprints,
    ) -> Result<DedupDecision, LedgerError> {
        let text_hash = &fingerprints.text_hash;

        if let Some(url) = self.cache.get(text_hash) {
            debug!(matched = %url, "Exact duplicate (cache)");
            return Ok(DedupDecision::exact(url));
        }

        if let Some(entry) = self.ledger.lookup_by_hash(text_hash).await? {
            debug!(matched = %entry.url, "Exact duplicate (ledger)");
            self.cache.put(text_hash, &entry.url);
            return Ok(DedupDecision::exact(entry.url));
        }

        if !self.config.enable_minhash {
            return Ok(DedupDecision::unique());
        }
        let Some(signature) = &fingerprints.signature else {
            return Ok(DedupDecision::unique());
        };

        let matches = self
            .ledger
            .lookup_by_signature_near(signature, self.config.similarity_threshold)
            .await?;
        match matches.into_iter().next() {
            Some(best) => {
                debug!(
                    matched = %best.entry.url,
                    similarity = best.similarity,
                    "Near duplicate"
                );
                Ok(DedupDecision::near(best.entry.url, best.similarity))
            }
            None => Ok(DedupDecision::unique()),
        }
    }

    /// Remember newly accepted content once its entry is processed.
    pub fn register(&self, text_hash: &str, url: &str) {
        self.cache.put(text_hash, url);
    }

    /// Forget a fingerprint whose owning entry was reset.
    pub fn forget(&self, text_hash: &str) {
        self.cache.invalidate(text_hash);
    }
}
