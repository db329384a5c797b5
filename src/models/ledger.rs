//! Ledger entry model: the per-URL crawl and processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open key/value map for source-specific extras.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key recording which URL a skipped duplicate matched.
pub const DUPLICATE_OF_KEY: &str = "duplicate_of";

/// Metadata key holding the outcome a forced reset replaced.
pub const PREVIOUS_OUTCOME_KEY: &str = "previous_outcome";

/// Lifecycle state of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    Discovered,
    Fetching,
    Fetched,
    Processed,
    Failed,
    SkippedDuplicate,
}

impl LedgerState {
    pub const ALL: [LedgerState; 6] = [
        LedgerState::Discovered,
        LedgerState::Fetching,
        LedgerState::Fetched,
        LedgerState::Processed,
        LedgerState::Failed,
        LedgerState::SkippedDuplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::SkippedDuplicate => "skipped_duplicate",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "fetching" => Some(Self::Fetching),
            "fetched" => Some(Self::Fetched),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "skipped_duplicate" => Some(Self::SkippedDuplicate),
            _ => None,
        }
    }

    /// Whether the entry's content has been fully handled.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Processed | Self::SkippedDuplicate)
    }

    /// Whether the regular lifecycle allows moving from `self` to `next`.
    ///
    /// `Failed -> Discovered` is the only backwards step; the stale and force
    /// resets are separate ledger operations and bypass this table.
    pub fn can_transition_to(&self, next: LedgerState) -> bool {
        use LedgerState::*;
        matches!(
            (self, next),
            (Discovered, Fetching)
                | (Fetching, Fetched)
                | (Fetching, Failed)
                | (Fetched, Processed)
                | (Discovered, SkippedDuplicate)
                | (Fetched, SkippedDuplicate)
                | (Failed, Discovered)
        )
    }
}

impl std::fmt::Display for LedgerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the crawl ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub url: String,
    pub source: String,
    pub state: LedgerState,
    pub discovered_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    pub silver_id: Option<String>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The URL this entry was recorded as a duplicate of, if any.
    pub fn duplicate_of(&self) -> Option<&str> {
        self.metadata.get(DUPLICATE_OF_KEY).and_then(|v| v.as_str())
    }

    /// The outcome a forced reset replaced, while the entry is being redone.
    pub fn previous_outcome(&self) -> Option<PreviousOutcome> {
        self.metadata
            .get(PREVIOUS_OUTCOME_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Validators to send with the next fetch.
    ///
    /// Only an entry with a previous outcome to fall back on can make use of
    /// a 304, so every other entry gets a full fetch.
    pub fn conditional_headers(&self) -> ConditionalHeaders {
        if self.previous_outcome().is_none() {
            return ConditionalHeaders::default();
        }
        ConditionalHeaders {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

/// What a finished entry looked like before a forced reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousOutcome {
    pub state: LedgerState,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    pub silver_id: Option<String>,
    pub duplicate_of: Option<String>,
}

/// Cached validators for a conditional GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ConditionalHeaders {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Outcome of one fetch attempt, as recorded by `record_fetch_result`.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    /// HTTP status, if a response was received at all.
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
    pub text_hash: Option<String>,
    pub minhash_signature: Option<String>,
    /// Transport or adapter failure message; forces the failure path.
    pub error: Option<String>,
}

impl FetchResult {
    /// A result for a request that never produced a response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether this result moves the entry to `Fetched`.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && matches!(self.http_status, Some(s) if (200..300).contains(&s))
    }

    /// Whether the server reported the stored validators still current.
    pub fn is_not_modified(&self) -> bool {
        self.error.is_none() && self.http_status == Some(304)
    }

    /// Error message stored on the failure path.
    pub fn failure_message(&self) -> String {
        match (&self.error, self.http_status) {
            (Some(e), _) => e.clone(),
            (None, Some(status)) => format!("HTTP {status}"),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Aggregate ledger state for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub source: String,
    pub total: u64,
    pub discovered: u64,
    pub fetching: u64,
    pub fetched: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped_duplicate: u64,
}

impl LedgerStats {
    pub fn pending(&self) -> u64 {
        self.discovered + self.fetching + self.fetched
    }
}
