//! Adapter-facing records: discovered candidates and extracted text.

use serde::{Deserialize, Serialize};

use super::ledger::{ConditionalHeaders, Metadata};

/// Metadata key a listing (sitemap, feed) may use for a page's current ETag.
pub const ETAG_HINT_KEY: &str = "etag";
/// Metadata key a listing may use for a page's current Last-Modified.
pub const LAST_MODIFIED_HINT_KEY: &str = "last_modified";

/// A candidate URL yielded by a source adapter's discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Validators the listing reported for this URL, if any.
    pub fn validator_hints(&self) -> ConditionalHeaders {
        let hint = |key: &str| {
            self.metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        ConditionalHeaders {
            etag: hint(ETAG_HINT_KEY),
            last_modified: hint(LAST_MODIFIED_HINT_KEY),
        }
    }
}

/// Extracted text produced by an adapter, before dedup and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: String,
    pub text: String,
    pub url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RawRecord {
    pub fn new(url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            url: url.into(),
            metadata: Metadata::new(),
        }
    }
}
