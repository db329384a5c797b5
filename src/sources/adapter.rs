//! The contract every source adapter implements.
//!
//! Adapters own discovery, transport and parsing for one source. The core
//! never touches sockets: it hands an adapter a URL plus the conditional
//! headers remembered in the ledger and gets back a status, headers and body.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use super::config::{SourceKind, SourceRateLimit};
use crate::models::{ConditionalHeaders, DiscoveredUrl, RawRecord};

/// Failures reported by an adapter. Both affect a single record only.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network, timeout or other transport failure.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// A fetched body could not be parsed into a record.
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// A response as seen by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    /// Declared `Content-Length`, else the body size.
    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.body.len() as u64)
    }
}

/// One source's discovery, transport and extraction.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Logical source name recorded on ledger entries and runs.
    fn source(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Configuration recorded in the run audit.
    fn config_snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn rate_limit(&self) -> SourceRateLimit {
        SourceRateLimit::default()
    }

    /// Per-source override of the fetch worker count.
    fn max_workers(&self) -> Option<usize> {
        None
    }

    /// Lazily yield candidate URLs. The stream may be unbounded.
    fn discover(&self) -> BoxStream<'_, Result<DiscoveredUrl, AdapterError>>;

    async fn fetch(
        &self,
        url: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<FetchResponse, AdapterError>;

    fn extract(&self, url: &str, body: &[u8]) -> Result<RawRecord, AdapterError>;
}
