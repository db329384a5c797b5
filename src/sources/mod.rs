//! Source adapters: the adapter contract, typed configs, the constructor
//! registry and per-source rate limiting.

pub mod adapter;
pub mod config;
pub mod rate_limiter;
pub mod registry;

pub use adapter::{AdapterError, FetchResponse, SourceAdapter};
pub use config::{AdapterConfig, SourceConfig, SourceKind, SourceRateLimit};
pub use rate_limiter::{RateLimitConfig, RateLimiter, SourceStats};
pub use registry::{AdapterConstructor, AdapterRegistry, RegistryError};
