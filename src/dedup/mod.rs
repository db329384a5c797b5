//! Content deduplication: fingerprints, an LRU accelerator and the engine.

pub mod cache;
pub mod engine;
pub mod hasher;

pub use cache::SignatureCache;
pub use engine::{DedupConfig, DedupDecision, DedupEngine, DedupError, MatchKind};
pub use hasher::{
    exact_fingerprint, ContentFingerprints, ContentHasher, HashError, MinHashSignature,
};
