//! Content fingerprints: an exact SHA-256 hash and a MinHash sketch.
//!
//! Both are pure functions of the text. Nothing here depends on which
//! source produced the text or in which order documents arrive.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default number of words per shingle.
pub const DEFAULT_SHINGLE_SIZE: usize = 3;

/// Default number of MinHash permutations (signature length).
pub const DEFAULT_NUM_PERMUTATIONS: usize = 128;

/// 2^61 - 1, the modulus of the permutation family.
const MERSENNE_PRIME: u64 = (1 << 61) - 1;

/// blake3 key-derivation context for permutation coefficients.
const PERMUTATION_CONTEXT: &str = "corpus-ingest minhash permutations v1";

/// Errors raised while fingerprinting text or decoding stored signatures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("text contains no words to shingle")]
    EmptyText,

    #[error("invalid minhash signature encoding: {0}")]
    InvalidSignature(String),

    #[error("invalid hasher parameters: {0}")]
    InvalidParameters(String),
}

/// Collapse all whitespace runs to single spaces and trim the ends.
///
/// Case is preserved.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the normalized text.
pub fn exact_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Fixed-size MinHash sketch of a text's word shingles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature {
    values: Vec<u64>,
}

impl MinHashSignature {
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Estimated Jaccard similarity: the fraction of agreeing slots.
    ///
    /// Returns `None` when the signatures were built with different
    /// permutation counts and cannot be compared.
    pub fn jaccard(&self, other: &MinHashSignature) -> Option<f64> {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return None;
        }
        let equal = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();
        Some(equal as f64 / self.values.len() as f64)
    }

    /// Hex encoding used for the ledger's `minhash_signature` column.
    pub fn to_hex(&self) -> String {
        let bytes: Vec<u8> = self.values.iter().flat_map(|v| v.to_be_bytes()).collect();
        hex::encode(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(encoded).map_err(|e| HashError::InvalidSignature(e.to_string()))?;
        if bytes.is_empty() || bytes.len() % 8 != 0 {
            return Err(HashError::InvalidSignature(format!(
                "expected a non-empty multiple of 8 bytes, got {}",
                bytes.len()
            )));
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                u64::from_be_bytes(buf)
            })
            .collect();
        Ok(Self { values })
    }
}

/// Both fingerprints of one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFingerprints {
    pub text_hash: String,
    /// `None` when near-duplicate detection is disabled.
    pub signature: Option<MinHashSignature>,
}

/// Computes exact and near-duplicate fingerprints with fixed parameters.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    shingle_size: usize,
    coefficients: Vec<(u64, u64)>,
}

impl ContentHasher {
    pub fn new(shingle_size: usize, num_permutations: usize) -> Result<Self, HashError> {
        if shingle_size == 0 {
            return Err(HashError::InvalidParameters(
                "shingle size must be at least 1".to_string(),
            ));
        }
        if num_permutations == 0 {
            return Err(HashError::InvalidParameters(
                "permutation count must be at least 1".to_string(),
            ));
        }

        let coefficients = (0..num_permutations as u64)
            .map(|i| {
                let mut hasher = blake3::Hasher::new_derive_key(PERMUTATION_CONTEXT);
                hasher.update(&i.to_le_bytes());
                let digest = hasher.finalize();
                let bytes = digest.as_bytes();
                let a = read_u64(bytes, 0) % (MERSENNE_PRIME - 1) + 1;
                let b = read_u64(bytes, 8) % MERSENNE_PRIME;
                (a, b)
            })
            .collect();

        Ok(Self {
            shingle_size,
            coefficients,
        })
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    pub fn num_permutations(&self) -> usize {
        self.coefficients.len()
    }

    pub fn exact_fingerprint(&self, text: &str) -> String {
        exact_fingerprint(text)
    }

    /// Overlapping lowercase word shingles of the text.
    ///
    /// Texts shorter than one shingle become a single shingle of all words.
    pub fn shingles(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }
        if words.len() < self.shingle_size {
            return vec![words.join(" ")];
        }
        words
            .windows(self.shingle_size)
            .map(|w| w.join(" "))
            .collect()
    }

    pub fn near_signature(&self, text: &str) -> Result<MinHashSignature, HashError> {
        let shingles = self.shingles(text);
        if shingles.is_empty() {
            return Err(HashError::EmptyText);
        }

        let mut values = vec![u64::MAX; self.coefficients.len()];
        for shingle in &shingles {
            let x = read_u64(blake3::hash(shingle.as_bytes()).as_bytes(), 0) % MERSENNE_PRIME;
            for (slot, &(a, b)) in values.iter_mut().zip(self.coefficients.iter()) {
                let permuted =
                    ((a as u128 * x as u128 + b as u128) % MERSENNE_PRIME as u128) as u64;
                if permuted < *slot {
                    *slot = permuted;
                }
            }
        }

        Ok(MinHashSignature { values })
    }
}

fn read_u64(bytes: &[u8; 32], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
