use rayon::prelude::*;
use sha2::{Digest, Sha256};

/// Service for computing content digests of image bytes.
/// This is used for exact duplicate detection.
#[derive(Debug, Clone)]
pub struct HashService;

impl HashService {
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 content digest of a byte buffer, as lowercase hex.
    pub fn digest(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Digest several buffers in parallel.
    /// Returns a vector of (label, digest) tuples keyed by the caller's labels.
    pub fn digest_batch(&self, items: &[(String, Vec<u8>)]) -> Vec<(String, String)> {
        items
            .par_iter()
            .map(|(label, bytes)| (label.clone(), self.digest(bytes)))
            .collect()
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}
