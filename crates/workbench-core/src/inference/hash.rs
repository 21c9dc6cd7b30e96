//! FNV-1a feature-hashing inference backend for offline runs.
//!
//! Embeddings are character n-gram counts hashed into a fixed number of
//! signed buckets and L2-normalized. Structured generation is not available,
//! so cluster naming always takes its fallback path with this backend.

use super::{EMBEDDING_DIMENSION, InferenceError, InferenceFuture, InferenceInfo, InferenceService};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

#[derive(Debug, Clone)]
pub struct HashInference {
    dimension: usize,
    ngram_range: (usize, usize),
}

impl HashInference {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "dimension must be > 0");
        Self {
            dimension,
            ngram_range: (3, 4),
        }
    }

    #[must_use]
    pub fn with_ngram_range(mut self, min: usize, max: usize) -> Self {
        assert!(min > 0 && min <= max);
        self.ngram_range = (min, max);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();
        let chars: Vec<char> = lower.chars().collect();
        if chars.is_empty() {
            return vector;
        }
        for n in self.ngram_range.0..=self.ngram_range.1 {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let ngram: String = window.iter().collect();
                let h = fnv1a(ngram.as_bytes());
                let bucket = (h as usize) % self.dimension;
                let sign = if (h >> 32) & 1 == 0 { 1.0f32 } else { -1.0f32 };
                vector[bucket] += sign;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashInference {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSION)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) -> f32 {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

impl InferenceService for HashInference {
    fn info(&self) -> InferenceInfo {
        InferenceInfo {
            backend: "hash".to_string(),
            embedding_model: format!("fnv1a-hash-{}", self.dimension),
            generation_model: "none".to_string(),
        }
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> InferenceFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move { Ok(texts.iter().map(|t| self.embed_text(t)).collect()) })
    }

    fn generate_structured<'a>(
        &'a self,
        _prompt: &'a str,
        _schema: &'a serde_json::Value,
    ) -> InferenceFuture<'a, String> {
        Box::pin(async move {
            Err(InferenceError::Unsupported {
                backend: "hash".to_string(),
                operation: "generate_structured",
            })
        })
    }
}
