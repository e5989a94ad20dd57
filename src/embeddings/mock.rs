//! Deterministic embedder for tests and offline runs.
//!
//! Texts are lower-cased, split into alphanumeric words and feature-hashed
//! into a fixed number of buckets, then L2-normalised. Texts sharing words
//! get a high cosine similarity; texts sharing none score close to zero.

use super::{Embedding, EmbeddingProvider};
use crate::error::{RagError, Result};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        HashingEmbedder {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous form of [`EmbeddingProvider::get_embedding`]
    pub fn embed(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) % self.dimensions as u64;
            values[bucket as usize] += 1.0;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Embedding { values }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        HashingEmbedder::new(1024)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn provider_id(&self) -> &str {
        "mock:hashing"
    }

    async fn get_embedding(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("cannot embed empty text".to_string()));
        }
        Ok(self.embed(text))
    }
}

// Stable across platforms and releases, unlike DefaultHasher
fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}
