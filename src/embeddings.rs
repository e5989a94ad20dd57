use crate::chunking::TextChunk;
use crate::error::{RagError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub mod mock;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding { values }
    }
}

/// Maps text to a fixed-length vector
#[allow(async_fn_in_trait)]
pub trait EmbeddingProvider {
    /// Stable identifier for the provider/model
    fn provider_id(&self) -> &str;

    /// Generate embedding for a text
    async fn get_embedding(&self, text: &str) -> Result<Embedding>;
}

/// Limits applied to calls into an embedding provider
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingOptions {
    /// Maximum number of in-flight requests for one batch
    pub max_concurrency: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        EmbeddingOptions {
            max_concurrency: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Await a remote call, failing with [`RagError::Timeout`] once `after` elapses
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| RagError::Timeout { operation, after })?
}

/// Embed a single text under the configured timeout
pub async fn embed_text<P: EmbeddingProvider>(
    provider: &P,
    text: &str,
    options: &EmbeddingOptions,
) -> Result<Embedding> {
    with_timeout("embedding", options.timeout, provider.get_embedding(text)).await
}

/// Embed every chunk, issuing up to `max_concurrency` requests at once.
///
/// Output order matches input order. The first failure aborts the batch.
pub async fn embed_chunks<P: EmbeddingProvider>(
    provider: &P,
    chunks: &[TextChunk],
    options: &EmbeddingOptions,
) -> Result<Vec<Embedding>> {
    stream::iter(chunks)
        .map(|chunk| embed_text(provider, &chunk.text, options))
        .buffered(options.max_concurrency.max(1))
        .try_collect()
        .await
}
