//! Vector index abstraction and its backends.
//!
//! Relevance scores are cosine similarity in `[-1, 1]` for every backend,
//! higher meaning more relevant.

use crate::chunking::ChunkMetadata;
use crate::embeddings::Embedding;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod local;
pub mod qdrant;

pub use local::LocalIndex;
pub use qdrant::{QdrantConfig, QdrantIndex};

/// Name of the persistent namespace holding the corpus
pub const COLLECTION_NAME: &str = "knowledge_base";

/// A stored chunk: id, vector, text and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique across the collection
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A search hit with its relevance score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Persistent store of embedded chunks.
///
/// Every mutating call has been persisted when it returns.
#[allow(async_fn_in_trait)]
pub trait VectorIndex {
    /// Add entries, overwriting any with the same id
    async fn upsert(&mut self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Remove every entry whose metadata filename equals `filename`
    async fn delete_by_filename(&mut self, filename: &str) -> Result<usize>;

    /// Up to `k` entries ordered by decreasing relevance
    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredEntry>>;

    /// Destroy and recreate the collection empty
    async fn clear(&mut self) -> Result<()>;

    /// Number of stored entries
    async fn len(&self) -> Result<usize>;
}

/// Where the collection lives
#[derive(Debug, Clone)]
pub enum IndexConfig {
    /// JSON-persisted collection under this root directory
    Local { root: PathBuf },
    Qdrant(QdrantConfig),
}

/// Index chosen at startup from configuration
pub enum IndexBackend {
    Local(LocalIndex),
    Qdrant(QdrantIndex),
}

impl IndexBackend {
    /// `embedder` is the provider id of the embedder feeding the index;
    /// `dimensions` sizes a Qdrant collection created on first write.
    pub async fn open(config: IndexConfig, embedder: &str, dimensions: u64) -> Result<Self> {
        match config {
            IndexConfig::Local { root } => Ok(IndexBackend::Local(
                LocalIndex::open(root, embedder).await?,
            )),
            IndexConfig::Qdrant(config) => Ok(IndexBackend::Qdrant(
                QdrantIndex::new(config, dimensions).await?,
            )),
        }
    }
}

impl VectorIndex for IndexBackend {
    async fn upsert(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        match self {
            IndexBackend::Local(index) => index.upsert(entries).await,
            IndexBackend::Qdrant(index) => index.upsert(entries).await,
        }
    }

    async fn delete_by_filename(&mut self, filename: &str) -> Result<usize> {
        match self {
            IndexBackend::Local(index) => index.delete_by_filename(filename).await,
            IndexBackend::Qdrant(index) => index.delete_by_filename(filename).await,
        }
    }

    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredEntry>> {
        match self {
            IndexBackend::Local(index) => index.similarity_search(query, k).await,
            IndexBackend::Qdrant(index) => index.similarity_search(query, k).await,
        }
    }

    async fn clear(&mut self) -> Result<()> {
        match self {
            IndexBackend::Local(index) => index.clear().await,
            IndexBackend::Qdrant(index) => index.clear().await,
        }
    }

    async fn len(&self) -> Result<usize> {
        match self {
            IndexBackend::Local(index) => index.len().await,
            IndexBackend::Qdrant(index) => index.len().await,
        }
    }
}

/// Cosine similarity; 0 when either vector is zero or the lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
