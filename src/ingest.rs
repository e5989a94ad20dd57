use crate::chunking::{split_into_chunks, ChunkConfig};
use crate::database::{IndexEntry, VectorIndex};
use crate::document::{find_document, load_corpus, run_blocking, Document};
use crate::embeddings::{embed_chunks, EmbeddingOptions, EmbeddingProvider};
use crate::error::{RagError, Result};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Summary of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
}

/// Builds and maintains the vector index from the corpus directory.
///
/// Index mutations take the collection write lock. Rebuilds and per-document
/// updates are additionally serialised on the corpus lock so they never
/// interleave.
pub struct Ingestor<E, I> {
    corpus_root: PathBuf,
    chunking: ChunkConfig,
    embedding: EmbeddingOptions,
    embedder: Arc<E>,
    index: Arc<RwLock<I>>,
    corpus_lock: Mutex<()>,
}

impl<E: EmbeddingProvider, I: VectorIndex> Ingestor<E, I> {
    pub fn new(
        corpus_root: PathBuf,
        chunking: ChunkConfig,
        embedding: EmbeddingOptions,
        embedder: Arc<E>,
        index: Arc<RwLock<I>>,
    ) -> Self {
        Ingestor {
            corpus_root,
            chunking,
            embedding,
            embedder,
            index,
            corpus_lock: Mutex::new(()),
        }
    }

    pub fn corpus_root(&self) -> &Path {
        &self.corpus_root
    }

    /// Chunk and embed one document into index entries.
    ///
    /// Whitespace-only chunks are dropped; embedders reject empty text.
    async fn prepare(&self, document: &Document) -> Result<Vec<IndexEntry>> {
        if document.is_blank() {
            warn!("{} has no text content", document.document_id);
            return Ok(Vec::new());
        }
        let mut chunks = split_into_chunks(
            &document.content,
            &document.metadata.filename,
            &self.chunking,
        )?;
        chunks.retain(|chunk| !chunk.text.trim().is_empty());
        debug!(
            "Split {} into {} chunks",
            document.document_id,
            chunks.len()
        );

        let embeddings = embed_chunks(self.embedder.as_ref(), &chunks, &self.embedding).await?;

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                id: chunk.entry_id(),
                embedding: embedding.values,
                text: chunk.text,
                metadata: chunk.metadata,
            })
            .collect())
    }

    /// Rebuild the whole index from the corpus directory.
    ///
    /// Everything is loaded and embedded before the collection is cleared, so
    /// a load or embedding failure leaves the previous index untouched.
    pub async fn generate_data_store(&self) -> Result<IngestReport> {
        let _corpus = self.corpus_lock.lock().await;

        let root = self.corpus_root.clone();
        let documents = run_blocking(move || load_corpus(root)).await?;
        let mut entries = Vec::new();
        for document in &documents {
            entries.extend(self.prepare(document).await?);
        }
        let report = IngestReport {
            documents: documents.len(),
            chunks: entries.len(),
        };
        info!(
            "Split {} documents into {} chunks",
            report.documents, report.chunks
        );

        let mut index = self.index.write().await;
        index.clear().await?;
        if let Err(e) = index.upsert(entries).await {
            error!("Rebuild failed after clearing the collection: {}", e);
            return Err(e);
        }

        info!("Saved {} chunks to the collection", report.chunks);
        Ok(report)
    }

    /// Index one corpus file, replacing any entries it had before.
    ///
    /// Returns the number of chunks stored.
    pub async fn add_document(&self, filename: &str) -> Result<usize> {
        let _corpus = self.corpus_lock.lock().await;

        let root = self.corpus_root.clone();
        let name = filename.to_string();
        let document = run_blocking(move || {
            let path = find_document(&root, &name)?;
            Document::from_file_named(path, name)
        })
        .await?;
        let entries = self.prepare(&document).await?;
        self.replace_entries(filename, entries).await
    }

    /// Index `staged` as `filename`, then move it to `target`.
    ///
    /// The staged file must be hidden from the corpus walk. Neither the
    /// corpus nor the index changes unless loading and embedding succeed.
    pub async fn add_staged(&self, staged: &Path, target: &Path, filename: &str) -> Result<usize> {
        let _corpus = self.corpus_lock.lock().await;

        let path = staged.to_path_buf();
        let name = filename.to_string();
        let document = run_blocking(move || Document::from_file_named(path, name)).await?;
        let entries = self.prepare(&document).await?;

        tokio::fs::rename(staged, target)
            .await
            .map_err(|e| RagError::from_fs(e, filename))?;
        self.replace_entries(filename, entries).await
    }

    async fn replace_entries(&self, filename: &str, entries: Vec<IndexEntry>) -> Result<usize> {
        let count = entries.len();
        let mut index = self.index.write().await;
        let replaced = index.delete_by_filename(filename).await?;
        index.upsert(entries).await?;

        info!(
            "Indexed {} as {} chunks ({} replaced)",
            filename, count, replaced
        );
        Ok(count)
    }

    /// Drop every entry of `filename`; 0 means nothing was indexed for it
    pub async fn remove_document(&self, filename: &str) -> Result<usize> {
        let _corpus = self.corpus_lock.lock().await;

        let removed = self.index.write().await.delete_by_filename(filename).await?;
        if removed == 0 {
            info!("No entries to remove for {}", filename);
        } else {
            info!("Removed {} entries for {}", removed, filename);
        }
        Ok(removed)
    }
}
