use crate::config::PipelineConfig;
use crate::database::VectorIndex;
use crate::document::{base_filename, corpus_files, find_document, run_blocking};
use crate::embeddings::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::ingest::{IngestReport, Ingestor};
use crate::llm::LanguageModel;
use crate::rag::{QueryOutcome, RagEngine, Retrieval};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

const STAGING_PREFIX: &str = ".upload-";

/// Request surface over the corpus directory and its index
pub struct KnowledgeBase<E, I, L> {
    ingestor: Ingestor<E, I>,
    engine: RagEngine<E, I, L>,
    index: Arc<RwLock<I>>,
}

impl<E, I, L> KnowledgeBase<E, I, L>
where
    E: EmbeddingProvider,
    I: VectorIndex,
    L: LanguageModel,
{
    pub fn new(config: PipelineConfig, embedder: E, index: I, model: L) -> Self {
        let embedder = Arc::new(embedder);
        let index = Arc::new(RwLock::new(index));

        let ingestor = Ingestor::new(
            config.corpus_root,
            config.chunking,
            config.embedding,
            embedder.clone(),
            index.clone(),
        );
        let engine = RagEngine::new(
            embedder,
            index.clone(),
            model,
            config.retrieval,
            config.embedding,
        );

        KnowledgeBase {
            ingestor,
            engine,
            index,
        }
    }

    pub fn ingestor(&self) -> &Ingestor<E, I> {
        &self.ingestor
    }

    pub fn engine(&self) -> &RagEngine<E, I, L> {
        &self.engine
    }

    /// Number of entries currently in the collection
    pub async fn indexed_chunks(&self) -> Result<usize> {
        self.index.read().await.len().await
    }

    pub async fn query(&self, text: &str) -> Result<QueryOutcome> {
        self.engine.query(text).await
    }

    pub async fn prompt(&self, text: &str) -> Result<Retrieval> {
        self.engine.create_prompt(text).await
    }

    pub async fn rebuild(&self) -> Result<IngestReport> {
        self.ingestor.generate_data_store().await
    }

    /// Base filenames of every file in the corpus, sorted and distinct
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        let root = self.ingestor.corpus_root().to_path_buf();
        run_blocking(move || {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut names = corpus_files(&root)?
                .iter()
                .map(|path| base_filename(path))
                .collect::<Result<Vec<_>>>()?;
            names.sort();
            names.dedup();
            Ok(names)
        })
        .await
    }

    /// Store a file in the corpus and index it. Returns the number of chunks
    /// stored.
    ///
    /// The bytes are staged under a hidden name next to their destination and
    /// only renamed into place once they have been loaded and embedded. A
    /// failed upload leaves the corpus and the index as they were, including
    /// any earlier version of the same file.
    pub async fn upload_document(&self, filename: &str, bytes: &[u8]) -> Result<usize> {
        validate_filename(filename)?;
        let root = self.ingestor.corpus_root().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| RagError::from_fs(e, &root.display().to_string()))?;

        let target = match self.locate(filename).await {
            Ok(existing) => existing,
            Err(RagError::DocumentNotFound(_)) => root.join(filename),
            Err(e) => return Err(e),
        };
        let staged = target.with_file_name(format!("{}{}", STAGING_PREFIX, filename));
        fs::write(&staged, bytes)
            .await
            .map_err(|e| RagError::from_fs(e, filename))?;
        info!("Staged {} ({} bytes)", filename, bytes.len());

        let result = self.ingestor.add_staged(&staged, &target, filename).await;
        if let Err(e) = &result {
            warn!("Upload of {} rejected: {}", filename, e);
            match fs::remove_file(&staged).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!("Could not remove {}: {}", staged.display(), cleanup),
            }
        }
        result
    }

    /// Remove a file from the corpus and its entries from the index
    pub async fn delete_document(&self, filename: &str) -> Result<usize> {
        validate_filename(filename)?;
        let path = self.locate(filename).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| RagError::from_fs(e, filename))?;
        self.ingestor.remove_document(filename).await
    }

    /// Raw bytes of a corpus file
    pub async fn download_document(&self, filename: &str) -> Result<Vec<u8>> {
        validate_filename(filename)?;
        let path = self.locate(filename).await?;
        fs::read(&path)
            .await
            .map_err(|e| RagError::from_fs(e, filename))
    }

    async fn locate(&self, filename: &str) -> Result<PathBuf> {
        let root = self.ingestor.corpus_root().to_path_buf();
        let name = filename.to_string();
        run_blocking(move || find_document(root, &name)).await
    }
}

/// Reject names that could escape the corpus directory or that the corpus
/// walk would hide
pub fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.trim().is_empty()
        || filename.starts_with('.')
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(RagError::InvalidDocument(format!(
            "invalid filename {:?}",
            filename
        )));
    }
    Ok(())
}
