use super::{cosine_similarity, IndexEntry, ScoredEntry, VectorIndex, COLLECTION_NAME};
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;

const COLLECTION_FILE: &str = "collection.json";

/// On-disk representation of the collection
#[derive(Serialize, Deserialize)]
struct PersistedCollection {
    name: String,
    /// Provider id of the embedder that produced the vectors
    #[serde(default)]
    embedder: String,
    entries: Vec<IndexEntry>,
}

/// Vector index persisted as a JSON file under `<root>/knowledge_base/`.
///
/// Search is a linear scan. Deletion by filename goes through an auxiliary
/// `filename -> ids` map so it costs O(matches).
pub struct LocalIndex {
    dir: PathBuf,
    embedder: String,
    entries: BTreeMap<String, IndexEntry>,
    by_filename: HashMap<String, HashSet<String>>,
}

impl LocalIndex {
    /// Open the collection under `root` for vectors from `embedder`, loading
    /// it if it was persisted before.
    ///
    /// A collection written by a different embedder is refused: its vectors
    /// are not comparable with new queries.
    pub async fn open<P: AsRef<Path>>(root: P, embedder: &str) -> Result<Self> {
        let mut index = LocalIndex {
            dir: root.as_ref().join(COLLECTION_NAME),
            embedder: embedder.to_string(),
            entries: BTreeMap::new(),
            by_filename: HashMap::new(),
        };
        index.load().await?;
        info!(
            "Opened collection {} with {} entries",
            index.dir.display(),
            index.entries.len()
        );
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn file(&self) -> PathBuf {
        self.dir.join(COLLECTION_FILE)
    }

    async fn load(&mut self) -> Result<()> {
        let raw = match fs::read(self.file()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(persistence_error("read", &self.file(), e)),
        };
        let persisted: PersistedCollection = serde_json::from_slice(&raw)
            .map_err(|e| persistence_error("decode", &self.file(), e))?;

        // Collections written before the embedder was recorded carry ""
        if !persisted.embedder.is_empty() && persisted.embedder != self.embedder {
            return Err(RagError::InvalidConfig(format!(
                "collection {} was built with embedder {}, not {}; rebuild it",
                self.dir.display(),
                persisted.embedder,
                self.embedder
            )));
        }

        for entry in persisted.entries {
            self.insert(entry);
        }
        Ok(())
    }

    /// Write the collection to a temporary file and rename it into place
    async fn persist(&self) -> Result<()> {
        let file = self.file();
        let tmp = self.dir.join(format!("{}.tmp", COLLECTION_FILE));

        let persisted = PersistedCollection {
            name: COLLECTION_NAME.to_string(),
            embedder: self.embedder.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        let raw = serde_json::to_vec(&persisted)
            .map_err(|e| persistence_error("encode", &file, e))?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence_error("create", &self.dir, e))?;
        fs::write(&tmp, raw)
            .await
            .map_err(|e| persistence_error("write", &tmp, e))?;
        fs::rename(&tmp, &file)
            .await
            .map_err(|e| persistence_error("rename", &file, e))?;

        debug!("Persisted {} entries to {}", self.entries.len(), file.display());
        Ok(())
    }

    /// Apply `mutate` and persist, restoring the previous in-memory state if
    /// the write fails
    async fn commit<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Self),
    {
        let snapshot = (self.entries.clone(), self.by_filename.clone());
        mutate(self);
        if let Err(e) = self.persist().await {
            warn!("Rolling back collection after failed write: {}", e);
            (self.entries, self.by_filename) = snapshot;
            return Err(e);
        }
        Ok(())
    }

    fn insert(&mut self, entry: IndexEntry) {
        if let Some(previous) = self.entries.get(&entry.id) {
            if previous.metadata.filename != entry.metadata.filename {
                let filename = previous.metadata.filename.clone();
                self.unlink(&filename, &entry.id);
            }
        }
        self.by_filename
            .entry(entry.metadata.filename.clone())
            .or_default()
            .insert(entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }

    fn unlink(&mut self, filename: &str, id: &str) {
        if let Some(ids) = self.by_filename.get_mut(filename) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_filename.remove(filename);
            }
        }
    }

    fn dimensions(&self) -> Option<usize> {
        self.entries.values().next().map(|e| e.embedding.len())
    }
}

impl VectorIndex for LocalIndex {
    async fn upsert(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let expected = self
            .dimensions()
            .unwrap_or_else(|| entries[0].embedding.len());
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != expected) {
            return Err(RagError::Embedding(format!(
                "entry {} has {} dimensions, collection uses {}",
                bad.id,
                bad.embedding.len(),
                expected
            )));
        }

        let count = entries.len();
        self.commit(|index| {
            for entry in entries {
                index.insert(entry);
            }
        })
        .await?;
        debug!("Upserted {} entries", count);
        Ok(())
    }

    async fn delete_by_filename(&mut self, filename: &str) -> Result<usize> {
        let Some(ids) = self.by_filename.get(filename).cloned() else {
            return Ok(0);
        };
        self.commit(|index| {
            index.by_filename.remove(filename);
            for id in &ids {
                index.entries.remove(id);
            }
        })
        .await?;
        Ok(ids.len())
    }

    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredEntry>> {
        let mut hits: Vec<ScoredEntry> = self
            .entries
            .values()
            .map(|entry| ScoredEntry {
                score: cosine_similarity(&query.values, &entry.embedding),
                entry: entry.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn clear(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(persistence_error("remove", &self.dir, e)),
        }
        self.entries.clear();
        self.by_filename.clear();
        self.persist().await?;
        info!("Recreated empty collection at {}", self.dir.display());
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

fn persistence_error(action: &str, path: &Path, err: impl std::fmt::Display) -> RagError {
    RagError::IndexPersistence(format!("failed to {} {}: {}", action, path.display(), err))
}
