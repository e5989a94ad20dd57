use super::{IndexEntry, ScoredEntry, VectorIndex, COLLECTION_NAME};
use crate::chunking::ChunkMetadata;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use log::{debug, info};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use uuid::Uuid;

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// The `knowledge_base` collection on a Qdrant server.
///
/// Writes wait for the server to apply them, so a returned call is durable.
/// Search hits carry no vector.
pub struct QdrantIndex {
    client: Qdrant,
    dimensions: u64,
}

impl QdrantIndex {
    /// Create a new Qdrant client; the collection is created on first write
    pub async fn new(config: QdrantConfig, dimensions: u64) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .map_err(|e| qdrant_error("connect to", e))?;

        Ok(QdrantIndex { client, dimensions })
    }

    /// Check if the collection exists
    async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(COLLECTION_NAME).await {
            Ok(_) => Ok(true),
            Err(QdrantError::ResponseError { status }) if status.code() == tonic::Code::NotFound => {
                Ok(false)
            }
            Err(e) => Err(qdrant_error("inspect", e)),
        }
    }

    async fn create_collection(&self) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(COLLECTION_NAME)
            .vectors_config(VectorParamsBuilder::new(self.dimensions, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| qdrant_error("create", e))?;

        info!("Created collection {}", COLLECTION_NAME);
        Ok(())
    }

    async fn count(&self, filter: Option<Filter>) -> Result<usize> {
        let mut request = CountPointsBuilder::new(COLLECTION_NAME).exact(true);
        if let Some(filter) = filter {
            request = request.filter(filter);
        }
        let response = self
            .client
            .count(request)
            .await
            .map_err(|e| qdrant_error("count points in", e))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

impl VectorIndex for QdrantIndex {
    async fn upsert(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if !self.collection_exists().await? {
            self.create_collection().await?;
        }

        let count = entries.len();
        let points = entries
            .into_iter()
            .map(|entry| {
                let payload = Payload::try_from(json!({
                    "entry_id": entry.id,
                    "text": entry.text,
                    "filename": entry.metadata.filename,
                    "start_offset": entry.metadata.start_offset,
                    "chunk_index": entry.metadata.chunk_index,
                }))
                .map_err(|e| qdrant_error("build payload for", e))?;

                Ok(PointStruct::new(point_id(&entry.id), entry.embedding, payload))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(COLLECTION_NAME, points).wait(true))
            .await
            .map_err(|e| qdrant_error("upsert points in", e))?;

        debug!("Upserted {} points", count);
        Ok(())
    }

    async fn delete_by_filename(&mut self, filename: &str) -> Result<usize> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let filter = Filter::must([Condition::matches("filename", filename.to_string())]);
        let matched = self.count(Some(filter.clone())).await?;
        if matched == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(COLLECTION_NAME)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| qdrant_error("delete points from", e))?;

        Ok(matched)
    }

    async fn similarity_search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredEntry>> {
        if k == 0 || !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let search_response = self
            .client
            .search_points(
                SearchPointsBuilder::new(COLLECTION_NAME, query.values.clone(), k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| qdrant_error("search", e))?;

        // Points without the expected payload are skipped
        let hits = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let payload = scored_point.payload;
                let text = payload.get("text")?.as_str()?.to_string();
                let id = payload.get("entry_id")?.as_str()?.to_string();
                let filename = payload.get("filename")?.as_str()?.to_string();
                let start_offset = payload
                    .get("start_offset")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0) as usize;
                let chunk_index = payload
                    .get("chunk_index")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0) as usize;

                Some(ScoredEntry {
                    entry: IndexEntry {
                        id,
                        embedding: Vec::new(),
                        text,
                        metadata: ChunkMetadata {
                            filename,
                            start_offset,
                            chunk_index,
                        },
                    },
                    score: scored_point.score,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn clear(&mut self) -> Result<()> {
        if self.collection_exists().await? {
            self.client
                .delete_collection(COLLECTION_NAME.to_string())
                .await
                .map_err(|e| qdrant_error("delete", e))?;
        }
        self.create_collection().await
    }

    async fn len(&self) -> Result<usize> {
        if !self.collection_exists().await? {
            return Ok(0);
        }
        self.count(None).await
    }
}

/// Qdrant only accepts integers or UUIDs as point ids
fn point_id(entry_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entry_id.as_bytes()).to_string()
}

fn qdrant_error(action: &str, err: impl std::fmt::Display) -> RagError {
    RagError::IndexPersistence(format!(
        "failed to {} collection {}: {}",
        action, COLLECTION_NAME, err
    ))
}
