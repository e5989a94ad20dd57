//! Startup configuration.
//!
//! `AppConfig::from_env` is the only place that reads the process
//! environment; components receive the resulting values in their
//! constructors.

use crate::chunking::{ChunkConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::database::{IndexConfig, QdrantConfig};
use crate::embeddings::EmbeddingOptions;
use crate::error::{RagError, Result};
use crate::gemini::{GeminiConfig, DEFAULT_EMBEDDINGS_URL, DEFAULT_GENERATE_URL};
use crate::llm::RetryPolicy;
use crate::openrouter::{self, OpenRouterConfig};
use crate::rag::{RetrievalConfig, DEFAULT_MIN_RELEVANCE, DEFAULT_TOP_K};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Parameters shared by the ingestion and retrieval pipelines
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub corpus_root: PathBuf,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingOptions,
}

impl PipelineConfig {
    pub fn new(corpus_root: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            corpus_root: corpus_root.into(),
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingOptions::default(),
        }
    }
}

/// Which service generates answers
#[derive(Debug, Clone)]
pub enum LlmConfig {
    Gemini,
    OpenRouter(OpenRouterConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub index: IndexConfig,
    pub gemini: GeminiConfig,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build the configuration from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let vars = Vars(vars);

        let chunking = ChunkConfig::new(
            vars.parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            vars.parse("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        )?;
        let min_relevance: f32 = vars.parse("MIN_RELEVANCE", DEFAULT_MIN_RELEVANCE)?;
        // NaN would let every comparison against the threshold pass
        if !min_relevance.is_finite() {
            return Err(RagError::InvalidConfig(format!(
                "MIN_RELEVANCE must be a finite number, got {}",
                min_relevance
            )));
        }
        let retrieval = RetrievalConfig {
            top_k: vars.parse("TOP_K", DEFAULT_TOP_K)?,
            min_relevance,
        };
        let timeout = Duration::from_secs(vars.parse("REQUEST_TIMEOUT_SECS", 30u64)?);
        let embedding = EmbeddingOptions {
            max_concurrency: vars.parse("EMBED_CONCURRENCY", 4usize)?,
            timeout,
        };

        let pipeline = PipelineConfig {
            corpus_root: PathBuf::from(vars.required("DATA_PATH")?),
            chunking,
            retrieval,
            embedding,
        };

        let index = match vars.get("INDEX_BACKEND").unwrap_or("local") {
            "local" => IndexConfig::Local {
                root: PathBuf::from(vars.required("CHROMA_PATH")?),
            },
            "qdrant" => IndexConfig::Qdrant(QdrantConfig {
                url: vars.required("QDRANT_URL")?,
                api_key: vars.get("QDRANT_API_KEY").map(str::to_string),
            }),
            other => {
                return Err(RagError::InvalidConfig(format!(
                    "INDEX_BACKEND must be local or qdrant, got {}",
                    other
                )))
            }
        };

        let gemini = GeminiConfig {
            api_key: vars.required("GEMINI_API_KEY")?,
            embeddings_url: vars.get_or("GEMINI_EMBEDDINGS_URL", DEFAULT_EMBEDDINGS_URL),
            generate_url: vars.get_or("GEMINI_GENERATE_URL", DEFAULT_GENERATE_URL),
        };

        let llm = match vars.get("LLM_PROVIDER").unwrap_or("gemini") {
            "gemini" => LlmConfig::Gemini,
            "openrouter" => LlmConfig::OpenRouter(OpenRouterConfig {
                api_key: vars.required("OPENROUTER_API_KEY")?,
                base_url: vars.get_or("OPENROUTER_BASE_URL", openrouter::DEFAULT_BASE_URL),
                model: vars.get_or("OPENROUTER_MODEL", openrouter::DEFAULT_MODEL),
            }),
            other => {
                return Err(RagError::InvalidConfig(format!(
                    "LLM_PROVIDER must be gemini or openrouter, got {}",
                    other
                )))
            }
        };

        let retry = RetryPolicy {
            max_attempts: vars.parse("LLM_MAX_ATTEMPTS", 3u32)?,
            timeout,
            ..RetryPolicy::default()
        };

        Ok(AppConfig {
            pipeline,
            index,
            gemini,
            llm,
            retry,
        })
    }
}

struct Vars(HashMap<String, String>);

impl Vars {
    /// Non-empty value of `key`
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| RagError::InvalidConfig(format!("missing {}", key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| RagError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(&[
            ("DATA_PATH", "data"),
            ("CHROMA_PATH", "chroma"),
            ("GEMINI_API_KEY", "key"),
        ]))
        .unwrap();

        assert_eq!(config.pipeline.corpus_root, PathBuf::from("data"));
        assert_eq!(config.pipeline.chunking, ChunkConfig::default());
        assert_eq!(config.pipeline.retrieval.top_k, 4);
        assert!(matches!(config.index, IndexConfig::Local { ref root } if root == &PathBuf::from("chroma")));
        assert!(matches!(config.llm, LlmConfig::Gemini));
        assert_eq!(config.gemini.embeddings_url, DEFAULT_EMBEDDINGS_URL);
    }

    #[test]
    fn test_qdrant_and_openrouter() {
        let config = AppConfig::from_vars(vars(&[
            ("DATA_PATH", "data"),
            ("INDEX_BACKEND", "qdrant"),
            ("QDRANT_URL", "http://localhost:6334"),
            ("GEMINI_API_KEY", "key"),
            ("LLM_PROVIDER", "openrouter"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("MIN_RELEVANCE", "0.5"),
        ]))
        .unwrap();

        assert!(matches!(config.index, IndexConfig::Qdrant(ref q) if q.api_key.is_none()));
        match config.llm {
            LlmConfig::OpenRouter(ref or) => assert_eq!(or.model, openrouter::DEFAULT_MODEL),
            LlmConfig::Gemini => panic!("expected openrouter"),
        }
        assert_eq!(config.pipeline.retrieval.min_relevance, 0.5);
    }

    #[test]
    fn test_invalid_values() {
        let base = [("DATA_PATH", "d"), ("CHROMA_PATH", "c"), ("GEMINI_API_KEY", "k")];

        let mut bad_overlap = vars(&base);
        bad_overlap.insert("CHUNK_OVERLAP".to_string(), "1000".to_string());
        assert!(AppConfig::from_vars(bad_overlap).is_err());

        let mut bad_number = vars(&base);
        bad_number.insert("TOP_K".to_string(), "four".to_string());
        assert!(AppConfig::from_vars(bad_number).is_err());

        for not_finite in ["NaN", "inf", "-inf"] {
            let mut bad_threshold = vars(&base);
            bad_threshold.insert("MIN_RELEVANCE".to_string(), not_finite.to_string());
            assert!(
                matches!(
                    AppConfig::from_vars(bad_threshold),
                    Err(RagError::InvalidConfig(_))
                ),
                "{not_finite} should be rejected"
            );
        }

        assert!(AppConfig::from_vars(vars(&[("DATA_PATH", "d")])).is_err());
    }
}
