pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod ingest;
pub mod knowledge_base;
pub mod llm;
pub mod openrouter;
pub mod rag;

pub use error::{RagError, Result};
