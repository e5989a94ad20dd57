use crate::database::{ScoredEntry, VectorIndex};
use crate::embeddings::{embed_text, EmbeddingOptions, EmbeddingProvider};
use crate::error::Result;
use crate::llm::LanguageModel;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_TOP_K: usize = 4;
/// Minimum cosine similarity of the best hit for a query to be answerable
pub const DEFAULT_MIN_RELEVANCE: f32 = 0.3;
/// Placed between retrieved chunks in the assembled context
pub const CONTEXT_SEPARATOR: &str = "\n\n--\n\n";

/// Search parameters for a query
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// A query is answerable iff its best hit scores at least this much
    pub min_relevance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            top_k: DEFAULT_TOP_K,
            min_relevance: DEFAULT_MIN_RELEVANCE,
        }
    }
}

/// Why a query has no answerable context
#[derive(Debug, Clone, PartialEq)]
pub enum NoResultReason {
    EmptyQuery,
    /// The search returned nothing, e.g. the collection is empty
    NoMatches,
    BelowThreshold { best_score: f32, min_relevance: f32 },
}

/// A rendered prompt and the hits it was built from, most relevant first
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub prompt: String,
    pub sources: Vec<ScoredEntry>,
}

/// Result of the retrieval steps alone
#[derive(Debug, Clone)]
pub enum Retrieval {
    Context(RetrievedContext),
    NoResult(NoResultReason),
}

/// Result of a full query
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answer {
        /// The model's response, verbatim
        answer: String,
        prompt: String,
        sources: Vec<ScoredEntry>,
    },
    NoResult(NoResultReason),
}

/// Join chunk texts in rank order
pub fn build_context(hits: &[ScoredEntry]) -> String {
    hits.iter()
        .map(|hit| hit.entry.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Fill the answer-from-context template
pub fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "\nAnswer the question using only the following context:\n{}\n\
         -------------------------------------------------------------\n\
         Answer this question based on the context above: {}\n",
        context, question
    )
}

/// RAG (Retrieval-Augmented Generation) engine
///
/// Stateless across queries; reads the collection under its read lock.
pub struct RagEngine<E, I, L> {
    embedder: Arc<E>,
    index: Arc<RwLock<I>>,
    model: L,
    retrieval: RetrievalConfig,
    embedding: EmbeddingOptions,
}

impl<E, I, L> RagEngine<E, I, L>
where
    E: EmbeddingProvider,
    I: VectorIndex,
    L: LanguageModel,
{
    /// Create a new RAG engine
    pub fn new(
        embedder: Arc<E>,
        index: Arc<RwLock<I>>,
        model: L,
        retrieval: RetrievalConfig,
        embedding: EmbeddingOptions,
    ) -> Self {
        RagEngine {
            embedder,
            index,
            model,
            retrieval,
            embedding,
        }
    }

    /// Ranked hits for `question`, without relevance filtering
    pub async fn search(&self, question: &str) -> Result<Vec<ScoredEntry>> {
        let query = embed_text(self.embedder.as_ref(), question, &self.embedding).await?;
        let index = self.index.read().await;
        index.similarity_search(&query, self.retrieval.top_k).await
    }

    /// Embed, search, filter and render the prompt for `question`
    pub async fn create_prompt(&self, question: &str) -> Result<Retrieval> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Retrieval::NoResult(NoResultReason::EmptyQuery));
        }

        let hits = self.search(question).await?;

        let Some(best) = hits.first() else {
            info!("Unable to find matching results for {:?}", question);
            return Ok(Retrieval::NoResult(NoResultReason::NoMatches));
        };
        if best.score < self.retrieval.min_relevance {
            info!(
                "Best match for {:?} scored {:.3}, below {:.3}",
                question, best.score, self.retrieval.min_relevance
            );
            return Ok(Retrieval::NoResult(NoResultReason::BelowThreshold {
                best_score: best.score,
                min_relevance: self.retrieval.min_relevance,
            }));
        }

        let prompt = render_prompt(&build_context(&hits), question);
        debug!("Rendered prompt:\n{}", prompt);

        Ok(Retrieval::Context(RetrievedContext {
            prompt,
            sources: hits,
        }))
    }

    /// Answer `question` from the indexed corpus
    pub async fn query(&self, question: &str) -> Result<QueryOutcome> {
        let context = match self.create_prompt(question).await? {
            Retrieval::Context(context) => context,
            Retrieval::NoResult(reason) => return Ok(QueryOutcome::NoResult(reason)),
        };

        let answer = self.model.generate(&context.prompt).await?;

        Ok(QueryOutcome::Answer {
            answer,
            prompt: context.prompt,
            sources: context.sources,
        })
    }
}
