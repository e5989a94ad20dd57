use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{info, warn};
use std::fs;
use std::path::PathBuf;

use knowledge_rag::config::{AppConfig, LlmConfig};
use knowledge_rag::database::IndexBackend;
use knowledge_rag::document::base_filename;
use knowledge_rag::embeddings::EmbeddingProvider;
use knowledge_rag::gemini::{GeminiClient, EMBEDDING_DIMENSIONS};
use knowledge_rag::knowledge_base::KnowledgeBase;
use knowledge_rag::llm::{ChatModel, Retrying};
use knowledge_rag::openrouter::OpenRouterClient;
use knowledge_rag::rag::{NoResultReason, QueryOutcome, Retrieval};

/// Question answering over a private document corpus
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the whole index from the corpus directory
    Rebuild,
    /// Index one file that is already in the corpus directory
    Add { filename: String },
    /// Remove one file's entries from the index
    Remove { filename: String },
    /// List the files in the corpus directory
    List,
    /// Answer a question from the indexed corpus
    Query { text: String },
    /// Print the prompt a question would produce without calling the model
    Prompt { text: String },
    /// Copy a file into the corpus directory and index it
    Upload { path: PathBuf },
    /// Delete a file from the corpus directory and the index
    Delete { filename: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    let gemini = GeminiClient::new(config.gemini.clone());
    let model = match config.llm {
        LlmConfig::Gemini => ChatModel::Gemini(gemini.clone()),
        LlmConfig::OpenRouter(openrouter) => ChatModel::OpenRouter(OpenRouterClient::new(openrouter)),
    };
    let index = IndexBackend::open(config.index, gemini.provider_id(), EMBEDDING_DIMENSIONS)
        .await
        .context("Failed to open the vector index")?;

    let knowledge_base = KnowledgeBase::new(
        config.pipeline,
        gemini,
        index,
        Retrying::new(model, config.retry),
    );

    match args.command {
        Command::Rebuild => {
            let report = knowledge_base.rebuild().await.context("Rebuild failed")?;
            info!(
                "Indexed {} documents as {} chunks",
                report.documents, report.chunks
            );
        }
        Command::Add { filename } => {
            let chunks = knowledge_base
                .ingestor()
                .add_document(&filename)
                .await
                .with_context(|| format!("Failed to add {}", filename))?;
            info!("Added {} ({} chunks)", filename, chunks);
        }
        Command::Remove { filename } => {
            let removed = knowledge_base.ingestor().remove_document(&filename).await?;
            if removed == 0 {
                warn!("{} had no indexed entries", filename);
            }
        }
        Command::List => {
            for name in knowledge_base.list_documents().await? {
                println!("{}", name);
            }
        }
        Command::Query { text } => match knowledge_base.query(&text).await? {
            QueryOutcome::Answer { answer, sources, .. } => {
                println!("{}", answer);
                for source in sources {
                    info!(
                        "source {} @{} (score {:.3})",
                        source.entry.metadata.filename,
                        source.entry.metadata.start_offset,
                        source.score
                    );
                }
            }
            QueryOutcome::NoResult(reason) => println!("{}", describe(&reason)),
        },
        Command::Prompt { text } => match knowledge_base.prompt(&text).await? {
            Retrieval::Context(context) => println!("{}", context.prompt),
            Retrieval::NoResult(reason) => println!("{}", describe(&reason)),
        },
        Command::Upload { path } => {
            let filename = base_filename(&path)?;
            let bytes =
                fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            let chunks = knowledge_base
                .upload_document(&filename, &bytes)
                .await
                .with_context(|| format!("Failed to upload {}", filename))?;
            info!("Uploaded {} ({} chunks)", filename, chunks);
        }
        Command::Delete { filename } => {
            let removed = knowledge_base
                .delete_document(&filename)
                .await
                .with_context(|| format!("Failed to delete {}", filename))?;
            info!("Deleted {} ({} entries)", filename, removed);
        }
    }

    Ok(())
}

fn describe(reason: &NoResultReason) -> String {
    match reason {
        NoResultReason::EmptyQuery => "No question given.".to_string(),
        NoResultReason::NoMatches => "No relevant information found in the documents.".to_string(),
        NoResultReason::BelowThreshold {
            best_score,
            min_relevance,
        } => format!(
            "No relevant information found (best match {:.2} < {:.2}).",
            best_score, min_relevance
        ),
    }
}
