//! Ingestion and retrieval against a file-persisted index, with a
//! deterministic embedder and a canned language model.

use knowledge_rag::config::PipelineConfig;
use knowledge_rag::database::{LocalIndex, VectorIndex};
use knowledge_rag::embeddings::mock::HashingEmbedder;
use knowledge_rag::embeddings::{Embedding, EmbeddingProvider};
use knowledge_rag::ingest::IngestReport;
use knowledge_rag::knowledge_base::KnowledgeBase;
use knowledge_rag::llm::LanguageModel;
use knowledge_rag::rag::{NoResultReason, QueryOutcome, Retrieval};
use knowledge_rag::RagError;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

const FRANCE: &str = "The capital of France is Paris.";

/// Records every prompt and always answers the same
#[derive(Default)]
struct CannedModel {
    prompts: Mutex<Vec<String>>,
}

impl LanguageModel for CannedModel {
    async fn generate(&self, prompt: &str) -> knowledge_rag::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Paris.".to_string())
    }
}

/// Fails on any text containing POISON
struct PoisonedEmbedder(HashingEmbedder);

impl EmbeddingProvider for PoisonedEmbedder {
    fn provider_id(&self) -> &str {
        "poisoned"
    }

    async fn get_embedding(&self, text: &str) -> knowledge_rag::Result<Embedding> {
        if text.contains("POISON") {
            return Err(RagError::Embedding("provider unavailable".to_string()));
        }
        self.0.get_embedding(text).await
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        for (name, content) in files {
            fs::write(dir.path().join("data").join(name), content).unwrap();
        }
        Fixture { dir }
    }

    fn corpus(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    fn index_root(&self) -> std::path::PathBuf {
        self.dir.path().join("chroma")
    }

    fn write(&self, name: &str, content: &str) {
        let path = self.corpus().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    async fn open_with<E: EmbeddingProvider>(
        &self,
        embedder: E,
    ) -> KnowledgeBase<E, LocalIndex, CannedModel> {
        let index = LocalIndex::open(self.index_root(), embedder.provider_id())
            .await
            .unwrap();
        KnowledgeBase::new(
            PipelineConfig::new(self.corpus()),
            embedder,
            index,
            CannedModel::default(),
        )
    }

    async fn open(&self) -> KnowledgeBase<HashingEmbedder, LocalIndex, CannedModel> {
        self.open_with(HashingEmbedder::default()).await
    }
}

fn ranked_ids(retrieval: Retrieval) -> Vec<String> {
    match retrieval {
        Retrieval::Context(context) => context.sources.into_iter().map(|s| s.entry.id).collect(),
        Retrieval::NoResult(reason) => panic!("expected context, got {reason:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_single_paragraph() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;

    let report = kb.rebuild().await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.chunks, 1);

    let question = "What is the capital of France?";
    match kb.query(question).await.unwrap() {
        QueryOutcome::Answer {
            answer,
            prompt,
            sources,
        } => {
            assert_eq!(answer, "Paris.");
            assert_eq!(sources[0].entry.text, FRANCE);
            assert_eq!(sources[0].entry.metadata.filename, "france.txt");
            assert_eq!(sources[0].entry.metadata.start_offset, 0);
            assert!(prompt.contains(FRANCE));
            assert!(prompt.contains(question));
        }
        QueryOutcome::NoResult(reason) => panic!("expected an answer, got {reason:?}"),
    }
}

#[tokio::test]
async fn test_empty_collection_has_no_result() {
    let fixture = Fixture::new(&[]);
    let kb = fixture.open().await;

    let outcome = kb.query("What is the capital of France?").await.unwrap();
    assert!(matches!(
        outcome,
        QueryOutcome::NoResult(NoResultReason::NoMatches)
    ));
    assert!(kb.engine().create_prompt("anything").await.is_ok());
}

#[tokio::test]
async fn test_unrelated_query_is_below_threshold() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    let outcome = kb.query("zebra migration patterns").await.unwrap();
    assert!(matches!(
        outcome,
        QueryOutcome::NoResult(NoResultReason::BelowThreshold { .. })
    ));
}

#[tokio::test]
async fn test_blank_query_has_no_result() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    assert!(matches!(
        kb.query("   ").await.unwrap(),
        QueryOutcome::NoResult(NoResultReason::EmptyQuery)
    ));
}

#[tokio::test]
async fn test_similar_chunk_ranks_first() {
    let fixture = Fixture::new(&[
        ("bananas.txt", "Bananas are yellow fruit grown in tropical climates."),
        ("france.txt", FRANCE),
        ("qubits.txt", "Quantum computers store information in qubits."),
        ("rust.txt", "Rust programs avoid data races through ownership."),
    ]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    let ids = ranked_ids(kb.prompt("Which city is the capital of France?").await.unwrap());
    assert_eq!(ids[0], "france.txt#0");
    assert_eq!(ids.len(), 4);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let long_text = "Paris is the capital. ".repeat(120);
    let fixture = Fixture::new(&[
        ("france.txt", FRANCE),
        ("long.txt", &long_text),
        ("other.txt", "Mountains and rivers of the capital region."),
    ]);
    let kb = fixture.open().await;

    let first = kb.rebuild().await.unwrap();
    let size = kb.indexed_chunks().await.unwrap();
    let ranking = ranked_ids(kb.prompt("capital of France").await.unwrap());

    let second = kb.rebuild().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(kb.indexed_chunks().await.unwrap(), size);
    assert_eq!(ranked_ids(kb.prompt("capital of France").await.unwrap()), ranking);
    // 2640 characters with 1000/200 windows start at 0, 800, 1600, 2400
    assert_eq!(size, 1 + 4 + 1);
}

#[tokio::test]
async fn test_add_then_remove_restores_size() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();
    let before = kb.indexed_chunks().await.unwrap();

    fixture.write("spain.txt", &"The capital of Spain is Madrid. ".repeat(50));
    let added = kb.ingestor().add_document("spain.txt").await.unwrap();
    assert_eq!(added, 2);
    assert_eq!(kb.indexed_chunks().await.unwrap(), before + added);

    // Re-adding the same file overwrites instead of duplicating
    kb.ingestor().add_document("spain.txt").await.unwrap();
    assert_eq!(kb.indexed_chunks().await.unwrap(), before + added);

    let removed = kb.ingestor().remove_document("spain.txt").await.unwrap();
    assert_eq!(removed, added);
    assert_eq!(kb.indexed_chunks().await.unwrap(), before);
}

#[tokio::test]
async fn test_remove_unknown_document_is_noop() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    assert_eq!(kb.ingestor().remove_document("never-added.txt").await.unwrap(), 0);
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_add_missing_document_fails() {
    let fixture = Fixture::new(&[]);
    let kb = fixture.open().await;

    let err = kb.ingestor().add_document("ghost.txt").await.unwrap_err();
    assert!(matches!(err, RagError::DocumentNotFound(name) if name == "ghost.txt"));
    assert_eq!(kb.indexed_chunks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_index() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture
        .open_with(PoisonedEmbedder(HashingEmbedder::default()))
        .await;
    kb.rebuild().await.unwrap();

    fixture.write("bad.txt", "POISON pill");
    let err = kb.rebuild().await.unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);

    // Per-document failures are scoped to that document
    assert!(kb.ingestor().add_document("bad.txt").await.is_err());
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_upload_download_delete() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    let content = b"Berlin is the capital of Germany.";
    assert_eq!(kb.upload_document("germany.txt", content).await.unwrap(), 1);
    assert_eq!(kb.list_documents().await.unwrap(), vec!["france.txt", "germany.txt"]);
    assert_eq!(kb.download_document("germany.txt").await.unwrap(), content);
    assert_eq!(kb.indexed_chunks().await.unwrap(), 2);

    assert_eq!(kb.delete_document("germany.txt").await.unwrap(), 1);
    assert_eq!(kb.list_documents().await.unwrap(), vec!["france.txt"]);
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);

    assert!(matches!(
        kb.download_document("germany.txt").await,
        Err(RagError::DocumentNotFound(_))
    ));
    assert!(matches!(
        kb.delete_document("germany.txt").await,
        Err(RagError::DocumentNotFound(_))
    ));
}

#[tokio::test]
async fn test_rejected_upload_leaves_no_file() {
    let fixture = Fixture::new(&[]);
    let kb = fixture.open().await;

    let err = kb
        .upload_document("picture.png", &[0x89, 0x50, 0x4e, 0x47])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UnsupportedFormat { .. }));
    assert!(!fixture.corpus().join("picture.png").exists());

    assert!(matches!(
        kb.upload_document("../escape.txt", b"x").await,
        Err(RagError::InvalidDocument(_))
    ));
}

#[tokio::test]
async fn test_bad_reupload_keeps_existing_document() {
    let fixture = Fixture::new(&[]);
    let kb = fixture.open().await;
    assert_eq!(kb.upload_document("notes.txt", FRANCE.as_bytes()).await.unwrap(), 1);

    let err = kb
        .upload_document("notes.txt", &[0xff, 0xfe, 0x00, 0x41])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Load { .. }));

    assert_eq!(kb.list_documents().await.unwrap(), vec!["notes.txt"]);
    assert_eq!(kb.download_document("notes.txt").await.unwrap(), FRANCE.as_bytes());
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);
    let leftovers: Vec<_> = fs::read_dir(fixture.corpus())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec!["notes.txt"]);
}

#[tokio::test]
async fn test_reupload_replaces_document_in_place() {
    let fixture = Fixture::new(&[]);
    fixture.write("nested/notes.txt", FRANCE);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    let spain = "The capital of Spain is Madrid. ".repeat(50);
    assert_eq!(kb.upload_document("notes.txt", spain.as_bytes()).await.unwrap(), 2);
    assert_eq!(
        fs::read_to_string(fixture.corpus().join("nested/notes.txt")).unwrap(),
        spain
    );
    assert!(!fixture.corpus().join("notes.txt").exists());
    assert_eq!(kb.indexed_chunks().await.unwrap(), 2);
}

#[tokio::test]
async fn test_blank_document_does_not_block_rebuild() {
    let fixture = Fixture::new(&[("france.txt", FRANCE), ("blank.txt", "\n\n   \n")]);
    let kb = fixture.open().await;

    let report = kb.rebuild().await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.chunks, 1);
    assert_eq!(kb.indexed_chunks().await.unwrap(), 1);

    // Adding it on its own indexes nothing and drops stale entries
    assert_eq!(kb.ingestor().add_document("blank.txt").await.unwrap(), 0);
    fixture.write("france.txt", "   ");
    assert_eq!(kb.ingestor().add_document("france.txt").await.unwrap(), 0);
    assert_eq!(kb.indexed_chunks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_names_are_indexed_once() {
    let fixture = Fixture::new(&[]);
    fixture.write("a/x.txt", FRANCE);
    fixture.write("b/x.txt", "Berlin is the capital of Germany.");
    let kb = fixture.open().await;

    let report = kb.rebuild().await.unwrap();
    assert_eq!(report, IngestReport { documents: 1, chunks: 1 });
    assert_eq!(kb.indexed_chunks().await.unwrap(), report.chunks);
    assert_eq!(kb.list_documents().await.unwrap(), vec!["x.txt"]);

    let ids = ranked_ids(kb.prompt("What is the capital of France?").await.unwrap());
    assert_eq!(ids, vec!["x.txt#0"]);
}

#[tokio::test]
async fn test_index_from_another_embedder_is_refused() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    fixture.open().await.rebuild().await.unwrap();

    let result = LocalIndex::open(fixture.index_root(), "poisoned").await;
    assert!(matches!(result, Err(RagError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_index_survives_restart() {
    let fixture = Fixture::new(&[("france.txt", FRANCE), ("other.txt", "Something else.")]);
    {
        let kb = fixture.open().await;
        kb.rebuild().await.unwrap();
        kb.ingestor().remove_document("other.txt").await.unwrap();
    }

    let embedder = HashingEmbedder::default();
    let index = LocalIndex::open(fixture.index_root(), embedder.provider_id())
        .await
        .unwrap();
    assert_eq!(index.len().await.unwrap(), 1);
    assert!(Path::new(&fixture.index_root()).join("knowledge_base").is_dir());
}

#[tokio::test]
async fn test_query_during_rebuild_sees_a_complete_collection() {
    let fixture = Fixture::new(&[("france.txt", FRANCE)]);
    let kb = fixture.open().await;
    kb.rebuild().await.unwrap();

    let (report, outcome) = tokio::join!(kb.rebuild(), kb.query("What is the capital of France?"));
    assert_eq!(report.unwrap().chunks, 1);
    assert!(matches!(outcome.unwrap(), QueryOutcome::Answer { .. }));
}
