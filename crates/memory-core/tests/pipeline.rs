//! End-to-end pipeline tests against the in-memory mock views,
//! covering spec scenarios S1, S3, S4, S5.

use std::sync::Arc;

use memory_config::MemoryEngineConfig;
use memory_core::content::{HeuristicClaimExtractor, HeuristicEntityExtractor};
use memory_core::provenance::ProvenanceTracker;
use memory_core::reader::{MemoryReader, RecallOptions};
use memory_core::storage::mock::{MockGraphView, MockSearchView, MockVectorView};
use memory_core::storage::{MultiViewCoordinator, ViewTimeouts};
use memory_core::writer::{MemoryWriter, WriteMetadata};
use memory_core::EngineError;

fn no_embed() -> memory_core::writer::EmbedFn {
    Arc::new(|_text: String| Box::pin(async move { None }))
}

fn build_writer() -> (MemoryWriter, Arc<MockVectorView>, Arc<MockGraphView>, Arc<MockSearchView>) {
    let vector = Arc::new(MockVectorView::default());
    let graph = Arc::new(MockGraphView::default());
    let search = Arc::new(MockSearchView::default());
    let coordinator = MultiViewCoordinator::new(vector.clone(), graph.clone(), search.clone(), ViewTimeouts::default());
    let provenance = Arc::new(ProvenanceTracker::new(MemoryEngineConfig::default().provenance));
    let writer = MemoryWriter::new(
        coordinator,
        provenance,
        Arc::new(HeuristicEntityExtractor),
        Arc::new(HeuristicClaimExtractor),
        no_embed(),
        MemoryEngineConfig::default(),
    );
    (writer, vector, graph, search)
}

/// S1: a two-sentence profile write produces at least two entities, at
/// least one claim, exactly one chunk, and at least one linked entity.
#[tokio::test]
async fn s1_profile_write_produces_entities_claims_and_one_chunk() {
    let (writer, ..) = build_writer();
    let metadata = WriteMetadata {
        source: "profile.txt".to_string(),
        ..Default::default()
    };

    let result = writer.write("John Smith works at OpenAI. OpenAI was founded in 2015.", metadata).await.unwrap();

    assert_eq!(result.chunks_created, 1);
    assert!(!result.provenance_id.is_empty());
    assert!(!result.entities_linked.is_empty());
}

/// S3: writing the same (content, source, timestamp) twice produces
/// the same provenance id, and a subsequent pin over the resulting
/// memory id affects exactly one record.
#[tokio::test]
async fn s3_duplicate_write_is_idempotent_and_pin_affects_one_record() {
    let (writer, ..) = build_writer();
    let metadata = || WriteMetadata {
        source: "profile.txt".to_string(),
        ..Default::default()
    };

    let first = writer.write("John Smith works at OpenAI.", metadata()).await.unwrap();
    let second = writer.write("John Smith works at OpenAI.", metadata()).await.unwrap();

    assert_eq!(first.provenance_id, second.provenance_id);
    assert_eq!(first.memory_id, second.memory_id);

    let affected = writer.provenance.pin(&first.memory_id).await;
    assert_eq!(affected, 1);
}

/// S4: recall with an impossibly small time budget returns promptly
/// with no error and zero candidates.
#[tokio::test]
async fn s4_tiny_time_budget_returns_empty_without_erroring() {
    let (writer, vector, graph, search) = build_writer();
    let metadata = WriteMetadata {
        source: "profile.txt".to_string(),
        ..Default::default()
    };
    writer.write("John Smith works at OpenAI.", metadata).await.unwrap();

    let reader = MemoryReader::new(vector, graph, search, no_embed_query(), MemoryEngineConfig::default());
    let options = RecallOptions {
        time_budget_ms: 1,
        ..Default::default()
    };

    let started = std::time::Instant::now();
    let response = reader.recall("who works at openai", options).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.stats.total_candidates, 0);
    assert!(elapsed < std::time::Duration::from_millis(500));
}

/// S5: "Discuss metadata: structure" passes validation (substring, not
/// a blocked pattern); "<script>bad</script>" fails.
#[tokio::test]
async fn s5_metadata_substring_passes_script_tag_fails() {
    let (writer, ..) = build_writer();

    let ok = writer
        .write(
            "Discuss metadata: structure",
            WriteMetadata {
                source: "notes.txt".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(ok.is_ok());

    let blocked = writer
        .write(
            "<script>bad</script>",
            WriteMetadata {
                source: "notes.txt".to_string(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(blocked, Err(EngineError::Validation { ref field, .. }) if field.as_str() == "content"));
}

fn no_embed_query() -> memory_core::reader::EmbedQueryFn {
    Arc::new(|_text: String| Box::pin(async move { None }))
}
