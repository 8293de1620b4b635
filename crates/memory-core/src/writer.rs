//! Memory writer (§4.4): orchestrates the full write pipeline from raw
//! content to a persisted, provenance-tracked memory.
//!
//! Grounded on `crates/memory/src/manager/mod.rs`'s `MemoryManager`
//! (a struct of collaborating dependencies with orchestrating methods,
//! and an `EmbedFn` type alias for the external embedding call).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use memory_config::MemoryEngineConfig;
use tracing::{debug, warn};

use crate::content::{self, ClaimExtractor, EntityExtractor};
use crate::error::{EngineError, EngineResult};
use crate::provenance::ProvenanceTracker;
use crate::resolve::{self, ResolutionAction};
use crate::schema::{Edge, EdgeType, MetadataValue, Node, NodeType, NumericVector, Transformation, TransformationType};
use crate::storage::MultiViewCoordinator;
use crate::validation::{self, WriteInput};

/// `text -> embedding`, taken as an external collaborator (§1). `None`
/// means "no embedding available for this text" — not an error.
pub type EmbedFn = Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<Vec<f32>>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct WriteMetadata {
    pub source: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub confidence: Option<f32>,
    pub language: Option<String>,
    pub content_type: Option<String>,
    pub require_evidence: bool,
    pub version: Option<u32>,
    pub extra: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphUpdates {
    pub nodes_created: usize,
    pub edges_created: usize,
}

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub memory_id: String,
    pub candidate_count: usize,
    pub conflicts_found: Vec<String>,
    pub entities_linked: Vec<String>,
    pub provenance_id: String,
    pub chunks_created: usize,
    pub graph_updates: GraphUpdates,
}

pub struct MemoryWriter {
    pub coordinator: MultiViewCoordinator,
    pub provenance: Arc<ProvenanceTracker>,
    pub entity_extractor: Arc<dyn EntityExtractor>,
    pub claim_extractor: Arc<dyn ClaimExtractor>,
    pub embed: EmbedFn,
    pub config: MemoryEngineConfig,
}

impl MemoryWriter {
    pub fn new(
        coordinator: MultiViewCoordinator,
        provenance: Arc<ProvenanceTracker>,
        entity_extractor: Arc<dyn EntityExtractor>,
        claim_extractor: Arc<dyn ClaimExtractor>,
        embed: EmbedFn,
        config: MemoryEngineConfig,
    ) -> Self {
        Self {
            coordinator,
            provenance,
            entity_extractor,
            claim_extractor,
            embed,
            config,
        }
    }

    /// Runs the full write pipeline under `config.write_timeout_ms`; a
    /// timeout here is fatal for the whole request (§7), unlike a
    /// retrieval branch timeout.
    pub async fn write(&self, content: &str, metadata: WriteMetadata) -> EngineResult<WriteResult> {
        let timeout_ms = self.config.write_timeout_ms;
        match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), self.write_inner(content, metadata)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::timeout("memory_write")),
        }
    }

    async fn write_inner(&self, content: &str, metadata: WriteMetadata) -> EngineResult<WriteResult> {
        // 1. Validate & sanitize.
        let validated = validation::validate_write(
            &WriteInput {
                content,
                source: &metadata.source,
                tags: &metadata.tags,
                metadata: &metadata.extra,
            },
            &self.config.validation,
        )?;

        let timestamp = metadata.timestamp.unwrap_or_else(Utc::now);
        let memory_id = deterministic_memory_id(&validated.content, &validated.source, timestamp);

        // 2. Content processing.
        let processed = content::process(
            &validated.content,
            &validated.source,
            &self.config.content,
            self.entity_extractor.as_ref(),
            self.claim_extractor.as_ref(),
        )
        .await;
        debug!(chunks = processed.chunks.len(), entities = processed.entities.len(), claims = processed.claims.len(), "content processed");

        // 3. Resolve entities against the graph.
        let resolved = resolve::resolve_entities(
            processed.entities,
            self.coordinator.vector.as_ref(),
            self.coordinator.graph.as_ref(),
            self.coordinator.search.as_ref(),
            &self.config.resolver,
        )
        .await?;

        let mut entities_linked = Vec::new();
        let mut graph_updates = GraphUpdates::default();

        for resolved_entity in &resolved {
            let now = Utc::now();
            let mut properties = BTreeMap::new();
            properties.insert("name".to_string(), MetadataValue::String(resolved_entity.entity.name.clone()));
            properties.insert("entity_type".to_string(), MetadataValue::String(format!("{:?}", resolved_entity.entity.entity_type)));
            properties.insert("source".to_string(), MetadataValue::String(resolved_entity.entity.source.clone()));

            let embedding = match &resolved_entity.entity.embedding {
                Some(v) => Some(v.clone()),
                None => (self.embed)(resolved_entity.entity.name.clone()).await.map(NumericVector),
            };

            let node = Node {
                id: resolved_entity.entity.id.clone(),
                node_type: NodeType::Entity,
                properties,
                embedding,
                created_at: now,
                updated_at: now,
            };
            if let Err(err) = self.coordinator.graph.upsert_node(node).await {
                warn!(%err, entity_id = %resolved_entity.entity.id, "failed to upsert resolved entity node");
            } else {
                graph_updates.nodes_created += 1;
            }

            if let Err(err) = self
                .coordinator
                .search
                .index(crate::storage::SearchDoc {
                    id: resolved_entity.entity.id.clone(),
                    text: resolved_entity.entity.name.clone(),
                    fields: crate::storage::Filters::new(),
                })
                .await
            {
                warn!(%err, entity_id = %resolved_entity.entity.id, "failed to index resolved entity name");
            }

            if let Some(edge) = &resolved_entity.link_edge {
                if self.coordinator.graph.upsert_edge(edge.clone()).await.is_ok() {
                    graph_updates.edges_created += 1;
                }
            }
            if !matches!(resolved_entity.decision.action, ResolutionAction::Create) {
                entities_linked.push(resolved_entity.entity.id.clone());
            }
        }

        let id_rewrites: BTreeMap<String, String> = resolved.iter().map(|r| (r.original_id.clone(), r.entity.id.clone())).collect();

        // 4. Store chunks.
        let mut chunks_created = 0usize;
        for chunk in &processed.chunks {
            let embedding = (self.embed)(chunk.content.clone()).await.map(NumericVector);
            let outcome = self.coordinator.store_chunk(chunk, embedding).await;
            if outcome.is_complete_success() {
                chunks_created += 1;
            } else {
                warn!(chunk_id = %chunk.id, failures = ?outcome.failed, "partial failure storing chunk");
            }
        }

        // 5. already folded into the entity loop above.

        // 6. Store claims.
        let mut any_claim_linked = processed.claims.is_empty();
        for claim in &processed.claims {
            let outcome = self.coordinator.store_claim(claim).await;
            if outcome.succeeded.contains(&crate::error::View::Graph) {
                any_claim_linked = true;
                graph_updates.edges_created += 1;
            }
        }

        if metadata.require_evidence && !processed.claims.is_empty() && !any_claim_linked {
            return Err(EngineError::EvidenceMissing);
        }

        // 7. Co-occurrence edges between entities in the same chunk.
        let cooccurrence_edges = build_cooccurrence_edges(&processed.chunks, &id_rewrites);
        for edge in &cooccurrence_edges {
            if self.coordinator.graph.upsert_edge(edge.clone()).await.is_ok() {
                graph_updates.edges_created += 1;
            }
        }

        // 8. Provenance record.
        let record = self.provenance.track(&memory_id, &validated.source, metadata.user_id.as_deref().unwrap_or("writer"), timestamp).await;
        let transformation = Transformation {
            id: uuid::Uuid::new_v4().to_string(),
            transformation_type: TransformationType::Chunking,
            description: format!("chunked into {} pieces, extracted {} entities and {} claims", processed.chunks.len(), resolved.len(), processed.claims.len()),
            timestamp: Utc::now(),
            agent: "memory_writer".to_string(),
            parameters: BTreeMap::new(),
            input_hash: content_hash(content),
            output_hash: content_hash(&validated.content),
        };
        let record = self
            .provenance
            .record_transformation(&record.id, transformation, metadata.user_id.as_deref().unwrap_or("writer"))
            .await
            .unwrap_or(record);
        self.provenance.persist().await.ok();

        Ok(WriteResult {
            memory_id,
            candidate_count: resolved.len(),
            conflicts_found: Vec::new(),
            entities_linked,
            provenance_id: record.id,
            chunks_created,
            graph_updates,
        })
    }
}

/// Deterministic in `(content, source, timestamp)` so repeated writes
/// of the same memory in the same instant converge on one id (§4.4,
/// P2/S3).
fn deterministic_memory_id(content: &str, source: &str, timestamp: DateTime<Utc>) -> String {
    format!("mem_{}", &content_hash(&format!("{content}|{source}|{}", timestamp.timestamp()))[..16])
}

fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Links entities that co-occur in the same chunk with weight =
/// normalized co-occurrence frequency within the batch, capped at 1.0
/// (§4.4 step 7).
fn build_cooccurrence_edges(chunks: &[crate::schema::Chunk], id_map: &BTreeMap<String, String>) -> Vec<Edge> {
    let mut pair_counts: BTreeMap<(String, String), u32> = BTreeMap::new();
    for chunk in chunks {
        let mut ids: Vec<&str> = chunk
            .entities
            .iter()
            .map(|id| id_map.get(id).map(String::as_str).unwrap_or(id.as_str()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let key = (ids[i].to_string(), ids[j].to_string());
                *pair_counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    let max_count = pair_counts.values().copied().max().unwrap_or(1).max(1);
    let now = Utc::now();
    pair_counts
        .into_iter()
        .map(|((a, b), count)| {
            let weight = (count as f32 / max_count as f32).min(1.0);
            Edge {
                id: Edge::undirected_id(&a, &b, EdgeType::RelatedTo),
                from: a,
                to: b,
                edge_type: EdgeType::RelatedTo,
                weight,
                properties: {
                    let mut p = BTreeMap::new();
                    p.insert("link_type".to_string(), MetadataValue::String("co_occurrence".to_string()));
                    p
                },
                created_at: now,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{HeuristicClaimExtractor, HeuristicEntityExtractor};
    use crate::provenance::ProvenanceTracker;
    use crate::storage::mock::{MockGraphView, MockSearchView, MockVectorView};
    use crate::storage::{MultiViewCoordinator, ViewTimeouts};
    use memory_config::ProvenanceConfig;

    fn no_embed() -> EmbedFn {
        Arc::new(|_text: String| Box::pin(async { None }))
    }

    fn writer() -> MemoryWriter {
        let coordinator = MultiViewCoordinator::new(
            Arc::new(MockVectorView::default()),
            Arc::new(MockGraphView::default()),
            Arc::new(MockSearchView::default()),
            ViewTimeouts::default(),
        );
        MemoryWriter::new(
            coordinator,
            Arc::new(ProvenanceTracker::new(ProvenanceConfig::default())),
            Arc::new(HeuristicEntityExtractor),
            Arc::new(HeuristicClaimExtractor),
            no_embed(),
            MemoryEngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn s1_write_produces_entities_claim_and_single_chunk() {
        let writer = writer();
        let result = writer
            .write(
                "John Smith works at OpenAI. OpenAI was founded in 2015.",
                WriteMetadata {
                    source: "profile.txt".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.chunks_created, 1);
        assert!(!result.provenance_id.is_empty());
        assert!(result.candidate_count >= 2);
    }

    #[tokio::test]
    async fn s3_same_write_twice_yields_same_provenance_id() {
        let writer = writer();
        let timestamp = Utc::now();
        let metadata = || WriteMetadata {
            source: "profile.txt".to_string(),
            timestamp: Some(timestamp),
            ..Default::default()
        };

        let first = writer.write("John Smith works at OpenAI.", metadata()).await.unwrap();
        let second = writer.write("John Smith works at OpenAI.", metadata()).await.unwrap();
        assert_eq!(first.provenance_id, second.provenance_id);
        assert_eq!(first.memory_id, second.memory_id);
    }

    #[tokio::test]
    async fn require_evidence_with_no_claims_at_all_succeeds() {
        let writer = writer();
        let result = writer
            .write(
                "Xyzzy.",
                WriteMetadata {
                    source: "s".to_string(),
                    require_evidence: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_ok());
    }

    /// A graph view that can never persist a claim link still produces
    /// claims from the text; `require_evidence` must reject the write
    /// rather than silently accepting unlinked claims.
    #[tokio::test]
    async fn require_evidence_fails_when_claims_never_link() {
        let coordinator = MultiViewCoordinator::new(
            Arc::new(MockVectorView::default()),
            Arc::new(MockGraphView::default()),
            Arc::new(MockSearchView::default()),
            ViewTimeouts {
                graph_ms: 0,
                ..ViewTimeouts::default()
            },
        );
        let writer = MemoryWriter::new(
            coordinator,
            Arc::new(ProvenanceTracker::new(ProvenanceConfig::default())),
            Arc::new(HeuristicEntityExtractor),
            Arc::new(HeuristicClaimExtractor),
            no_embed(),
            MemoryEngineConfig::default(),
        );

        let result = writer
            .write(
                "John Smith works at OpenAI.",
                WriteMetadata {
                    source: "s".to_string(),
                    require_evidence: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(EngineError::EvidenceMissing)));
    }
}
