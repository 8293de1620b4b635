//! Memory reader (§4.6–§4.10): orchestrates query processing,
//! concurrent multi-view retrieval, fusion, ranking, and evidence
//! assembly into one `recall` call.
//!
//! Grounded on `crates/memory/src/manager/mod.rs`'s `MemoryManager`
//! (a struct of collaborating dependencies with orchestrating methods),
//! mirrored here for the read side the way `writer::MemoryWriter`
//! mirrors it for the write side.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use memory_config::MemoryEngineConfig;

use crate::error::EngineResult;
use crate::evidence::{self, AssemblyContext, AssemblyResponse, GraphContext};
use crate::query::{self, ProcessedQuery};
use crate::ranking::{self, RankingContext, UserPreferences};
use crate::schema::NumericVector;
use crate::storage::{Filters, GraphView, PathQuery, SearchView, VectorView};
use crate::validation::{self, RecallInput};
use crate::{fusion, retrieval};

pub type EmbedQueryFn = Arc<dyn Fn(String) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Vec<f32>>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    pub max_results: usize,
    pub time_budget_ms: u64,
    pub filters: BTreeMap<String, String>,
    pub include_graph: bool,
    pub user_id: Option<String>,
    pub user_preferences: UserPreferences,
}

#[derive(Debug, Clone, Default)]
pub struct RecallStats {
    pub query_time_ms: u64,
    pub vector_results: usize,
    pub graph_results: usize,
    pub search_results: usize,
    pub fusion_score: f32,
    pub total_candidates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RecallResponse {
    pub evidence: Vec<crate::schema::Evidence>,
    pub conflicts: Vec<evidence::ConflictInfo>,
    pub stats: RecallStats,
    pub self_critique: Option<String>,
}

pub struct MemoryReader {
    pub vector: Arc<dyn VectorView>,
    pub graph: Arc<dyn GraphView>,
    pub search: Arc<dyn SearchView>,
    pub embed: EmbedQueryFn,
    pub config: MemoryEngineConfig,
}

impl MemoryReader {
    pub fn new(vector: Arc<dyn VectorView>, graph: Arc<dyn GraphView>, search: Arc<dyn SearchView>, embed: EmbedQueryFn, config: MemoryEngineConfig) -> Self {
        Self {
            vector,
            graph,
            search,
            embed,
            config,
        }
    }

    pub async fn recall(&self, raw_query: &str, options: RecallOptions) -> EngineResult<RecallResponse> {
        let started = Utc::now();
        let max_results = if options.max_results == 0 { 10 } else { options.max_results };
        let time_budget_ms = if options.time_budget_ms == 0 { self.config.read_time_budget_ms } else { options.time_budget_ms };

        validation::validate_recall(&RecallInput {
            query: raw_query,
            max_results,
            time_budget_ms,
        })?;

        let processed: ProcessedQuery = query::process_query(raw_query, &self.config.query, options.filters.clone()).await;

        let filters: Filters = Filters::new();
        let query_embedding = (self.embed)(processed.normalized.clone()).await.map(NumericVector);

        // The caller's time budget caps each branch's deadline; it
        // never extends the configured defaults.
        let mut retrieval_config = self.config.retrieval.clone();
        retrieval_config.vector_timeout_ms = retrieval_config.vector_timeout_ms.min(time_budget_ms);
        retrieval_config.graph_timeout_ms = retrieval_config.graph_timeout_ms.min(time_budget_ms);
        retrieval_config.search_timeout_ms = retrieval_config.search_timeout_ms.min(time_budget_ms);

        let outcome = retrieval::retrieve(&processed, query_embedding, self.vector.as_ref(), self.graph.as_ref(), self.search.as_ref(), &retrieval_config, &filters).await;

        let vector_results = outcome.vector.results.len();
        let graph_results = if options.include_graph { outcome.graph.results.len() } else { 0 };
        let search_results = outcome.keyword.results.len();
        let total_candidates = outcome.total_candidates();

        let graph_context = if options.include_graph {
            self.build_graph_context(&processed, &outcome.graph.results).await
        } else {
            GraphContext::default()
        };

        let mut inputs = outcome.into_inputs();
        if !options.include_graph {
            inputs.retain(|input| input.method != "graph");
        }

        let fused = fusion::fuse(inputs, &self.config.fusion);
        let fusion_score = fused.items.first().map(|item| item.final_score).unwrap_or(0.0);

        let ranking_context = RankingContext {
            query_terms: &processed.keywords,
            now: started,
            user_id: options.user_id.clone(),
            preferences: options.user_preferences,
        };
        let mut ranked = ranking::rank(fused.items, &ranking_context, &self.config.ranking);
        ranked.truncate(max_results.max(self.config.assembly.max_evidence_items));

        let assembly_context = AssemblyContext {
            query: processed.original.clone(),
            query_terms: processed.keywords.clone(),
            user_id: options.user_id,
            request_time: started,
            graph_context,
            retrieval_method: "hybrid".to_string(),
        };
        let AssemblyResponse { evidence, conflicts, self_critique, .. } = evidence::assemble(ranked, &assembly_context, &self.config.assembly);

        let query_time_ms = Utc::now().signed_duration_since(started).num_milliseconds().max(0) as u64;

        Ok(RecallResponse {
            evidence,
            conflicts,
            self_critique,
            stats: RecallStats {
                query_time_ms,
                vector_results,
                graph_results,
                search_results,
                fusion_score,
                total_candidates,
            },
        })
    }

    /// Calls `GraphView::find_paths` from each query entity to each
    /// graph-branch hit so evidence assembly can populate `graph_path`
    /// and `related_entity_count` (§4.10) instead of leaving them empty.
    async fn build_graph_context(&self, query: &ProcessedQuery, graph_hits: &[retrieval::FusionItem]) -> GraphContext {
        let mut paths = BTreeMap::new();
        let mut related_entity_counts: BTreeMap<String, usize> = BTreeMap::new();
        let path_query = PathQuery::default();

        for hit in graph_hits {
            let mut related = 0;
            for entity in &query.entities {
                if entity.id == hit.id {
                    continue;
                }
                match self.graph.find_paths(&entity.id, &hit.id, &path_query).await {
                    Ok(found) => {
                        if let Some(shortest) = found.into_iter().min_by_key(|p| p.nodes.len()) {
                            paths.entry(hit.id.clone()).or_insert(shortest.nodes);
                            related += 1;
                        }
                    }
                    Err(_) => continue,
                }
            }
            if related > 0 {
                related_entity_counts.insert(hit.id.clone(), related);
            }
        }

        GraphContext { paths, related_entity_counts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockGraphView, MockSearchView, MockVectorView};

    fn no_embed() -> EmbedQueryFn {
        Arc::new(|_text: String| Box::pin(async move { None }))
    }

    #[tokio::test]
    async fn recall_against_empty_stores_returns_no_evidence_without_erroring() {
        let reader = MemoryReader::new(
            Arc::new(MockVectorView::default()),
            Arc::new(MockGraphView::default()),
            Arc::new(MockSearchView::default()),
            no_embed(),
            MemoryEngineConfig::default(),
        );
        let response = reader.recall("who founded openai", RecallOptions::default()).await.unwrap();
        assert!(response.evidence.is_empty());
        assert_eq!(response.stats.total_candidates, 0);
    }

    /// S4: a time budget far smaller than any real branch still
    /// returns promptly with empty evidence rather than an error.
    #[tokio::test]
    async fn tiny_time_budget_does_not_error() {
        let reader = MemoryReader::new(
            Arc::new(MockVectorView::default()),
            Arc::new(MockGraphView::default()),
            Arc::new(MockSearchView::default()),
            no_embed(),
            MemoryEngineConfig::default(),
        );
        let options = RecallOptions {
            time_budget_ms: 1,
            ..Default::default()
        };
        let response = reader.recall("anything", options).await.unwrap();
        assert_eq!(response.stats.total_candidates, 0);
    }

    #[tokio::test]
    async fn build_graph_context_populates_path_and_related_count() {
        use crate::schema::{Edge, EdgeType, Entity, EntityType, MetadataValue, Node, NodeType};

        let graph = MockGraphView::default();
        let now = Utc::now();

        let seed = Node {
            id: "ent_seed".to_string(),
            node_type: NodeType::Entity,
            properties: BTreeMap::from([("name".to_string(), MetadataValue::String("Acme".to_string()))]),
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        let target = Node {
            id: "ent_target".to_string(),
            node_type: NodeType::Entity,
            properties: BTreeMap::from([("name".to_string(), MetadataValue::String("Widgets".to_string()))]),
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        graph.create_node(seed.clone()).await.unwrap();
        graph.create_node(target.clone()).await.unwrap();
        graph
            .create_edge(Edge {
                id: "e1".to_string(),
                from: "ent_seed".to_string(),
                to: "ent_target".to_string(),
                edge_type: EdgeType::RelatedTo,
                weight: 0.8,
                properties: Filters::new(),
                created_at: now,
            })
            .await
            .unwrap();

        let reader = MemoryReader::new(
            Arc::new(MockVectorView::default()),
            Arc::new(graph),
            Arc::new(MockSearchView::default()),
            no_embed(),
            MemoryEngineConfig::default(),
        );

        let query = ProcessedQuery {
            original: "acme widgets".to_string(),
            normalized: "acme widgets".to_string(),
            expanded: vec!["acme widgets".to_string()],
            keywords: vec![],
            entities: vec![Entity {
                id: "ent_seed".to_string(),
                name: "Acme".to_string(),
                entity_type: EntityType::Organization,
                confidence: 0.9,
                source: "query".to_string(),
                created_at: now,
                properties: BTreeMap::new(),
                embedding: None,
            }],
            filters: BTreeMap::new(),
        };

        let graph_hits = vec![retrieval::FusionItem {
            id: "ent_target".to_string(),
            score: 0.5,
            content: "widgets".to_string(),
            source: "src".to_string(),
            metadata: BTreeMap::new(),
            created_at: None,
        }];

        let context = reader.build_graph_context(&query, &graph_hits).await;
        assert_eq!(context.paths.get("ent_target"), Some(&vec!["ent_seed".to_string(), "ent_target".to_string()]));
        assert_eq!(context.related_entity_counts.get("ent_target"), Some(&1));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let reader = MemoryReader::new(
            Arc::new(MockVectorView::default()),
            Arc::new(MockGraphView::default()),
            Arc::new(MockSearchView::default()),
            no_embed(),
            MemoryEngineConfig::default(),
        );
        let result = reader.recall("   ", RecallOptions::default()).await;
        assert!(result.is_err());
    }
}
