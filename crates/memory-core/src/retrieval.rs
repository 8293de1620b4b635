//! Multi-view retrieval (§4.7): runs vector, keyword, and graph search
//! concurrently with independent deadlines; each branch tolerates its
//! own failure by contributing an empty list.
//!
//! Grounded on `other_examples/7702b1da_neur0map-yinx__src-retrieval-hybrid.rs.rs`'s
//! `tokio::join!` pattern for parallel retrieval branches.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use memory_config::RetrievalConfig;
use tracing::warn;

use crate::query::ProcessedQuery;
use crate::schema::{MetadataValue, NumericVector};
use crate::storage::{Filters, GraphView, NeighborOptions, SearchOptions, SearchView, VectorView};

#[derive(Debug, Clone)]
pub struct FusionItem {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub source: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FusionInput {
    pub method: String,
    pub results: Vec<FusionItem>,
    pub weight: f32,
}

pub struct RetrievalOutcome {
    pub vector: FusionInput,
    pub keyword: FusionInput,
    pub graph: FusionInput,
}

impl RetrievalOutcome {
    pub fn into_inputs(self) -> Vec<FusionInput> {
        vec![self.vector, self.keyword, self.graph]
    }

    pub fn total_candidates(&self) -> usize {
        self.vector.results.len() + self.keyword.results.len() + self.graph.results.len()
    }
}

/// Runs all three retrieval branches concurrently; a branch that errors
/// or exceeds its deadline contributes an empty list rather than
/// failing the whole recall (§4.7, §5, P7).
pub async fn retrieve(
    query: &ProcessedQuery,
    query_embedding: Option<NumericVector>,
    vector: &dyn VectorView,
    graph: &dyn GraphView,
    search: &dyn SearchView,
    config: &RetrievalConfig,
    filters: &Filters,
) -> RetrievalOutcome {
    let (vector_result, keyword_result, graph_result) = tokio::join!(
        run_with_deadline(config.vector_timeout_ms, "vector", vector_branch(query_embedding, vector, search, config, filters)),
        run_with_deadline(config.search_timeout_ms, "keyword", keyword_branch(query, search, config, filters)),
        run_with_deadline(config.graph_timeout_ms, "graph", graph_branch(query, graph, search, config)),
    );

    RetrievalOutcome {
        vector: vector_result,
        keyword: keyword_result,
        graph: graph_result,
    }
}

async fn run_with_deadline(timeout_ms: u64, method: &str, fut: impl std::future::Future<Output = FusionInput>) -> FusionInput {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(method, timeout_ms, "retrieval branch exceeded its deadline");
            FusionInput {
                method: method.to_string(),
                results: Vec::new(),
                weight: 1.0,
            }
        }
    }
}

async fn vector_branch(query_embedding: Option<NumericVector>, vector: &dyn VectorView, search: &dyn SearchView, config: &RetrievalConfig, filters: &Filters) -> FusionInput {
    let Some(embedding) = query_embedding else {
        return FusionInput {
            method: "vector".to_string(),
            results: Vec::new(),
            weight: 1.0,
        };
    };

    let mut results = Vec::new();
    match vector.search(&embedding, config.max_candidates, filters).await {
        Ok(hits) => {
            for hit in hits {
                let (content, source, created_at) = hydrate(search, &hit.id).await;
                results.push(FusionItem {
                    id: hit.id,
                    score: (hit.score + 1.0) / 2.0,
                    content,
                    source,
                    metadata: BTreeMap::new(),
                    created_at,
                });
            }
        }
        Err(err) => warn!(%err, "vector branch failed"),
    }

    FusionInput {
        method: "vector".to_string(),
        results,
        weight: 1.0,
    }
}

/// Fetches display content/source/timestamp for an id discovered by the
/// vector or graph branch, from whichever view actually carries the
/// text — the hybrid "fuse then hydrate" stage, collapsed into the
/// branch itself since there is only one text-bearing view to hydrate
/// from.
async fn hydrate(search: &dyn SearchView, id: &str) -> (String, String, Option<DateTime<Utc>>) {
    match search.get(id).await {
        Ok(Some(doc)) => (doc.text, doc.fields.get("source").map(|v| v.to_display_string()).unwrap_or_default(), created_at_from_fields(&doc.fields)),
        _ => (String::new(), String::new(), None),
    }
}

fn created_at_from_fields(fields: &Filters) -> Option<DateTime<Utc>> {
    match fields.get("created_at") {
        Some(MetadataValue::String(s)) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

async fn keyword_branch(query: &ProcessedQuery, search: &dyn SearchView, config: &RetrievalConfig, filters: &Filters) -> FusionInput {
    let opts = SearchOptions {
        offset: 0,
        limit: config.max_candidates,
        filters: filters.clone(),
        sort: None,
        highlight: false,
    };

    let results = match search.search(&query.normalized, &opts).await {
        Ok(hits) => hits
            .into_iter()
            .map(|hit| {
                let source = hit.doc.fields.get("source").map(|v| v.to_display_string()).unwrap_or_default();
                let created_at = created_at_from_fields(&hit.doc.fields);
                FusionItem {
                    id: hit.id,
                    score: hit.score,
                    content: hit.doc.text,
                    source,
                    metadata: BTreeMap::new(),
                    created_at,
                }
            })
            .collect(),
        Err(err) => {
            warn!(%err, "keyword branch failed");
            Vec::new()
        }
    };

    FusionInput {
        method: "keyword".to_string(),
        results,
        weight: 1.0,
    }
}

async fn graph_branch(query: &ProcessedQuery, graph: &dyn GraphView, search: &dyn SearchView, config: &RetrievalConfig) -> FusionInput {
    let mut results = Vec::new();
    let opts = NeighborOptions {
        max_depth: config.max_depth,
        edge_types: Vec::new(),
        direction: crate::storage::Direction::Both,
    };

    for entity in &query.entities {
        let seed_node = match graph.get_node(&entity.id).await {
            Ok(Some(node)) => node,
            _ => continue,
        };
        let neighbors = match graph.neighbors(&seed_node.id, &opts).await {
            Ok(n) => n,
            Err(err) => {
                warn!(%err, "graph branch failed for entity");
                continue;
            }
        };
        for (hop_index, (neighbor, edge_weight)) in neighbors.iter().enumerate() {
            // Inverse path length weighted by the connecting edge's
            // weight (§4.7); hop_index is a flat BFS-order proxy for
            // distance in the mock backend.
            let score = edge_weight / (hop_index as f32 + 2.0);
            let (content, source, created_at) = hydrate(search, &neighbor.id).await;
            results.push(FusionItem {
                id: neighbor.id.clone(),
                score,
                content,
                source,
                metadata: BTreeMap::new(),
                created_at,
            });
        }
    }

    // Multiple query entities can expand to the same neighbor id; keep
    // only the highest-scoring occurrence, deduped by id directly
    // rather than by adjacency after a score sort.
    let mut best_by_id: BTreeMap<String, FusionItem> = BTreeMap::new();
    for item in results {
        best_by_id
            .entry(item.id.clone())
            .and_modify(|existing| {
                if item.score > existing.score {
                    *existing = item.clone();
                }
            })
            .or_insert(item);
    }
    let mut results: Vec<FusionItem> = best_by_id.into_values().collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    FusionInput {
        method: "graph".to_string(),
        results,
        weight: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::process_query;
    use crate::storage::mock::{MockGraphView, MockSearchView, MockVectorView};
    use memory_config::QueryProcessorConfig;

    #[tokio::test]
    async fn retrieval_never_errors_even_with_empty_stores() {
        let vector = MockVectorView::default();
        let graph = MockGraphView::default();
        let search = MockSearchView::default();
        let query = process_query("openai", &QueryProcessorConfig::default(), Default::default()).await;
        let config = RetrievalConfig::default();

        let outcome = retrieve(&query, None, &vector, &graph, &search, &config, &Filters::new()).await;
        assert_eq!(outcome.total_candidates(), 0);
    }

    #[tokio::test]
    async fn tiny_deadline_yields_empty_results_not_an_error() {
        let vector = MockVectorView::default();
        let graph = MockGraphView::default();
        let search = MockSearchView::default();
        let query = process_query("openai", &QueryProcessorConfig::default(), Default::default()).await;
        let mut config = RetrievalConfig::default();
        config.vector_timeout_ms = 0;
        config.search_timeout_ms = 0;
        config.graph_timeout_ms = 0;

        let outcome = retrieve(&query, None, &vector, &graph, &search, &config, &Filters::new()).await;
        assert_eq!(outcome.total_candidates(), 0);
    }
}
