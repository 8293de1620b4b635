//! In-memory implementations of the three storage contracts (§4.12).
//!
//! Concrete physical backends are out of scope (§1); these mocks exist
//! so the pipeline is runnable and testable end to end. Guarded by the
//! same reader/writer discipline §5 requires of the provenance tracker
//! and any in-memory mock store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult, View as ViewKind};
use crate::schema::{Edge, EdgeType, Node, NodeType, NumericVector};

use super::{
    Community, Direction, Filters, GraphView, NeighborOptions, PageRankOptions, Path, PathQuery,
    SearchDoc, SearchHit, SearchOptions, SearchView, VectorHit, VectorRecord, VectorView,
};

#[derive(Default)]
pub struct MockVectorView {
    records: RwLock<BTreeMap<String, VectorRecord>>,
    closed: AtomicBool,
}

#[async_trait]
impl VectorView for MockVectorView {
    async fn store(&self, id: &str, embedding: NumericVector, metadata: Filters) -> EngineResult<()> {
        let mut records = self.records.write().await;
        records.insert(
            id.to_string(),
            VectorRecord {
                id: id.to_string(),
                embedding,
                metadata,
            },
        );
        Ok(())
    }

    async fn search(&self, query: &NumericVector, k: usize, filters: &Filters) -> EngineResult<Vec<VectorHit>> {
        let records = self.records.read().await;
        let mut hits: Vec<VectorHit> = records
            .values()
            .filter(|record| matches_filters(&record.metadata, filters))
            .filter_map(|record| {
                let score = query.cosine_similarity(&record.embedding)?;
                Some(VectorHit {
                    id: record.id.clone(),
                    score,
                    embedding: Some(record.embedding.clone()),
                    metadata: record.metadata.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn update(&self, id: &str, metadata: Filters) -> EngineResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.metadata = metadata;
                Ok(())
            }
            None => Err(EngineError::not_found("vector_record", id)),
        }
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<VectorRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn count(&self) -> EngineResult<usize> {
        Ok(self.records.read().await.len())
    }

    async fn health(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn matches_filters(metadata: &Filters, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(k, v)| metadata.get(k).map(|mv| mv == v).unwrap_or(false))
}

#[derive(Default)]
pub struct MockGraphView {
    nodes: RwLock<BTreeMap<String, Node>>,
    edges: RwLock<BTreeMap<String, Edge>>,
    closed: AtomicBool,
}

#[async_trait]
impl GraphView for MockGraphView {
    async fn create_node(&self, node: Node) -> EngineResult<()> {
        self.nodes.write().await.insert(node.id.clone(), node);
        Ok(())
    }

    async fn create_edge(&self, edge: Edge) -> EngineResult<()> {
        self.edges.write().await.insert(edge.id.clone(), edge);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> EngineResult<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn get_edge(&self, id: &str) -> EngineResult<Option<Edge>> {
        Ok(self.edges.read().await.get(id).cloned())
    }

    async fn update_node(&self, node: Node) -> EngineResult<()> {
        let mut nodes = self.nodes.write().await;
        if !nodes.contains_key(&node.id) {
            return Err(EngineError::not_found("node", &node.id));
        }
        nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn update_edge(&self, edge: Edge) -> EngineResult<()> {
        let mut edges = self.edges.write().await;
        if !edges.contains_key(&edge.id) {
            return Err(EngineError::not_found("edge", &edge.id));
        }
        edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> EngineResult<()> {
        self.nodes.write().await.remove(id);
        // I2: deleting a node cascades to all incident edges.
        let mut edges = self.edges.write().await;
        edges.retain(|_, edge| edge.from != id && edge.to != id);
        Ok(())
    }

    async fn delete_edge(&self, id: &str) -> EngineResult<()> {
        self.edges.write().await.remove(id);
        Ok(())
    }

    async fn find_paths(&self, from: &str, to: &str, query: &PathQuery) -> EngineResult<Vec<Path>> {
        let edges = self.edges.read().await;
        let mut results = Vec::new();
        let mut stack = vec![(from.to_string(), vec![from.to_string()], Vec::<String>::new(), 0.0f32)];
        let mut visited_paths = 0usize;

        while let Some((current, path_nodes, path_edges, weight)) = stack.pop() {
            if path_nodes.len() as usize > query.max_depth + 1 {
                continue;
            }
            if current == to && path_nodes.len() > 1 {
                results.push(Path {
                    nodes: path_nodes.clone(),
                    edges: path_edges.clone(),
                    total_weight: weight,
                });
                visited_paths += 1;
                if visited_paths >= query.max_results {
                    break;
                }
                continue;
            }
            for edge in edges.values() {
                let matches_type = query.edge_types.is_empty() || query.edge_types.contains(&edge.edge_type);
                if !matches_type {
                    continue;
                }
                if edge.from == current && !path_nodes.contains(&edge.to) {
                    let mut next_nodes = path_nodes.clone();
                    next_nodes.push(edge.to.clone());
                    let mut next_edges = path_edges.clone();
                    next_edges.push(edge.id.clone());
                    stack.push((edge.to.clone(), next_nodes, next_edges, weight + edge.weight));
                }
            }
        }

        Ok(results)
    }

    async fn neighbors(&self, id: &str, opts: &NeighborOptions) -> EngineResult<Vec<(Node, f32)>> {
        let edges = self.edges.read().await;
        let nodes = self.nodes.read().await;
        let mut frontier = vec![id.to_string()];
        let mut visited = std::collections::HashSet::new();
        visited.insert(id.to_string());
        let mut result: Vec<(String, f32)> = Vec::new();

        for _ in 0..opts.max_depth {
            let mut next_frontier = Vec::new();
            for current in &frontier {
                for edge in edges.values() {
                    let type_ok = opts.edge_types.is_empty() || opts.edge_types.contains(&edge.edge_type);
                    if !type_ok {
                        continue;
                    }
                    let candidate = match opts.direction {
                        Direction::Outgoing if &edge.from == current => Some(edge.to.clone()),
                        Direction::Incoming if &edge.to == current => Some(edge.from.clone()),
                        Direction::Both if &edge.from == current => Some(edge.to.clone()),
                        Direction::Both if &edge.to == current => Some(edge.from.clone()),
                        _ => None,
                    };
                    if let Some(candidate) = candidate {
                        if visited.insert(candidate.clone()) {
                            result.push((candidate.clone(), edge.weight));
                            next_frontier.push(candidate);
                        }
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(result.into_iter().filter_map(|(id, weight)| nodes.get(&id).cloned().map(|node| (node, weight))).collect())
    }

    async fn pagerank(&self, opts: &PageRankOptions) -> EngineResult<BTreeMap<String, f32>> {
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        let n = nodes.len().max(1);
        let mut scores: BTreeMap<String, f32> = nodes.keys().map(|id| (id.clone(), 1.0 / n as f32)).collect();

        let mut outgoing: BTreeMap<String, Vec<(String, f32)>> = BTreeMap::new();
        for edge in edges.values() {
            outgoing.entry(edge.from.clone()).or_default().push((edge.to.clone(), edge.weight.max(0.0001)));
        }

        for _ in 0..opts.max_iter {
            let mut next_scores: BTreeMap<String, f32> = nodes
                .keys()
                .map(|id| (id.clone(), (1.0 - opts.alpha) / n as f32))
                .collect();

            for (from, score) in &scores {
                if let Some(targets) = outgoing.get(from) {
                    let total_weight: f32 = targets.iter().map(|(_, w)| w).sum();
                    if total_weight > 0.0 {
                        for (to, weight) in targets {
                            *next_scores.entry(to.clone()).or_insert(0.0) += opts.alpha * score * (weight / total_weight);
                        }
                    }
                } else {
                    // Dangling node: redistribute mass uniformly (standard PageRank fix-up).
                    for id in nodes.keys() {
                        *next_scores.entry(id.clone()).or_insert(0.0) += opts.alpha * score / n as f32;
                    }
                }
            }

            let delta: f32 = scores
                .iter()
                .map(|(id, old)| (old - next_scores.get(id).copied().unwrap_or(0.0)).abs())
                .sum();
            scores = next_scores;
            if delta < opts.tolerance {
                break;
            }
        }

        Ok(scores)
    }

    async fn community_detection(&self) -> EngineResult<Vec<Community>> {
        // Union-find over connected components — a reasonable baseline
        // "community" notion for a mock with no label-propagation backend.
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        let mut parent: BTreeMap<String, String> = nodes.keys().map(|id| (id.clone(), id.clone())).collect();

        fn find(parent: &mut BTreeMap<String, String>, id: &str) -> String {
            let p = parent.get(id).cloned().unwrap_or_else(|| id.to_string());
            if p == id {
                id.to_string()
            } else {
                let root = find(parent, &p);
                parent.insert(id.to_string(), root.clone());
                root
            }
        }

        for edge in edges.values() {
            let ra = find(&mut parent, &edge.from);
            let rb = find(&mut parent, &edge.to);
            if ra != rb {
                parent.insert(ra, rb);
            }
        }

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in nodes.keys() {
            let root = find(&mut parent, id);
            groups.entry(root).or_default().push(id.clone());
        }

        Ok(groups
            .into_iter()
            .enumerate()
            .map(|(i, (_, members))| Community {
                id: format!("community_{i}"),
                members,
            })
            .collect())
    }

    async fn find_nodes_by_type(&self, node_type: NodeType) -> EngineResult<Vec<Node>> {
        Ok(self.nodes.read().await.values().filter(|n| n.node_type == node_type).cloned().collect())
    }

    async fn find_edges_by_type(&self, edge_type: EdgeType) -> EngineResult<Vec<Edge>> {
        Ok(self.edges.read().await.values().filter(|e| e.edge_type == edge_type).cloned().collect())
    }

    async fn node_count(&self) -> EngineResult<usize> {
        Ok(self.nodes.read().await.len())
    }

    async fn edge_count(&self) -> EngineResult<usize> {
        Ok(self.edges.read().await.len())
    }

    async fn health(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl std::error::Error for MockStorageError {}
impl std::fmt::Display for MockStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct MockStorageError(pub String);

/// Helper for mock implementations to report a `StorageError` without
/// every mock defining its own error type.
pub fn storage_error(view: ViewKind, op: &str, message: impl Into<String>) -> EngineError {
    EngineError::storage(view, op, MockStorageError(message.into()))
}

#[derive(Default)]
pub struct MockSearchView {
    docs: RwLock<BTreeMap<String, SearchDoc>>,
    closed: AtomicBool,
}

#[async_trait]
impl SearchView for MockSearchView {
    async fn index(&self, doc: SearchDoc) -> EngineResult<()> {
        self.docs.write().await.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn search(&self, text: &str, opts: &SearchOptions) -> EngineResult<Vec<SearchHit>> {
        let docs = self.docs.read().await;
        let terms: Vec<String> = text.to_lowercase().split_whitespace().map(|s| s.to_string()).collect();

        let mut hits: Vec<SearchHit> = docs
            .values()
            .filter(|doc| doc.fields.iter().all(|(k, v)| opts.filters.get(k).map(|fv| fv == v).unwrap_or(true)))
            .filter_map(|doc| {
                let lower = doc.text.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                // BM25-ish: term coverage weighted by a soft length-normalization factor.
                let length_norm = 1.0 / (1.0 + (doc.text.len() as f32 / 200.0).ln_1p());
                let score = (matched as f32 / terms.len().max(1) as f32) * (1.0 + length_norm);
                let highlights = if opts.highlight {
                    terms.iter().filter(|t| lower.contains(t.as_str())).cloned().collect()
                } else {
                    Vec::new()
                };
                Some(SearchHit {
                    id: doc.id.clone(),
                    score,
                    doc: doc.clone(),
                    highlights,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        let end = (opts.offset + opts.limit).min(hits.len());
        let start = opts.offset.min(hits.len());
        Ok(hits[start..end].to_vec())
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.docs.write().await.remove(id);
        Ok(())
    }

    async fn update(&self, doc: SearchDoc) -> EngineResult<()> {
        self.docs.write().await.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn get(&self, id: &str) -> EngineResult<Option<SearchDoc>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn exists(&self, id: &str) -> EngineResult<bool> {
        Ok(self.docs.read().await.contains_key(id))
    }

    async fn count(&self) -> EngineResult<usize> {
        Ok(self.docs.read().await.len())
    }

    async fn suggest(&self, query: &str, _field: &str, size: usize) -> EngineResult<Vec<String>> {
        let docs = self.docs.read().await;
        let query_lower = query.to_lowercase();
        let mut suggestions: Vec<String> = docs
            .values()
            .flat_map(|doc| doc.text.split_whitespace())
            .filter(|word| word.to_lowercase().starts_with(&query_lower))
            .map(|s| s.to_string())
            .collect();
        suggestions.sort();
        suggestions.dedup();
        suggestions.truncate(size);
        Ok(suggestions)
    }

    async fn create_index(&self, _name: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn delete_index(&self, _name: &str) -> EngineResult<()> {
        self.docs.write().await.clear();
        Ok(())
    }

    async fn refresh(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MetadataValue;

    #[tokio::test]
    async fn vector_store_and_search_round_trip() {
        let view = MockVectorView::default();
        view.store("a", NumericVector(vec![1.0, 0.0]), Filters::new()).await.unwrap();
        view.store("b", NumericVector(vec![0.0, 1.0]), Filters::new()).await.unwrap();

        let hits = view.search(&NumericVector(vec![1.0, 0.0]), 5, &Filters::new()).await.unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn vector_search_skips_mismatched_dimensions_not_zero_score() {
        let view = MockVectorView::default();
        view.store("a", NumericVector(vec![1.0, 0.0, 0.0]), Filters::new()).await.unwrap();
        let hits = view.search(&NumericVector(vec![1.0, 0.0]), 5, &Filters::new()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn graph_delete_node_cascades_to_edges() {
        let view = MockGraphView::default();
        let now = chrono::Utc::now();
        view.create_node(Node {
            id: "n1".into(),
            node_type: NodeType::Entity,
            properties: Default::default(),
            embedding: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        view.create_node(Node {
            id: "n2".into(),
            node_type: NodeType::Entity,
            properties: Default::default(),
            embedding: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        view.create_edge(Edge {
            id: "e1".into(),
            from: "n1".into(),
            to: "n2".into(),
            edge_type: EdgeType::RelatedTo,
            weight: 1.0,
            properties: Default::default(),
            created_at: now,
        })
        .await
        .unwrap();

        view.delete_node("n1").await.unwrap();
        assert_eq!(view.edge_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_node_creates_then_updates() {
        let view = MockGraphView::default();
        let now = chrono::Utc::now();
        let mut props = Filters::new();
        props.insert("x".into(), MetadataValue::Number(1.0));
        let node = Node {
            id: "n1".into(),
            node_type: NodeType::Entity,
            properties: props.clone(),
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        view.upsert_node(node.clone()).await.unwrap();
        view.upsert_node(node).await.unwrap();
        assert_eq!(view.node_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_finds_by_keyword() {
        let view = MockSearchView::default();
        view.index(SearchDoc {
            id: "d1".into(),
            text: "OpenAI was founded in 2015".into(),
            fields: Filters::new(),
        })
        .await
        .unwrap();

        let hits = view.search("OpenAI founded", &SearchOptions::default()).await.unwrap();
        assert_eq!(hits[0].id, "d1");
    }
}
