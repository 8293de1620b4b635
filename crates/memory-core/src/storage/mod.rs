//! Storage contracts and the multi-view coordinator (§4.1).
//!
//! Three async traits stand in for the vector engine, graph database,
//! and text search engine the pipeline depends on; concrete backends
//! are out of scope (§1). `MultiViewCoordinator` composes the three
//! behind the two atomicity-lite primitives the writer needs.
//!
//! Grounded on `crates/tools/src/lib.rs`'s `#[async_trait] trait Tool`
//! (trait-object-friendly async contract) generalized to three
//! storage-shaped traits.

pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult, View};
use crate::schema::{Chunk, Claim, Edge, EdgeType, MetadataValue, Node, NodeType, NumericVector};

pub type Filters = BTreeMap<String, MetadataValue>;

// ── Vector view ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub embedding: Option<NumericVector>,
    pub metadata: Filters,
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: NumericVector,
    pub metadata: Filters,
}

#[async_trait]
pub trait VectorView: Send + Sync {
    async fn store(&self, id: &str, embedding: NumericVector, metadata: Filters) -> EngineResult<()>;
    async fn search(&self, query: &NumericVector, k: usize, filters: &Filters) -> EngineResult<Vec<VectorHit>>;
    async fn update(&self, id: &str, metadata: Filters) -> EngineResult<()>;
    async fn delete(&self, id: &str) -> EngineResult<()>;
    async fn get(&self, id: &str) -> EngineResult<Option<VectorRecord>>;
    async fn count(&self) -> EngineResult<usize>;
    async fn health(&self) -> bool;
    async fn close(&self) -> EngineResult<()>;

    /// Additive convenience batch write; the default implementation
    /// just loops, which is correct (if not maximally efficient) for
    /// any backend.
    async fn store_batch(&self, items: Vec<(String, NumericVector, Filters)>) -> EngineResult<()> {
        for (id, embedding, metadata) in items {
            self.store(&id, embedding, metadata).await?;
        }
        Ok(())
    }
}

// ── Graph view ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone)]
pub struct PathQuery {
    pub max_depth: usize,
    pub max_results: usize,
    pub edge_types: Vec<EdgeType>,
    pub node_types: Vec<NodeType>,
    pub filters: Filters,
}

impl Default for PathQuery {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_results: 10,
            edge_types: Vec::new(),
            node_types: Vec::new(),
            filters: Filters::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Path {
    pub nodes: Vec<String>,
    pub edges: Vec<String>,
    pub total_weight: f32,
}

#[derive(Debug, Clone)]
pub struct NeighborOptions {
    pub max_depth: usize,
    pub edge_types: Vec<EdgeType>,
    pub direction: Direction,
}

impl Default for NeighborOptions {
    fn default() -> Self {
        Self {
            max_depth: 1,
            edge_types: Vec::new(),
            direction: Direction::Both,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageRankOptions {
    pub alpha: f32,
    pub max_iter: usize,
    pub tolerance: f32,
    pub seeds: Option<Vec<String>>,
}

impl Default for PageRankOptions {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            max_iter: 50,
            tolerance: 1e-6,
            seeds: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Community {
    pub id: String,
    pub members: Vec<String>,
}

#[async_trait]
pub trait GraphView: Send + Sync {
    async fn create_node(&self, node: Node) -> EngineResult<()>;
    async fn create_edge(&self, edge: Edge) -> EngineResult<()>;
    async fn get_node(&self, id: &str) -> EngineResult<Option<Node>>;
    async fn get_edge(&self, id: &str) -> EngineResult<Option<Edge>>;
    async fn update_node(&self, node: Node) -> EngineResult<()>;
    async fn update_edge(&self, edge: Edge) -> EngineResult<()>;
    /// Cascades: deletes all edges incident to `id` as well (§3 I2).
    async fn delete_node(&self, id: &str) -> EngineResult<()>;
    async fn delete_edge(&self, id: &str) -> EngineResult<()>;
    async fn find_paths(&self, from: &str, to: &str, query: &PathQuery) -> EngineResult<Vec<Path>>;
    /// Returns each reachable node paired with the weight of the edge
    /// that discovered it during the BFS traversal (the last hop's edge,
    /// not a cumulative path weight) so callers can factor edge weight
    /// into relevance scoring alongside hop distance (§4.7).
    async fn neighbors(&self, id: &str, opts: &NeighborOptions) -> EngineResult<Vec<(Node, f32)>>;
    async fn pagerank(&self, opts: &PageRankOptions) -> EngineResult<BTreeMap<String, f32>>;
    async fn community_detection(&self) -> EngineResult<Vec<Community>>;
    async fn find_nodes_by_type(&self, node_type: NodeType) -> EngineResult<Vec<Node>>;
    async fn find_edges_by_type(&self, edge_type: EdgeType) -> EngineResult<Vec<Edge>>;
    async fn node_count(&self) -> EngineResult<usize>;
    async fn edge_count(&self) -> EngineResult<usize>;
    async fn health(&self) -> bool;
    async fn close(&self) -> EngineResult<()>;

    /// "Try create; on duplicate, update" — the §4.1 definition of
    /// upsert used by the coordinator's `store_chunk`/`store_claim`.
    async fn upsert_node(&self, node: Node) -> EngineResult<()> {
        match self.get_node(&node.id).await? {
            Some(_) => self.update_node(node).await,
            None => self.create_node(node).await,
        }
    }

    async fn upsert_edge(&self, edge: Edge) -> EngineResult<()> {
        match self.get_edge(&edge.id).await? {
            Some(_) => self.update_edge(edge).await,
            None => self.create_edge(edge).await,
        }
    }
}

// ── Search view ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub id: String,
    pub text: String,
    pub fields: Filters,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub offset: usize,
    pub limit: usize,
    pub filters: Filters,
    pub sort: Option<String>,
    pub highlight: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 10,
            filters: Filters::new(),
            sort: None,
            highlight: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub doc: SearchDoc,
    pub highlights: Vec<String>,
}

#[async_trait]
pub trait SearchView: Send + Sync {
    async fn index(&self, doc: SearchDoc) -> EngineResult<()>;
    async fn search(&self, text: &str, opts: &SearchOptions) -> EngineResult<Vec<SearchHit>>;
    async fn delete(&self, id: &str) -> EngineResult<()>;
    async fn update(&self, doc: SearchDoc) -> EngineResult<()>;
    async fn get(&self, id: &str) -> EngineResult<Option<SearchDoc>>;
    async fn exists(&self, id: &str) -> EngineResult<bool>;
    async fn count(&self) -> EngineResult<usize>;
    async fn suggest(&self, query: &str, field: &str, size: usize) -> EngineResult<Vec<String>>;
    async fn multi_search(&self, queries: &[String], opts: &SearchOptions) -> EngineResult<Vec<Vec<SearchHit>>> {
        let mut out = Vec::with_capacity(queries.len());
        for q in queries {
            out.push(self.search(q, opts).await?);
        }
        Ok(out)
    }
    async fn create_index(&self, name: &str) -> EngineResult<()>;
    async fn delete_index(&self, name: &str) -> EngineResult<()>;
    async fn refresh(&self) -> EngineResult<()>;
    async fn close(&self) -> EngineResult<()>;
    async fn health(&self) -> bool;
}

// ── Multi-view coordinator ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ViewTimeouts {
    pub vector_ms: u64,
    pub graph_ms: u64,
    pub search_ms: u64,
}

impl Default for ViewTimeouts {
    fn default() -> Self {
        Self {
            vector_ms: 2000,
            graph_ms: 2000,
            search_ms: 2000,
        }
    }
}

/// Per-view outcome of a coordinated multi-view write. `ok` views
/// succeeded; `failed` views carry the (view, message) that failed.
/// The coordinator never rolls back a partially-succeeded write (§5,
/// §7) — callers decide what to do with a partial `WriteOutcome`.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub succeeded: Vec<View>,
    pub failed: Vec<(View, String)>,
}

impl WriteOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct MultiViewCoordinator {
    pub vector: Arc<dyn VectorView>,
    pub graph: Arc<dyn GraphView>,
    pub search: Arc<dyn SearchView>,
    timeouts: ViewTimeouts,
}

async fn with_timeout<T>(ms: u64, op: &str, fut: impl std::future::Future<Output = EngineResult<T>>) -> EngineResult<T> {
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(op.to_string())),
    }
}

impl MultiViewCoordinator {
    pub fn new(
        vector: Arc<dyn VectorView>,
        graph: Arc<dyn GraphView>,
        search: Arc<dyn SearchView>,
        timeouts: ViewTimeouts,
    ) -> Self {
        Self {
            vector,
            graph,
            search,
            timeouts,
        }
    }

    /// `store_chunk(chunk) = {vector.store; graph.upsert(node); search.index}`
    /// applied with a per-view timeout; on partial failure this returns
    /// an aggregated `WriteOutcome` rather than rolling back (§4.1, §5).
    pub async fn store_chunk(&self, chunk: &Chunk, embedding: Option<NumericVector>) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();

        if let Some(embedding) = embedding {
            let mut metadata = Filters::new();
            metadata.insert("source".to_string(), MetadataValue::String(chunk.source.clone()));
            let result = with_timeout(self.timeouts.vector_ms, "vector.store", self.vector.store(&chunk.id, embedding, metadata)).await;
            record(&mut outcome, View::Vector, result);
        }

        let now = chrono::Utc::now();
        let mut properties = Filters::new();
        properties.insert("content".to_string(), MetadataValue::String(chunk.content.clone()));
        properties.insert("source".to_string(), MetadataValue::String(chunk.source.clone()));
        let node = Node {
            id: chunk.id.clone(),
            node_type: NodeType::Source,
            properties,
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        let result = with_timeout(self.timeouts.graph_ms, "graph.upsert_node", self.graph.upsert_node(node)).await;
        record(&mut outcome, View::Graph, result);

        let mut fields = Filters::new();
        fields.insert("source".to_string(), MetadataValue::String(chunk.source.clone()));
        fields.insert("created_at".to_string(), MetadataValue::String(now.to_rfc3339()));
        let doc = SearchDoc {
            id: chunk.id.clone(),
            text: chunk.content.clone(),
            fields,
        };
        let result = with_timeout(self.timeouts.search_ms, "search.index", self.search.index(doc)).await;
        record(&mut outcome, View::Search, result);

        outcome
    }

    /// `store_claim(claim) = {graph.upsert(claim_node); graph.create_edge(supporting_chunk SUPPORTS claim); search.index(claim.statement)}`.
    pub async fn store_claim(&self, claim: &Claim) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let now = chrono::Utc::now();

        let mut properties = Filters::new();
        properties.insert("statement".to_string(), MetadataValue::String(claim.statement.clone()));
        properties.insert("predicate".to_string(), MetadataValue::String(claim.predicate.clone()));
        let node = Node {
            id: claim.id.clone(),
            node_type: NodeType::Claim,
            properties,
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        let result = with_timeout(self.timeouts.graph_ms, "graph.upsert_node", self.graph.upsert_node(node)).await;
        record(&mut outcome, View::Graph, result);

        let edge = Edge {
            id: Edge::directed_id(&claim.supporting_chunk_id, &claim.id, EdgeType::Supports),
            from: claim.supporting_chunk_id.clone(),
            to: claim.id.clone(),
            edge_type: EdgeType::Supports,
            weight: claim.confidence,
            properties: Filters::new(),
            created_at: now,
        };
        let result = with_timeout(self.timeouts.graph_ms, "graph.upsert_edge", self.graph.upsert_edge(edge)).await;
        record(&mut outcome, View::Graph, result);

        let mut fields = Filters::new();
        fields.insert("created_at".to_string(), MetadataValue::String(now.to_rfc3339()));
        let doc = SearchDoc {
            id: claim.id.clone(),
            text: claim.statement.clone(),
            fields,
        };
        let result = with_timeout(self.timeouts.search_ms, "search.index", self.search.index(doc)).await;
        record(&mut outcome, View::Search, result);

        outcome
    }

    /// Closes all three handles in LIFO order relative to how the
    /// coordinator acquired them (vector, graph, search) — §9's
    /// "defer"-style cleanup note.
    pub async fn close_all(&self) -> EngineResult<()> {
        self.search.close().await?;
        self.graph.close().await?;
        self.vector.close().await?;
        Ok(())
    }
}

fn record<T>(outcome: &mut WriteOutcome, view: View, result: EngineResult<T>) {
    match result {
        Ok(_) => outcome.succeeded.push(view),
        Err(err) => outcome.failed.push((view, err.to_string())),
    }
}
