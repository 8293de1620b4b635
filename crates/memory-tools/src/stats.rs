//! `memory_stats` tool (§6): counts, storage usage, and performance
//! health across the three views plus the provenance tracker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use memory_core::EngineError;
use serde_json::{json, Value};

use crate::handle::MemoryEngineHandle;
use crate::{Tool, ToolCallResult, ToolSpec};

pub struct MemoryStatsTool {
    pub handle: Arc<MemoryEngineHandle>,
}

#[async_trait]
impl Tool for MemoryStatsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_stats".to_string(),
            description: "Reports counts, storage health, and quarantine state across the memory engine's views.".to_string(),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallResult, EngineError> {
        let include_performance = args.get("include_performance").and_then(Value::as_bool).unwrap_or(true);
        let include_storage = args.get("include_storage").and_then(Value::as_bool).unwrap_or(true);

        let coordinator = &self.handle.writer.coordinator;
        let vector_count = coordinator.vector.count().await.unwrap_or(0);
        let graph_node_count = coordinator.graph.node_count().await.unwrap_or(0);
        let graph_edge_count = coordinator.graph.edge_count().await.unwrap_or(0);
        let search_count = coordinator.search.count().await.unwrap_or(0);
        let quarantined_count = self.handle.writer.provenance.quarantined_count().await;

        let mut data = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "counts": {
                "vector_records": vector_count,
                "graph_nodes": graph_node_count,
                "graph_edges": graph_edge_count,
                "search_documents": search_count,
            },
            "quarantined_provenance_count": quarantined_count,
        });

        if include_storage {
            data["storage"] = json!({
                "vector": vector_count,
                "graph": graph_node_count + graph_edge_count,
                "search": search_count,
            });
        }

        if include_performance {
            let vector_healthy = coordinator.vector.health().await;
            let graph_healthy = coordinator.graph.health().await;
            let search_healthy = coordinator.search.health().await;
            data["performance"] = json!({
                "vector_healthy": vector_healthy,
                "graph_healthy": graph_healthy,
                "search_healthy": search_healthy,
            });
        }

        let summary = format!(
            "{vector_count} vector record(s), {graph_node_count} node(s)/{graph_edge_count} edge(s), {search_count} indexed doc(s), {quarantined_count} quarantined provenance record(s)."
        );

        Ok(ToolCallResult { data, summary })
    }
}
