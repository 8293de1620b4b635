//! `memory_write` tool (§6): the write-side tool wrapping
//! `MemoryWriter::write`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use memory_core::schema::MetadataValue;
use memory_core::writer::WriteMetadata;
use memory_core::EngineError;
use serde_json::{json, Value};

use crate::handle::MemoryEngineHandle;
use crate::{Tool, ToolCallResult, ToolSpec};

pub struct MemoryWriteTool {
    pub handle: Arc<MemoryEngineHandle>,
}

#[async_trait]
impl Tool for MemoryWriteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_write".to_string(),
            description: "Ingests content into the vector, graph, and search views with provenance tracking.".to_string(),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallResult, EngineError> {
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation("content", "must be a non-empty string", "null"))?;

        let source = args.get("source").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let tags: Vec<String> = match args.get("tags") {
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        };
        let require_evidence = args.get("require_evidence").and_then(Value::as_bool).unwrap_or(false);
        let extra: BTreeMap<String, MetadataValue> = match args.get("metadata") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), MetadataValue::from_json(v))).collect(),
            _ => BTreeMap::new(),
        };

        let metadata = WriteMetadata {
            source,
            tags,
            require_evidence,
            extra,
            ..Default::default()
        };

        let result = self.handle.writer.write(content, metadata).await?;

        let data = json!({
            "memory_id": result.memory_id,
            "candidate_count": result.candidate_count,
            "conflicts_found": result.conflicts_found,
            "entities_linked": result.entities_linked,
            "provenance_id": result.provenance_id,
            "chunks_created": result.chunks_created,
            "graph_updates": {
                "nodes_created": result.graph_updates.nodes_created,
                "edges_created": result.graph_updates.edges_created,
            },
        });

        let summary = format!(
            "Wrote memory {} ({} chunk(s), {} entit(y/ies) linked, {} node(s)/{} edge(s) created).",
            result.memory_id,
            result.chunks_created,
            result.entities_linked.len(),
            result.graph_updates.nodes_created,
            result.graph_updates.edges_created
        );

        Ok(ToolCallResult { data, summary })
    }
}
