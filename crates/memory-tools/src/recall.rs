//! `memory_recall` tool (§6): the read-side tool wrapping
//! `MemoryReader::recall`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use memory_core::reader::RecallOptions;
use memory_core::EngineError;
use serde_json::{json, Value};

use crate::handle::MemoryEngineHandle;
use crate::{Tool, ToolCallResult, ToolSpec};

pub struct MemoryRecallTool {
    pub handle: Arc<MemoryEngineHandle>,
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_recall".to_string(),
            description: "Answers a query by fusing vector, keyword, and graph retrieval into ranked evidence.".to_string(),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallResult, EngineError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation("query", "must be a non-empty string", "null"))?;

        let max_results = args.get("max_results").and_then(Value::as_u64).unwrap_or(10) as usize;
        let time_budget_ms = args.get("time_budget_ms").and_then(Value::as_u64).unwrap_or(0);
        let include_graph = args.get("include_graph").and_then(Value::as_bool).unwrap_or(true);

        let filters: BTreeMap<String, String> = match args.get("filters") {
            Some(Value::Object(map)) => map.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect(),
            _ => BTreeMap::new(),
        };

        let options = RecallOptions {
            max_results,
            time_budget_ms,
            filters,
            include_graph,
            user_id: None,
            ..Default::default()
        };

        let response = self.handle.reader.recall(query, options).await?;

        let evidence: Vec<Value> = response
            .evidence
            .iter()
            .map(|e| {
                json!({
                    "content": e.content,
                    "source": e.source,
                    "confidence": e.confidence,
                    "why_selected": e.why_selected,
                    "relation_map": e.relation_map,
                    "provenance": {
                        "source": e.provenance.source,
                        "timestamp": e.provenance.timestamp.to_rfc3339(),
                        "version": e.provenance.version,
                        "user_id": e.provenance.user_id,
                    },
                    "graph_path": e.graph_path,
                })
            })
            .collect();

        let conflicts: Vec<Value> = response
            .conflicts
            .iter()
            .map(|c| json!({"type": c.kind, "severity": c.severity, "left": c.left, "right": c.right}))
            .collect();

        let data = json!({
            "evidence": evidence,
            "conflicts": conflicts,
            "stats": {
                "query_time_ms": response.stats.query_time_ms,
                "vector_results": response.stats.vector_results,
                "graph_results": response.stats.graph_results,
                "search_results": response.stats.search_results,
                "fusion_score": response.stats.fusion_score,
                "total_candidates": response.stats.total_candidates,
            },
            "self_critique": response.self_critique,
        });

        let summary = format!("{} evidence item(s), {} conflict(s), {}ms.", evidence.len(), conflicts.len(), response.stats.query_time_ms);

        Ok(ToolCallResult { data, summary })
    }
}
