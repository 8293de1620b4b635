//! `memory_manage` tool (§6): pin, forget, or decay memories by id.
//!
//! `query`-based targeting is explicitly not implemented — evidence
//! carries no `memory_id` back-reference today (§4.10's `Evidence` has
//! `source`/`provenance` but not the originating memory id), so there
//! is no sound way to resolve a free-text query to provenance records.
//! Callers must pass `memory_ids`; a `query`-only request returns
//! `affected_count=0` with an explanatory message rather than guessing.

use std::sync::Arc;

use async_trait::async_trait;
use memory_core::EngineError;
use serde_json::{json, Value};

use crate::handle::MemoryEngineHandle;
use crate::{Tool, ToolCallResult, ToolSpec};

pub struct MemoryManageTool {
    pub handle: Arc<MemoryEngineHandle>,
}

#[async_trait]
impl Tool for MemoryManageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_manage".to_string(),
            description: "Pins, forgets, or decays the confidence of memories by id.".to_string(),
        }
    }

    async fn call(&self, args: Value) -> Result<ToolCallResult, EngineError> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::validation("operation", "must be one of pin, forget, decay", "null"))?;

        let memory_ids: Vec<String> = match args.get("memory_ids") {
            Some(Value::Array(ids)) => ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        };

        if memory_ids.is_empty() {
            if args.get("query").and_then(Value::as_str).is_some() {
                return Ok(ToolCallResult {
                    data: json!({"operation": operation, "affected_count": 0, "success": false}),
                    summary: "query-based targeting is not supported; pass memory_ids instead.".to_string(),
                });
            }
            return Err(EngineError::validation("memory_ids", "must be a non-empty array when no query is given", "[]"));
        }

        let confidence = args.get("confidence").and_then(Value::as_f64).map(|v| v as f32);

        let mut affected_count = 0;
        for memory_id in &memory_ids {
            affected_count += match operation {
                "pin" => self.handle.writer.provenance.pin(memory_id).await,
                "forget" => self.handle.writer.provenance.forget(memory_id).await,
                "decay" => self.handle.writer.provenance.decay(memory_id, confidence).await,
                other => {
                    return Err(EngineError::validation("operation", format!("unknown operation '{other}'"), other.to_string()));
                }
            };
        }

        let success = affected_count > 0;
        let message = format!("{operation} affected {affected_count} provenance record(s) across {} requested memory id(s).", memory_ids.len());

        Ok(ToolCallResult {
            data: json!({"operation": operation, "affected_count": affected_count, "success": success, "message": message}),
            summary: message,
        })
    }
}
