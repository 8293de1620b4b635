//! Thin stdin-JSON-line demo loop (§6.1). This is not a transport or
//! protocol implementation — it exists only to exercise the
//! `ToolRegistry` end to end against the in-memory mock views.
//!
//! Input: one JSON object per line, `{"tool": "memory_write", "args": {...}}`.
//! Output: one JSON `ToolCallResult` per line on stdout.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use memory_config::MemoryEngineConfig;
use memory_core::content::{HeuristicClaimExtractor, HeuristicEntityExtractor};
use memory_core::provenance::ProvenanceTracker;
use memory_core::reader::MemoryReader;
use memory_core::storage::mock::{MockGraphView, MockSearchView, MockVectorView};
use memory_core::storage::{MultiViewCoordinator, ViewTimeouts};
use memory_core::writer::MemoryWriter;
use memory_tools::handle::MemoryEngineHandle;
use memory_tools::{MemoryManageTool, MemoryRecallTool, MemoryStatsTool, MemoryWriteTool, ToolRegistry};
use serde_json::Value;

/// A deterministic, dependency-free stand-in for a real embedding
/// model (explicitly out of scope per §1): hashes each word into a
/// fixed-size bag so cosine similarity behaves sensibly for the demo
/// without pulling in a model.
fn toy_embed(text: String) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Vec<f32>>> + Send>> {
    Box::pin(async move {
        const DIMS: usize = 32;
        if text.trim().is_empty() {
            return None;
        }
        let mut vector = vec![0.0f32; DIMS];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash as usize) % DIMS] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Some(vector)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = MemoryEngineConfig::default();

    let vector = Arc::new(MockVectorView::default());
    let graph = Arc::new(MockGraphView::default());
    let search = Arc::new(MockSearchView::default());
    let coordinator = MultiViewCoordinator::new(vector.clone(), graph.clone(), search.clone(), ViewTimeouts::default());

    let provenance = Arc::new(ProvenanceTracker::new(config.provenance.clone()));
    let entity_extractor = Arc::new(HeuristicEntityExtractor);
    let claim_extractor = Arc::new(HeuristicClaimExtractor);

    let writer = MemoryWriter::new(coordinator, provenance, entity_extractor, claim_extractor, Arc::new(toy_embed), config.clone());
    let reader = MemoryReader::new(vector, graph, search, Arc::new(toy_embed), config);

    let handle = Arc::new(MemoryEngineHandle { writer, reader });

    let mut registry = ToolRegistry::default();
    registry.register(Box::new(MemoryRecallTool { handle: handle.clone() }));
    registry.register(Box::new(MemoryWriteTool { handle: handle.clone() }));
    registry.register(Box::new(MemoryManageTool { handle: handle.clone() }));
    registry.register(Box::new(MemoryStatsTool { handle }));

    let stdin = io::stdin();
    let stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                writeln!(stdout.lock(), "{}", serde_json::json!({"error": format!("invalid JSON: {err}")}))?;
                continue;
            }
        };

        let tool_name = request.get("tool").and_then(Value::as_str).unwrap_or_default();
        let args = request.get("args").cloned().unwrap_or(Value::Null);

        let response = match registry.dispatch(tool_name, args).await {
            Ok(result) => serde_json::to_value(&result)?,
            Err(err) => serde_json::json!({"error": err.to_string()}),
        };
        writeln!(stdout.lock(), "{response}")?;
    }

    Ok(())
}
