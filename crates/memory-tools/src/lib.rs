//! Tool surface (§6.1): a generalized `Tool` trait/`ToolRegistry`
//! dispatching JSON-typed arguments to the four memory tools.
//!
//! Grounded on `crates/tools/src/lib.rs`'s `Tool`/`ToolSpec`/
//! `ToolRegistry` pattern, generalized from `HashMap<String, String>`
//! args to `serde_json::Value` per §6's JSON-typed argument objects.

use async_trait::async_trait;
use memory_core::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod handle;
pub mod manage;
pub mod recall;
pub mod stats;
pub mod write;

pub use manage::MemoryManageTool;
pub use recall::MemoryRecallTool;
pub use stats::MemoryStatsTool;
pub use write::MemoryWriteTool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub data: Value,
    pub summary: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value) -> Result<ToolCallResult, EngineError>;
}

/// Central registry for the four memory tools, mirroring the
/// teacher's `ToolRegistry`. `memory-tools`' demo binary is the only
/// consumer of `dispatch`; a real deployment's transport layer would
/// call it instead of reimplementing lookup-and-call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.spec().name == name).map(|t| t.as_ref())
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> Result<ToolCallResult, EngineError> {
        match self.get(name) {
            Some(tool) => tool.call(args).await,
            None => Err(EngineError::not_found("tool", name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool;

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "dummy".to_string(),
                description: "test tool".to_string(),
            }
        }

        async fn call(&self, _args: Value) -> Result<ToolCallResult, EngineError> {
            Ok(ToolCallResult {
                data: Value::Null,
                summary: "ran dummy".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn dispatch_finds_registered_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool));
        let result = registry.dispatch("dummy", Value::Null).await.unwrap();
        assert_eq!(result.summary, "ran dummy");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_not_found() {
        let registry = ToolRegistry::default();
        let result = registry.dispatch("nope", Value::Null).await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }
}
