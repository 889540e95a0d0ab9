//! Manager loop handler for "house" shaped nodes.
//!
//! Supervises a sub-pipeline or sub-section of the graph.

use std::path::Path;

use async_trait::async_trait;
use attractor_types::{Context, Outcome, Result, StageStatus};
use indexmap::IndexMap;

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// Handler for "stack.manager_loop" type nodes (shape="house").
/// Supervises execution and can coordinate sub-tasks.
pub struct ManagerLoopHandler;

#[async_trait]
impl NodeHandler for ManagerLoopHandler {
    fn handler_type(&self) -> &str {
        "stack.manager_loop"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        _context: &Context,
        _graph: &PipelineGraph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let prompt = node.prompt.as_deref().unwrap_or("Supervise sub-tasks");
        tracing::info!(node = %node.id, "Manager loop executing: {}", prompt);

        let mut updates = IndexMap::new();
        updates.insert(format!("{}.managed", node.id), "true".to_string());

        Ok(Outcome {
            status: StageStatus::Success,
            context_updates: updates,
            notes: format!("Manager completed: {}", prompt),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
