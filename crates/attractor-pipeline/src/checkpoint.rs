//! Checkpoint save/restore and crash recovery for pipeline execution.
//!
//! After each node completion the runner can persist a [`PipelineCheckpoint`]
//! to disk. On restart, [`load_checkpoint`] discovers the latest snapshot so
//! the pipeline can resume from the last completed node instead of starting
//! over.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use attractor_types::StageStatus;

/// Snapshot of pipeline execution state for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCheckpoint {
    /// Identifies the run this checkpoint belongs to. Backfilled to an
    /// empty string when absent on load — older checkpoints predate the
    /// field.
    #[serde(default)]
    pub pipeline_id: String,
    /// RFC 3339 timestamp of when the checkpoint was created.
    pub timestamp: String,
    /// The node that was being executed (or about to be executed) when the
    /// checkpoint was taken.
    pub current_node: String,
    /// IDs of nodes that have already finished successfully.
    pub completed_nodes: Vec<String>,
    /// Retry attempts consumed per node.
    #[serde(default)]
    pub node_retries: IndexMap<String, usize>,
    /// The status (not the full outcome) each visited node finished with.
    /// Backfilled to an empty map when absent on load.
    #[serde(default)]
    pub node_outcomes: IndexMap<String, StageStatus>,
    /// Serialised snapshot of the pipeline [`Context`](attractor_types::Context).
    pub context_values: IndexMap<String, String>,
    /// Free-form log entries accumulated on the context up to the
    /// checkpoint.
    pub logs: Vec<String>,
}

impl PipelineCheckpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_id: String,
        current_node: String,
        completed_nodes: Vec<String>,
        node_retries: IndexMap<String, usize>,
        node_outcomes: IndexMap<String, StageStatus>,
        context_values: IndexMap<String, String>,
        logs: Vec<String>,
    ) -> Self {
        Self {
            pipeline_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            current_node,
            completed_nodes,
            node_retries,
            node_outcomes,
            context_values,
            logs,
        }
    }
}

/// Save a checkpoint to the given directory.
///
/// The directory is created if it does not already exist. The checkpoint
/// is written to `<logs_root>/checkpoint.json`. A write failure here is
/// the caller's to log as a warning — it must never abort a run.
pub async fn save_checkpoint(
    checkpoint: &PipelineCheckpoint,
    logs_root: &Path,
) -> attractor_types::Result<PathBuf> {
    tokio::fs::create_dir_all(logs_root).await?;
    let path = logs_root.join("checkpoint.json");
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(&path, json).await?;
    tracing::debug!(path = %path.display(), "checkpoint saved");
    Ok(path)
}

/// Load the latest checkpoint from a directory.
///
/// Returns `Ok(None)` when no checkpoint file exists (i.e. first run or
/// after [`clear_checkpoint`]). A mandatory field missing from the JSON
/// (e.g. `currentNode`) is an error; `nodeOutcomes`/`pipelineId` backfill
/// to defaults via `#[serde(default)]` above.
pub async fn load_checkpoint(
    logs_root: &Path,
) -> attractor_types::Result<Option<PipelineCheckpoint>> {
    let path = logs_root.join("checkpoint.json");
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(&path).await?;
    let value: Value = serde_json::from_str(&json)?;
    if value.get("currentNode").is_none() || value.get("completedNodes").is_none() {
        return Err(attractor_types::AttractorError::ValidationError(
            "Invalid checkpoint data: missing mandatory field".into(),
        ));
    }
    let checkpoint: PipelineCheckpoint = serde_json::from_value(value)?;
    Ok(Some(checkpoint))
}

/// Delete checkpoint after successful pipeline completion.
pub async fn clear_checkpoint(logs_root: &Path) -> attractor_types::Result<()> {
    let path = logs_root.join("checkpoint.json");
    if tokio::fs::try_exists(&path).await? {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}
