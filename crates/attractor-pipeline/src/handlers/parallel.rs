//! Parallel fan-out coordinator (shape="component") and fan-in merge point
//! (shape="tripleoctagon").
//!
//! The coordinator runs entirely on the task that calls `execute` — it is
//! the single "coordinator task" described for the parallel component: it
//! spawns one branch task per outgoing edge, bounds concurrency with a
//! semaphore sized from `max_parallel`, and folds results back through a
//! guarded accumulator rather than a broadcast channel.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use attractor_types::{AttractorError, Context, Outcome, Result, StageStatus};
use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::events::{EventEmitter, EventKind, PipelineEvent};
use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// A single parallel branch's outcome, as produced by walking the graph
/// from a fan-out target until it reaches a fan-in (`tripleoctagon`) node
/// or a terminal node (no outgoing edges).
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch_id: String,
    pub status: StageStatus,
    pub notes: String,
    pub failure_reason: Option<String>,
    pub context_updates: IndexMap<String, String>,
}

/// Runs a single parallel branch to completion. Implemented by the engine,
/// which knows how to walk nodes/edges and invoke handlers; injected here so
/// this module doesn't need to depend on the engine.
#[async_trait]
pub trait BranchRunner: Send + Sync {
    async fn run_branch(&self, start_node_id: &str, context: Context) -> Result<BranchOutcome>;
}

/// Handler for "parallel" type nodes (shape="component").
/// Fans out to every outgoing edge, runs each branch in its own isolated
/// context, then folds the results back according to `join_policy` /
/// `error_policy`.
pub struct ParallelHandler {
    runner: Arc<dyn BranchRunner>,
    events: Option<Arc<EventEmitter>>,
    pipeline_id: String,
}

impl ParallelHandler {
    pub fn new(runner: Arc<dyn BranchRunner>) -> Self {
        Self {
            runner,
            events: None,
            pipeline_id: String::new(),
        }
    }

    /// Attach an event emitter so fan-out/fan-in progress is observable.
    pub fn with_events(mut self, events: Arc<EventEmitter>, pipeline_id: impl Into<String>) -> Self {
        self.events = Some(events);
        self.pipeline_id = pipeline_id.into();
        self
    }

    fn emit(&self, kind: EventKind, data: serde_json::Value) {
        if let Some(events) = &self.events {
            events.emit(PipelineEvent::new(kind, self.pipeline_id.clone(), data));
        }
    }
}

/// Join policy for combining branch results. Defaults to `WaitAll`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
    /// Literal integer count of branches that must succeed.
    KOfN(i64),
    /// Fraction in (0, 1] of branches that must succeed, resolved as
    /// `ceil(fraction * N)`.
    Quorum(f64),
}

impl JoinPolicy {
    fn parse(s: Option<&str>, join_k: Option<f64>) -> Self {
        match s.map(str::to_lowercase).as_deref() {
            Some("first_success") => JoinPolicy::FirstSuccess,
            Some("k_of_n") => JoinPolicy::KOfN(join_k.unwrap_or(1.0) as i64),
            Some("quorum") => JoinPolicy::Quorum(join_k.unwrap_or(1.0)),
            _ => JoinPolicy::WaitAll,
        }
    }

    /// Number of successes (counting only `SUCCESS`, per the spec's explicit
    /// choice that `PARTIAL_SUCCESS` never counts toward resolution) needed
    /// out of `n` branches for this policy to be met.
    fn threshold(&self, n: usize) -> usize {
        match self {
            JoinPolicy::WaitAll => n,
            JoinPolicy::FirstSuccess => 1,
            JoinPolicy::KOfN(k) => (*k).max(1) as usize,
            JoinPolicy::Quorum(frac) => ((n as f64) * frac.max(0.0)).ceil().max(1.0) as usize,
        }
    }
}

/// Error policy governing how a branch failure affects the others.
/// Defaults to `Continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorPolicy {
    Continue,
    FailFast,
    Ignore,
}

impl ErrorPolicy {
    fn parse(s: Option<&str>) -> Self {
        match s.map(str::to_lowercase).as_deref() {
            Some("fail_fast") => ErrorPolicy::FailFast,
            Some("ignore") => ErrorPolicy::Ignore,
            _ => ErrorPolicy::Continue,
        }
    }
}

fn is_success(status: StageStatus) -> bool {
    status == StageStatus::Success
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        graph: &PipelineGraph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let branches: Vec<String> = graph.outgoing_edges(&node.id).iter().map(|e| e.to.clone()).collect();
        if branches.is_empty() {
            return Ok(Outcome::success("No branches to fan out to"));
        }

        let join_policy = JoinPolicy::parse(node.join_policy.as_deref(), node.join_k);
        let error_policy = ErrorPolicy::parse(node.error_policy.as_deref());
        let max_parallel = node.max_parallel.map(|n| n.max(1) as usize).unwrap_or(4);
        let threshold = join_policy.threshold(branches.len());

        tracing::info!(
            node = %node.id,
            branches = branches.len(),
            max_parallel,
            join_policy = ?join_policy,
            error_policy = ?error_policy,
            "parallel fan-out starting"
        );
        self.emit(
            EventKind::ParallelStarted,
            json!({"nodeId": node.id, "branchCount": branches.len()}),
        );

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut set = tokio::task::JoinSet::new();

        for branch_id in &branches {
            let runner = self.runner.clone();
            let branch_ctx = context.clone_isolated().await;
            let sem = semaphore.clone();
            let aborted = aborted.clone();
            let branch_id = branch_id.clone();
            self.emit(EventKind::ParallelBranchStarted, json!({"branch": branch_id}));
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                if aborted.load(Ordering::SeqCst) {
                    return Ok(BranchOutcome {
                        branch_id: branch_id.clone(),
                        status: StageStatus::Skipped,
                        notes: "Cancelled".to_string(),
                        failure_reason: None,
                        context_updates: IndexMap::new(),
                    });
                }
                runner.run_branch(&branch_id, branch_ctx).await
            });
        }

        let mut results: Vec<BranchOutcome> = Vec::new();
        let mut first_error: Option<AttractorError> = None;
        let mut remaining = branches.len();

        while let Some(joined) = set.join_next().await {
            remaining -= 1;
            match joined {
                Ok(Ok(outcome)) => {
                    let success = is_success(outcome.status);
                    self.emit(
                        EventKind::ParallelBranchCompleted,
                        json!({"branch": outcome.branch_id, "success": success}),
                    );
                    results.push(outcome);

                    let success_count = results.iter().filter(|r| is_success(r.status)).count();
                    if success_count >= threshold {
                        if matches!(join_policy, JoinPolicy::FirstSuccess) {
                            aborted.store(true, Ordering::SeqCst);
                        }
                        break;
                    }

                    let failed = results.last().map(|r| !is_success(r.status)).unwrap_or(false);
                    if failed && error_policy == ErrorPolicy::FailFast {
                        aborted.store(true, Ordering::SeqCst);
                        set.abort_all();
                        break;
                    }

                    // Impossibility proof: even if every still-running branch
                    // succeeds, the threshold can't be met — stop waiting.
                    if !matches!(join_policy, JoinPolicy::WaitAll) && success_count + remaining < threshold {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    if error_policy == ErrorPolicy::FailFast {
                        aborted.store(true, Ordering::SeqCst);
                        set.abort_all();
                        break;
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(AttractorError::HandlerError {
                            handler: "parallel".into(),
                            node: node.id.clone(),
                            message: format!("branch task panicked: {join_err}"),
                        });
                    }
                }
            }
        }
        let _ = remaining;

        if results.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let success_count = results.iter().filter(|r| is_success(r.status)).count();
        let failure_count = results.len() - success_count;
        let overall_satisfied = success_count >= threshold || error_policy == ErrorPolicy::Ignore;

        self.emit(
            EventKind::ParallelCompleted,
            json!({"successCount": success_count, "failureCount": failure_count}),
        );

        // Serialize branch results to context["parallel.results"] — the only
        // fold-back mechanism; nothing here auto-merges branch context keys
        // into the outer context.
        let serialized: Vec<serde_json::Value> = results
            .iter()
            .map(|r| {
                json!({
                    "nodeId": r.branch_id,
                    "status": r.status,
                    "notes": r.notes,
                    "score": serde_json::Value::Null,
                    "contextUpdates": r.context_updates,
                })
            })
            .collect();

        let mut updates = IndexMap::new();
        updates.insert(
            "parallel.results".to_string(),
            serde_json::to_string(&serialized).unwrap_or_default(),
        );

        let notes = format!(
            "Fan-out to {} branches: {}/{} succeeded",
            branches.len(),
            success_count,
            branches.len()
        );

        if !overall_satisfied && error_policy != ErrorPolicy::Ignore {
            let reason = results
                .iter()
                .find(|r| !is_success(r.status))
                .and_then(|r| r.failure_reason.clone())
                .or_else(|| first_error.as_ref().map(|e| e.to_string()))
                .unwrap_or_else(|| "one or more branches failed".to_string());
            return Ok(Outcome {
                status: StageStatus::Fail,
                context_updates: updates,
                notes,
                failure_reason: Some(reason),
                ..Default::default()
            });
        }

        Ok(Outcome {
            status: StageStatus::Success,
            context_updates: updates,
            notes,
            ..Default::default()
        })
    }
}

/// Rank used to pick the best fan-in candidate: lower is better.
fn status_rank(status: StageStatus) -> u8 {
    match status {
        StageStatus::Success => 0,
        StageStatus::PartialSuccess => 1,
        StageStatus::Retry => 2,
        StageStatus::Fail => 3,
        StageStatus::Skipped => 4,
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct SerializedBranchResult {
    #[serde(rename = "nodeId")]
    node_id: String,
    status: StageStatus,
}

/// Handler for "parallel.fan_in" type nodes (shape="tripleoctagon").
/// Reads `context["parallel.results"]` and picks the best candidate by
/// status rank, then node-id ascending as a tiebreak.
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        _graph: &PipelineGraph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let raw = context.get_opt("parallel.results").await.ok_or_else(|| {
            AttractorError::HandlerError {
                handler: "parallel.fan_in".into(),
                node: node.id.clone(),
                message: "no parallel.results in context".into(),
            }
        })?;

        let candidates: Vec<SerializedBranchResult> = serde_json::from_str(&raw)?;
        if candidates.is_empty() {
            return Err(AttractorError::HandlerError {
                handler: "parallel.fan_in".into(),
                node: node.id.clone(),
                message: "parallel.results was empty".into(),
            });
        }

        let best = candidates
            .iter()
            .min_by(|a, b| status_rank(a.status).cmp(&status_rank(b.status)).then(a.node_id.cmp(&b.node_id)))
            .unwrap();

        if best.status == StageStatus::Fail {
            return Ok(Outcome::fail(format!("all candidates failed; best was '{}'", best.node_id)));
        }

        let mut updates = IndexMap::new();
        updates.insert("parallel.fan_in.best_id".to_string(), best.node_id.clone());
        updates.insert(
            "parallel.fan_in.best_outcome".to_string(),
            serde_json::to_string(&best.status).unwrap_or_default(),
        );

        tracing::info!(node = %node.id, best = %best.node_id, "fan-in merge completed");

        Ok(Outcome {
            status: StageStatus::Success,
            context_updates: updates,
            notes: format!("Fan-in selected '{}'", best.node_id),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
