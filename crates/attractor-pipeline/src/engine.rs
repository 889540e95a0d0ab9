//! Pipeline execution engine — the Runner state machine.
//!
//! States: `CREATED -> RUNNING -> (GATE_REDIRECT | STEP) -> RUNNING -> ... ->
//! DONE(SUCCESS|FAIL)`. See [`PipelineExecutor::run`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::json;

use attractor_dot::AttributeValue;
use attractor_types::{AttractorError, Context, Outcome, Result, StageStatus};

use crate::checkpoint::PipelineCheckpoint;
use crate::edge_selection::select_edge;
use crate::events::{EventEmitter, EventKind, PipelineEvent};
use crate::goal_gate::enforce_goal_gates;
use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::{default_registry, HandlerRegistry};
use crate::handlers::parallel::{BranchOutcome, BranchRunner, ParallelHandler};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::transforms::apply_transforms;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Writes a checkpoint somewhere after a node completes. Injected so the
/// runner doesn't hardcode filesystem persistence — a caller that doesn't
/// want checkpoints simply never configures one.
#[async_trait]
pub trait CheckpointWriter: Send + Sync {
    async fn write(&self, checkpoint: &PipelineCheckpoint) -> Result<()>;
}

/// Writes checkpoints to `<logs_root>/checkpoint.json` via
/// [`crate::checkpoint::save_checkpoint`].
pub struct FileCheckpointWriter {
    pub logs_root: PathBuf,
}

#[async_trait]
impl CheckpointWriter for FileCheckpointWriter {
    async fn write(&self, checkpoint: &PipelineCheckpoint) -> Result<()> {
        crate::checkpoint::save_checkpoint(checkpoint, &self.logs_root).await?;
        Ok(())
    }
}

/// Configuration for a pipeline run.
pub struct PipelineConfig {
    pub logs_root: PathBuf,
    /// Identifies the run in emitted events and checkpoints.
    pub pipeline_id: String,
    /// Caps how many times a goal-gate redirect may fire before the runner
    /// gives up and returns an error, guarding against an oscillating
    /// graph that never satisfies its gates.
    pub max_gate_redirects: usize,
    pub checkpoint_writer: Option<Arc<dyn CheckpointWriter>>,
    /// Seeded into the context before the graph's own `graph.*` attributes,
    /// so a caller (e.g. the CLI's `--dry-run`/`--workdir` flags) can set
    /// plain keys like `dry_run`/`workdir` that handlers already consult.
    pub initial_context: IndexMap<String, String>,
}

impl PipelineConfig {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self {
            logs_root: logs_root.into(),
            pipeline_id: uuid::Uuid::new_v4().to_string(),
            max_gate_redirects: 10,
            checkpoint_writer: None,
            initial_context: IndexMap::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

/// The result of a completed pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub completed_nodes: Vec<String>,
    pub node_outcomes: IndexMap<String, Outcome>,
    pub final_context: IndexMap<String, String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stringify an `attractor_dot::AttributeValue` for context seeding and
/// condition resolution — the context is string-valued throughout.
fn attr_to_string(val: &AttributeValue) -> String {
    match val {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Integer(i) => i.to_string(),
        AttributeValue::Float(f) => f.to_string(),
        AttributeValue::Boolean(b) => b.to_string(),
        AttributeValue::Duration(d) => d.as_millis().to_string(),
    }
}

/// Map a `StageStatus` to the lowercase string used in edge conditions.
fn status_to_string(status: StageStatus) -> String {
    match status {
        StageStatus::Success => "success".to_string(),
        StageStatus::PartialSuccess => "partial_success".to_string(),
        StageStatus::Retry => "retry".to_string(),
        StageStatus::Fail => "fail".to_string(),
        StageStatus::Skipped => "skipped".to_string(),
    }
}

fn graph_attr_strings(graph: &PipelineGraph) -> IndexMap<String, String> {
    graph.attrs.iter().map(|(k, v)| (k.clone(), attr_to_string(v))).collect()
}

/// Build the synchronous key resolver `select_edge`/condition evaluation
/// need, backed by a pre-fetched context snapshot (context access is async;
/// edge selection is not).
fn make_resolver<'a>(
    outcome: &'a Outcome,
    context_snapshot: &'a IndexMap<String, String>,
    graph_attrs: &'a IndexMap<String, String>,
) -> impl Fn(&str) -> String + 'a {
    move |key: &str| -> String {
        if let Some(rest) = key.strip_prefix("context.") {
            return context_snapshot.get(rest).cloned().unwrap_or_default();
        }
        if let Some(rest) = key.strip_prefix("graph.") {
            return graph_attrs.get(rest).cloned().unwrap_or_default();
        }
        match key {
            "outcome" | "status" => status_to_string(outcome.status),
            "label" => outcome.preferred_label.clone().unwrap_or_default(),
            "notes" => outcome.notes.clone(),
            other => context_snapshot
                .get(other)
                .or_else(|| graph_attrs.get(other))
                .cloned()
                .unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step executor shared by the top-level runner loop and parallel branches
// ---------------------------------------------------------------------------

/// Walks the graph node-by-node: resolve handler -> retry -> outcome ->
/// edge-select -> next. Shared between the Runner's main loop and the
/// parallel coordinator's branches, per the spec's "shared step-executor"
/// requirement.
struct Walker {
    registry: HandlerRegistry,
    graph: PipelineGraph,
    logs_root: PathBuf,
    events: Arc<EventEmitter>,
    pipeline_id: String,
}

impl Walker {
    fn resolve_handler(&self, node: &PipelineNode) -> Result<&crate::handler::DynHandler> {
        let handler_type = self.registry.resolve_type(node);
        self.registry.get(&handler_type).ok_or_else(|| AttractorError::HandlerError {
            handler: handler_type.clone(),
            node: node.id.clone(),
            message: format!("No handler found for type '{handler_type}'"),
        })
    }

    /// Execute a single node (with retry) and select the edge to follow.
    /// Returns the outcome and, if one was selected, the next node's id.
    async fn step(&self, node: &PipelineNode, context: &Context) -> Result<(Outcome, Option<String>)> {
        let handler = self.resolve_handler(node)?;
        let policy = RetryPolicy::from_node(node);
        let logs_root = self.logs_root.clone();

        let attempt = std::sync::atomic::AtomicUsize::new(0);
        self.events.emit(PipelineEvent::new(
            EventKind::StageStarted,
            self.pipeline_id.clone(),
            json!({"nodeId": node.id}),
        ));

        let outcome = execute_with_retry(
            || {
                let n = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if n > 1 {
                    self.events.emit(PipelineEvent::new(
                        EventKind::StageRetrying,
                        self.pipeline_id.clone(),
                        json!({"nodeId": node.id, "attempt": n}),
                    ));
                }
                handler.execute(node, context, &self.graph, &logs_root)
            },
            &policy,
            &node.id,
        )
        .await?;

        context.apply_updates(outcome.context_updates.clone()).await;
        context.set("outcome", status_to_string(outcome.status)).await;
        if let Some(ref label) = outcome.preferred_label {
            context.set("preferred_label", label.clone()).await;
        }

        if outcome.status == StageStatus::Fail {
            self.events.emit(PipelineEvent::new(
                EventKind::StageFailed,
                self.pipeline_id.clone(),
                json!({"nodeId": node.id, "reason": outcome.failure_reason}),
            ));
        } else {
            self.events.emit(PipelineEvent::new(
                EventKind::StageCompleted,
                self.pipeline_id.clone(),
                json!({"nodeId": node.id, "status": status_to_string(outcome.status)}),
            ));
        }

        let context_snapshot = context.snapshot().await;
        let graph_attrs = graph_attr_strings(&self.graph);
        let resolve = make_resolver(&outcome, &context_snapshot, &graph_attrs);
        let next = select_edge(&node.id, &outcome, &resolve, &self.graph).map(|e| e.to.clone());

        Ok((outcome, next))
    }
}

#[async_trait]
impl BranchRunner for Walker {
    /// Walks forward from `start_node_id` until reaching a `tripleoctagon`
    /// fan-in node (not itself executed) or a node with no further
    /// outgoing edge.
    async fn run_branch(&self, start_node_id: &str, context: Context) -> Result<BranchOutcome> {
        let mut current_id = start_node_id.to_string();
        loop {
            let node = self.graph.node(&current_id).ok_or_else(|| AttractorError::Other(format!(
                "branch node '{current_id}' not found"
            )))?;

            if node.shape == "tripleoctagon" {
                let snapshot = context.snapshot().await;
                return Ok(BranchOutcome {
                    branch_id: start_node_id.to_string(),
                    status: StageStatus::Success,
                    notes: format!("reached fan-in at '{current_id}'"),
                    failure_reason: None,
                    context_updates: snapshot,
                });
            }

            let (outcome, next) = self.step(node, &context).await?;

            match next {
                Some(next_id) => {
                    if self.graph.node(&next_id).map(|n| n.shape.as_str()) == Some("tripleoctagon") {
                        let snapshot = context.snapshot().await;
                        return Ok(BranchOutcome {
                            branch_id: start_node_id.to_string(),
                            status: outcome.status,
                            notes: outcome.notes,
                            failure_reason: outcome.failure_reason,
                            context_updates: snapshot,
                        });
                    }
                    current_id = next_id;
                }
                None => {
                    let snapshot = context.snapshot().await;
                    return Ok(BranchOutcome {
                        branch_id: start_node_id.to_string(),
                        status: outcome.status,
                        notes: outcome.notes,
                        failure_reason: outcome.failure_reason,
                        context_updates: snapshot,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// The core pipeline executor. Owns a handler registry (minus `parallel`,
/// wired in per-run once the graph and event emitter are known) and drives
/// graph traversal.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
}

impl PipelineExecutor {
    /// Create an executor with the given handler registry. If the registry
    /// already has a `parallel` handler registered it is kept as-is and no
    /// parallel-coordinator wiring is performed by `run`.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Create an executor pre-loaded with the default built-in handlers.
    pub fn with_default_registry() -> Self {
        Self {
            registry: default_registry(),
        }
    }

    /// Run the full runner lifecycle on the given graph.
    pub async fn run(&self, graph: &PipelineGraph, config: PipelineConfig) -> Result<PipelineResult> {
        validate_or_raise(graph)?;

        let mut graph = graph.clone();
        apply_transforms(&mut graph)?;

        let events = Arc::new(EventEmitter::new());
        let pipeline_id = config.pipeline_id.clone();

        let context = Context::new();
        for (key, val) in &config.initial_context {
            context.set(key.clone(), val.clone()).await;
        }
        for (key, val) in &graph.attrs {
            context.set(format!("graph.{key}"), attr_to_string(val)).await;
        }

        // `ParallelHandler` needs a `BranchRunner` that walks nodes the same
        // way this loop does — i.e. the `Walker` below, before it exists.
        // `Arc::new_cyclic` lets the registry graft in a handler holding a
        // `Weak` reference to the very `Walker` being constructed, so the
        // same registry (including the caller's own custom handlers, kept
        // via the cheap `Arc`-backed `HandlerRegistry` clone) backs both the
        // top-level traversal and any parallel branch it fans out into.
        let needs_parallel = !self.registry.has("parallel");
        let base_registry = self.registry.clone();
        let graph_for_walker = graph.clone();
        let logs_root = config.logs_root.clone();
        let events_for_walker = events.clone();
        let pipeline_id_for_walker = pipeline_id.clone();

        let walker: Arc<Walker> = Arc::new_cyclic(|weak: &std::sync::Weak<Walker>| {
            let mut registry = base_registry;
            if needs_parallel {
                let runner: Arc<dyn BranchRunner> = Arc::new(WeakWalker(weak.clone()));
                registry.register(
                    ParallelHandler::new(runner)
                        .with_events(events_for_walker.clone(), pipeline_id_for_walker.clone()),
                );
            }
            Walker {
                registry,
                graph: graph_for_walker,
                logs_root,
                events: events_for_walker,
                pipeline_id: pipeline_id_for_walker,
            }
        });

        events.emit(PipelineEvent::new(
            EventKind::PipelineStarted,
            pipeline_id.clone(),
            json!({"name": graph.name, "id": pipeline_id, "graphName": graph.name}),
        ));

        let mut completed_nodes: Vec<String> = Vec::new();
        let mut node_outcomes: IndexMap<String, Outcome> = IndexMap::new();
        let mut gate_redirects = 0usize;

        let start = graph.start_node().ok_or_else(|| AttractorError::ValidationError("No start node found".into()))?;
        let mut current_id = start.id.clone();

        loop {
            let current = walker.graph.node(&current_id).ok_or_else(|| {
                AttractorError::Other(format!("node '{current_id}' not found"))
            })?;

            if current.shape == "Msquare" || walker.graph.outgoing_edges(&current.id).is_empty() {
                let (outcome, _next) = walker.step(current, &context).await?;
                completed_nodes.push(current.id.clone());
                node_outcomes.insert(current.id.clone(), outcome);

                events.emit(PipelineEvent::new(
                    EventKind::PipelineCompleted,
                    pipeline_id.clone(),
                    json!({"completedNodes": completed_nodes}),
                ));
                break;
            }

            let (outcome, next) = match walker.step(current, &context).await {
                Ok(v) => v,
                Err(e) => {
                    events.emit(PipelineEvent::new(
                        EventKind::PipelineFailed,
                        pipeline_id.clone(),
                        json!({"error": e.to_string()}),
                    ));
                    return Err(e);
                }
            };

            // A FAIL outcome is terminal for ordinary nodes, per §7/§4.13. A
            // goal-gate node is the one exemption: its whole purpose is to
            // signal "not yet satisfied" via a non-SUCCESS outcome (including
            // FAIL) and let §4.9's redirect run instead of killing the
            // pipeline outright — so its FAIL falls through to the goal-gate
            // check below rather than short-circuiting here.
            if outcome.status == StageStatus::Fail && !current.goal_gate {
                completed_nodes.push(current.id.clone());
                node_outcomes.insert(current.id.clone(), outcome.clone());
                events.emit(PipelineEvent::new(
                    EventKind::PipelineFailed,
                    pipeline_id.clone(),
                    json!({"nodeId": current.id, "reason": outcome.failure_reason}),
                ));
                return Err(AttractorError::HandlerError {
                    handler: "pipeline".into(),
                    node: current.id.clone(),
                    message: outcome.failure_reason.unwrap_or_else(|| "node failed".into()),
                });
            }

            completed_nodes.push(current.id.clone());
            node_outcomes.insert(current.id.clone(), outcome);

            if let Some(writer) = &config.checkpoint_writer {
                let snapshot = context.snapshot().await;
                let logs = context.logs().await;
                let status_outcomes: IndexMap<String, StageStatus> =
                    node_outcomes.iter().map(|(k, v)| (k.clone(), v.status)).collect();
                let checkpoint = PipelineCheckpoint::new(
                    pipeline_id.clone(),
                    current_id.clone(),
                    completed_nodes.clone(),
                    IndexMap::new(),
                    status_outcomes,
                    snapshot,
                    logs,
                );
                if writer.write(&checkpoint).await.is_ok() {
                    events.emit(PipelineEvent::new(
                        EventKind::CheckpointSaved,
                        pipeline_id.clone(),
                        json!({"nodeId": current_id}),
                    ));
                } else {
                    tracing::warn!(node = %current_id, "checkpoint write failed");
                }
            }

            // Goal-gate check after every node, not only at exit.
            let gate_result = enforce_goal_gates(&walker.graph, &node_outcomes)?;
            if !gate_result.all_satisfied {
                let target = gate_result.retry_target.clone().expect("enforce_goal_gates guarantees a target when unsatisfied");
                gate_redirects += 1;
                if gate_redirects > config.max_gate_redirects {
                    return Err(AttractorError::ValidationError(format!(
                        "goal gate redirected {gate_redirects} times without satisfying '{}': exceeded max_gate_redirects ({})",
                        gate_result.failed_node_id.unwrap_or_default(),
                        config.max_gate_redirects
                    )));
                }
                for id in &gate_result.nodes_to_clear {
                    node_outcomes.shift_remove(id);
                    completed_nodes.retain(|n| n != id);
                }
                events.emit(PipelineEvent::new(
                    EventKind::PipelineRestarted,
                    pipeline_id.clone(),
                    json!({"retryTarget": target}),
                ));
                current_id = target;
                continue;
            }

            match next {
                Some(next_id) => current_id = next_id,
                None => {
                    events.emit(PipelineEvent::new(
                        EventKind::PipelineCompleted,
                        pipeline_id.clone(),
                        json!({"completedNodes": completed_nodes}),
                    ));
                    break;
                }
            }
        }

        if config.checkpoint_writer.is_some() {
            let _ = crate::checkpoint::clear_checkpoint(&config.logs_root).await;
        }

        let final_context = context.snapshot().await;
        Ok(PipelineResult {
            completed_nodes,
            node_outcomes,
            final_context,
        })
    }
}

/// Delegates to a `Walker` through a weak reference, letting the registry
/// hold a `ParallelHandler` that points back at the very `Walker` it will
/// end up embedded in (see the `Arc::new_cyclic` call in `run`).
struct WeakWalker(std::sync::Weak<Walker>);

#[async_trait]
impl BranchRunner for WeakWalker {
    async fn run_branch(&self, start_node_id: &str, context: Context) -> Result<BranchOutcome> {
        let walker = self
            .0
            .upgrade()
            .expect("walker dropped while a branch was still running");
        walker.run_branch(start_node_id, context).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
