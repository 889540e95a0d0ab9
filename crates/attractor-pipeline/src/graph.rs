use std::time::Duration;

use attractor_dot::{AttributeValue, DotGraph, EdgeDef, NodeDef};
use indexmap::IndexMap;

/// A normalized, immutable-during-traversal pipeline graph.
///
/// `nodes` preserves declaration order (an `IndexMap`, not a `HashMap`) so
/// that node-visitation-order-dependent logic (goal-gate detection, the
/// validator's diagnostics) is deterministic rather than hash-order
/// dependent.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    pub name: String,
    pub goal: String,
    pub attrs: IndexMap<String, AttributeValue>,
    nodes: IndexMap<String, PipelineNode>,
    edges: Vec<PipelineEdge>,
    /// Maps node_id to a range (start, count) into the sorted `edges` vec.
    /// Edges are sorted by `from` so each node's outgoing edges are contiguous.
    adjacency: IndexMap<String, (usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct PipelineNode {
    pub id: String,
    pub label: String,
    pub shape: String,
    pub node_type: Option<String>,
    pub prompt: Option<String>,
    pub goal_gate: bool,
    pub retry_target: Option<String>,
    pub fallback_retry_target: Option<String>,
    pub fidelity: Option<String>,
    pub thread_id: Option<String>,
    pub classes: Vec<String>,
    pub timeout: Option<Duration>,
    pub llm_model: Option<String>,
    pub llm_provider: Option<String>,
    pub reasoning_effort: Option<String>,
    pub auto_status: bool,
    pub allow_partial: bool,
    // --- retry policy (§4.8) ---
    pub max_attempts: Option<i64>,
    pub backoff_base: Option<Duration>,
    pub backoff_multiplier: Option<f64>,
    pub backoff_max: Option<Duration>,
    pub retry_on_fail: bool,
    // --- parallel coordinator config (§4.10) ---
    pub join_policy: Option<String>,
    pub error_policy: Option<String>,
    pub max_parallel: Option<i64>,
    pub join_k: Option<f64>,
    pub raw_attrs: IndexMap<String, AttributeValue>,
}

#[derive(Debug, Clone)]
pub struct PipelineEdge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
    pub condition: Option<String>,
    pub weight: i32,
    pub fidelity: Option<String>,
    pub thread_id: Option<String>,
}

// --- Attribute extraction helpers ---

fn get_string_attr(attrs: &IndexMap<String, AttributeValue>, key: &str) -> Option<String> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::String(s) => Some(s.clone()),
        _ => None,
    })
}

fn get_bool_attr(attrs: &IndexMap<String, AttributeValue>, key: &str) -> Option<bool> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::Boolean(b) => Some(*b),
        AttributeValue::String(s) => Some(s == "true"),
        _ => None,
    })
}

fn get_int_attr(attrs: &IndexMap<String, AttributeValue>, key: &str) -> Option<i64> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::Integer(i) => Some(*i),
        _ => None,
    })
}

fn get_float_attr(attrs: &IndexMap<String, AttributeValue>, key: &str) -> Option<f64> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::Float(f) => Some(*f),
        AttributeValue::Integer(i) => Some(*i as f64),
        _ => None,
    })
}

fn get_duration_attr(attrs: &IndexMap<String, AttributeValue>, key: &str) -> Option<Duration> {
    attrs.get(key).and_then(|v| match v {
        AttributeValue::Duration(d) => Some(*d),
        _ => None,
    })
}

/// Reads `primary`, falling back to `alias` when `primary` is absent —
/// the DOT attribute vocabulary accepts both the §4.8 formal names
/// (`max_attempts`, `backoff_base`, `backoff_multiplier`) and the more
/// casual names used in the data model's node attribute list (`retries`,
/// `retry_delay`, `retry_backoff`).
fn get_int_attr_aliased(attrs: &IndexMap<String, AttributeValue>, primary: &str, alias: &str) -> Option<i64> {
    get_int_attr(attrs, primary).or_else(|| get_int_attr(attrs, alias))
}

fn get_duration_attr_aliased(
    attrs: &IndexMap<String, AttributeValue>,
    primary: &str,
    alias: &str,
) -> Option<Duration> {
    get_duration_attr(attrs, primary).or_else(|| get_duration_attr(attrs, alias))
}

fn get_float_attr_aliased(attrs: &IndexMap<String, AttributeValue>, primary: &str, alias: &str) -> Option<f64> {
    get_float_attr(attrs, primary).or_else(|| get_float_attr(attrs, alias))
}

// --- Conversions ---

fn node_def_to_pipeline_node(
    id: &str,
    node_def: &NodeDef,
    graph_defaults: &IndexMap<String, AttributeValue>,
    subgraph_defaults: Option<&IndexMap<String, AttributeValue>>,
) -> PipelineNode {
    // Layer defaults: graph-level, then subgraph-level, then explicit node attrs
    let mut attrs = graph_defaults.clone();
    if let Some(sg_defaults) = subgraph_defaults {
        attrs.extend(sg_defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    attrs.extend(node_def.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));

    let shape = get_string_attr(&attrs, "shape").unwrap_or_else(|| "box".to_string());
    let label = get_string_attr(&attrs, "label").unwrap_or_else(|| id.to_string());
    let node_type = get_string_attr(&attrs, "type");
    let prompt = get_string_attr(&attrs, "prompt");
    let goal_gate = get_bool_attr(&attrs, "goal_gate").unwrap_or(false);
    let retry_target = get_string_attr(&attrs, "retry_target");
    let fallback_retry_target = get_string_attr(&attrs, "fallback_retry_target");
    let fidelity = get_string_attr(&attrs, "fidelity");
    let thread_id = get_string_attr(&attrs, "thread_id");
    let classes = get_string_attr(&attrs, "class")
        .map(|s| {
            s.split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let timeout = get_duration_attr(&attrs, "timeout");
    let llm_model = get_string_attr(&attrs, "llm_model");
    let llm_provider = get_string_attr(&attrs, "llm_provider");
    let reasoning_effort = get_string_attr(&attrs, "reasoning_effort");
    let auto_status = get_bool_attr(&attrs, "auto_status").unwrap_or(true);
    let allow_partial = get_bool_attr(&attrs, "allow_partial").unwrap_or(false);

    let max_attempts = get_int_attr_aliased(&attrs, "max_attempts", "retries");
    let backoff_base = get_duration_attr_aliased(&attrs, "backoff_base", "retry_delay");
    let backoff_multiplier = get_float_attr_aliased(&attrs, "backoff_multiplier", "retry_backoff");
    let backoff_max = get_duration_attr(&attrs, "backoff_max");
    let retry_on_fail = get_bool_attr(&attrs, "retry_on_fail").unwrap_or(false);

    let join_policy = get_string_attr(&attrs, "join_policy");
    let error_policy = get_string_attr(&attrs, "error_policy");
    let max_parallel = get_int_attr(&attrs, "max_parallel");
    let join_k = get_float_attr(&attrs, "join_k");

    PipelineNode {
        id: id.to_string(),
        label,
        shape,
        node_type,
        prompt,
        goal_gate,
        retry_target,
        fallback_retry_target,
        fidelity,
        thread_id,
        classes,
        timeout,
        llm_model,
        llm_provider,
        reasoning_effort,
        auto_status,
        allow_partial,
        max_attempts,
        backoff_base,
        backoff_multiplier,
        backoff_max,
        retry_on_fail,
        join_policy,
        error_policy,
        max_parallel,
        join_k,
        raw_attrs: attrs,
    }
}

fn edge_def_to_pipeline_edge(
    edge_def: &EdgeDef,
    edge_defaults: &IndexMap<String, AttributeValue>,
) -> PipelineEdge {
    let mut attrs = edge_defaults.clone();
    attrs.extend(edge_def.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));

    PipelineEdge {
        from: edge_def.from.clone(),
        to: edge_def.to.clone(),
        label: get_string_attr(&attrs, "label"),
        condition: get_string_attr(&attrs, "condition"),
        weight: get_int_attr(&attrs, "weight").map(|v| v as i32).unwrap_or(0),
        fidelity: get_string_attr(&attrs, "fidelity"),
        thread_id: get_string_attr(&attrs, "thread_id"),
    }
}

impl PipelineGraph {
    pub fn from_dot(graph: DotGraph) -> attractor_types::Result<Self> {
        let mut nodes = IndexMap::new();
        let mut all_edges = Vec::new();

        // Collect top-level nodes with graph-level defaults, in declaration order.
        for (id, node_def) in &graph.nodes {
            let pn = node_def_to_pipeline_node(id, node_def, &graph.node_defaults, None);
            nodes.insert(id.clone(), pn);
        }

        // Collect subgraph nodes (with subgraph-level defaults layered on top)
        for sg in &graph.subgraphs {
            for (id, node_def) in &sg.nodes {
                let pn = node_def_to_pipeline_node(
                    id,
                    node_def,
                    &graph.node_defaults,
                    Some(&sg.node_defaults),
                );
                nodes.insert(id.clone(), pn);
            }
        }

        // Collect top-level edges
        for edge_def in &graph.edges {
            all_edges.push(edge_def_to_pipeline_edge(edge_def, &graph.edge_defaults));
        }

        // Collect subgraph edges
        for sg in &graph.subgraphs {
            let mut sg_edge_defaults = graph.edge_defaults.clone();
            sg_edge_defaults.extend(sg.edge_defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
            for edge_def in &sg.edges {
                all_edges.push(edge_def_to_pipeline_edge(edge_def, &sg_edge_defaults));
            }
        }

        // Sort edges by `from` so each node's outgoing edges form a contiguous slice.
        // A stable sort preserves declaration order among edges sharing `from`.
        all_edges.sort_by(|a, b| a.from.cmp(&b.from));

        // Build adjacency: map from node_id -> (start_index, count)
        let mut adjacency: IndexMap<String, (usize, usize)> = IndexMap::new();
        let mut i = 0;
        while i < all_edges.len() {
            let start = i;
            let from = &all_edges[i].from;
            while i < all_edges.len() && all_edges[i].from == *from {
                i += 1;
            }
            adjacency.insert(from.clone(), (start, i - start));
        }

        let goal = get_string_attr(&graph.attrs, "goal").unwrap_or_default();

        Ok(PipelineGraph {
            name: graph.name,
            goal,
            attrs: graph.attrs,
            nodes,
            edges: all_edges,
            adjacency,
        })
    }

    /// Find the start node: shape == "Mdiamond" or id is "start"/"Start".
    pub fn start_node(&self) -> Option<&PipelineNode> {
        self.nodes
            .values()
            .find(|n| n.shape == "Mdiamond")
            .or_else(|| self.nodes.get("start").or_else(|| self.nodes.get("Start")))
    }

    /// Find the exit node: shape == "Msquare".
    pub fn exit_node(&self) -> Option<&PipelineNode> {
        self.nodes.values().find(|n| n.shape == "Msquare")
    }

    pub fn node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.get(id)
    }

    pub fn outgoing_edges(&self, node_id: &str) -> &[PipelineEdge] {
        match self.adjacency.get(node_id) {
            Some(&(start, count)) => &self.edges[start..start + count],
            None => &[],
        }
    }

    /// All nodes in declaration order.
    pub fn all_nodes(&self) -> impl Iterator<Item = &PipelineNode> {
        self.nodes.values()
    }

    pub fn all_nodes_mut(&mut self) -> impl Iterator<Item = &mut PipelineNode> {
        self.nodes.values_mut()
    }

    pub fn all_edges(&self) -> &[PipelineEdge] {
        &self.edges
    }
}
