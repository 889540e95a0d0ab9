use indexmap::{IndexMap, IndexSet};

use attractor_dot::AttributeValue;
use attractor_types::{AttractorError, Outcome, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};

/// Result of checking all goal gate nodes.
#[derive(Debug)]
pub struct GoalGateResult {
    pub all_satisfied: bool,
    pub failed_node_id: Option<String>,
    pub retry_target: Option<String>,
    /// Nodes whose recorded outcomes must be cleared before re-executing the
    /// redirect — every node reachable forward from `retry_target`, since a
    /// redirect may re-enter any of them on any path back to the gate.
    pub nodes_to_clear: IndexSet<String>,
}

/// Check whether all visited goal gate nodes have succeeded.
/// Only checks nodes that appear in `node_outcomes` (visited nodes), walked
/// in the graph's declaration order so the first unsatisfied gate found is
/// deterministic regardless of map iteration order.
pub fn check_goal_gates(graph: &PipelineGraph, node_outcomes: &IndexMap<String, Outcome>) -> GoalGateResult {
    for node in graph.all_nodes() {
        if !node.goal_gate {
            continue;
        }
        let Some(outcome) = node_outcomes.get(&node.id) else {
            continue;
        };
        if !matches!(outcome.status, StageStatus::Success | StageStatus::PartialSuccess) {
            let retry = resolve_retry_target(node, graph);
            let nodes_to_clear = retry
                .as_deref()
                .map(|target| nodes_reachable_from(graph, target))
                .unwrap_or_default();
            return GoalGateResult {
                all_satisfied: false,
                failed_node_id: Some(node.id.clone()),
                retry_target: retry,
                nodes_to_clear,
            };
        }
    }
    GoalGateResult {
        all_satisfied: true,
        failed_node_id: None,
        retry_target: None,
        nodes_to_clear: IndexSet::new(),
    }
}

/// Forward reachability from `start` (inclusive), used to determine which
/// previously-recorded outcomes must be discarded on a goal-gate redirect.
fn nodes_reachable_from(graph: &PipelineGraph, start: &str) -> IndexSet<String> {
    let mut seen = IndexSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        for edge in graph.outgoing_edges(&id) {
            if !seen.contains(&edge.to) {
                stack.push(edge.to.clone());
            }
        }
    }
    seen
}

fn get_graph_string_attr(graph: &PipelineGraph, key: &str) -> Option<String> {
    graph.attrs.get(key).and_then(|v| match v {
        AttributeValue::String(s) => Some(s.clone()),
        _ => None,
    })
}

/// Resolve the retry target using 4-level fallback:
/// 1. Node `retry_target`
/// 2. Node `fallback_retry_target`
/// 3. Graph `retry_target` attribute
/// 4. Graph `fallback_retry_target` attribute
fn resolve_retry_target(node: &PipelineNode, graph: &PipelineGraph) -> Option<String> {
    node.retry_target
        .clone()
        .or_else(|| node.fallback_retry_target.clone())
        .or_else(|| get_graph_string_attr(graph, "retry_target"))
        .or_else(|| get_graph_string_attr(graph, "fallback_retry_target"))
}

/// Enforce goal gates: if unsatisfied and no retry target, return error.
pub fn enforce_goal_gates(
    graph: &PipelineGraph,
    node_outcomes: &IndexMap<String, Outcome>,
) -> Result<GoalGateResult, AttractorError> {
    let result = check_goal_gates(graph, node_outcomes);
    if !result.all_satisfied && result.retry_target.is_none() {
        return Err(AttractorError::GoalGateUnsatisfied {
            node: result.failed_node_id.unwrap_or_default(),
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;

    fn parse_and_build(dot: &str) -> PipelineGraph {
        let graph = attractor_dot::parse(dot).unwrap();
        PipelineGraph::from_dot(graph).unwrap()
    }

    fn make_outcome(status: StageStatus) -> Outcome {
        Outcome {
            status,
            ..Default::default()
        }
    }

    #[test]
    fn all_goal_gates_satisfied() {
        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true]
            review -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Success));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(result.all_satisfied);
        assert!(result.failed_node_id.is_none());
        assert!(result.retry_target.is_none());
    }

    #[test]
    fn failed_goal_gate_with_retry_target() {
        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true, retry_target="draft"]
            draft -> review -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(!result.all_satisfied);
        assert_eq!(result.failed_node_id.as_deref(), Some("review"));
        assert_eq!(result.retry_target.as_deref(), Some("draft"));
    }

    #[test]
    fn failed_goal_gate_without_retry_returns_error() {
        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true]
            review -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));

        let err = enforce_goal_gates(&pg, &outcomes).unwrap_err();
        match err {
            AttractorError::GoalGateUnsatisfied { node } => {
                assert_eq!(node, "review");
            }
            other => panic!("expected GoalGateUnsatisfied, got: {other:?}"),
        }
    }

    #[test]
    fn non_goal_gate_nodes_ignored_even_if_failed() {
        let pg = parse_and_build(
            r#"digraph G {
            step_a [goal_gate=false]
            step_b [goal_gate=true]
            step_a -> step_b -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("step_a".into(), make_outcome(StageStatus::Fail));
        outcomes.insert("step_b".into(), make_outcome(StageStatus::Success));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(result.all_satisfied);
    }

    #[test]
    fn only_visited_nodes_checked() {
        let pg = parse_and_build(
            r#"digraph G {
            gate_a [goal_gate=true]
            gate_b [goal_gate=true]
            gate_a -> gate_b -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("gate_a".into(), make_outcome(StageStatus::Success));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(result.all_satisfied);
    }

    #[test]
    fn four_level_retry_fallback_chain() {
        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true, retry_target="node_rt"]
            review -> done
        }"#,
        );
        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));
        assert_eq!(check_goal_gates(&pg, &outcomes).retry_target.as_deref(), Some("node_rt"));

        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true, fallback_retry_target="node_frt"]
            review -> done
        }"#,
        );
        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));
        assert_eq!(
            check_goal_gates(&pg, &outcomes).retry_target.as_deref(),
            Some("node_frt")
        );

        let pg = parse_and_build(
            r#"digraph G {
            retry_target = "graph_rt"
            review [goal_gate=true]
            review -> done
        }"#,
        );
        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));
        assert_eq!(check_goal_gates(&pg, &outcomes).retry_target.as_deref(), Some("graph_rt"));

        let pg = parse_and_build(
            r#"digraph G {
            fallback_retry_target = "graph_frt"
            review [goal_gate=true]
            review -> done
        }"#,
        );
        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));
        assert_eq!(
            check_goal_gates(&pg, &outcomes).retry_target.as_deref(),
            Some("graph_frt")
        );
    }

    #[test]
    fn partial_success_counts_as_satisfied() {
        let pg = parse_and_build(
            r#"digraph G {
            review [goal_gate=true]
            review -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("review".into(), make_outcome(StageStatus::PartialSuccess));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(result.all_satisfied);
    }

    #[test]
    fn redirect_clears_every_node_on_every_path_back_to_gate() {
        // draft -> branch_a -> review
        // draft -> branch_b -> review
        let pg = parse_and_build(
            r#"digraph G {
            draft [retry_target="draft"]
            draft -> branch_a
            draft -> branch_b
            branch_a -> review
            branch_b -> review
            review [goal_gate=true, retry_target="draft"]
            review -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        outcomes.insert("draft".into(), make_outcome(StageStatus::Success));
        outcomes.insert("branch_a".into(), make_outcome(StageStatus::Success));
        outcomes.insert("branch_b".into(), make_outcome(StageStatus::Success));
        outcomes.insert("review".into(), make_outcome(StageStatus::Fail));

        let result = check_goal_gates(&pg, &outcomes);
        assert!(result.nodes_to_clear.contains("draft"));
        assert!(result.nodes_to_clear.contains("branch_a"));
        assert!(result.nodes_to_clear.contains("branch_b"));
        assert!(result.nodes_to_clear.contains("review"));
    }

    #[test]
    fn first_unsatisfied_gate_in_declaration_order_is_deterministic() {
        let pg = parse_and_build(
            r#"digraph G {
            gate_a [goal_gate=true]
            gate_b [goal_gate=true]
            gate_a -> gate_b -> done
        }"#,
        );

        let mut outcomes = IndexMap::new();
        // Insertion order deliberately reversed from declaration order.
        outcomes.insert("gate_b".into(), make_outcome(StageStatus::Fail));
        outcomes.insert("gate_a".into(), make_outcome(StageStatus::Fail));

        let result = check_goal_gates(&pg, &outcomes);
        assert_eq!(result.failed_node_id.as_deref(), Some("gate_a"));
    }
}
