//! Edge selection: after a node completes, picks at most one outbound edge.
//!
//! Priority cascade: condition match, suggested-next-id preference, then a
//! weight-then-lexical tie-break over the unconditional edges.

use crate::condition::{evaluate_condition, parse_condition};
use crate::graph::{PipelineEdge, PipelineGraph};

/// Select the next edge to follow after a node completes.
/// Returns `None` if no edges are available (terminal node) or none qualify.
pub fn select_edge<'a>(
    node_id: &str,
    outcome: &attractor_types::Outcome,
    resolve: &dyn Fn(&str) -> String,
    graph: &'a PipelineGraph,
) -> Option<&'a PipelineEdge> {
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return None;
    }

    // Step 1: edges whose condition is present and evaluates true are
    // candidates; edges with no condition are never condition-matches.
    let condition_edges: Vec<_> = edges
        .iter()
        .filter(|e| {
            e.condition
                .as_ref()
                .map(|cond| {
                    parse_condition(cond)
                        .map(|expr| evaluate_condition(&expr, resolve))
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })
        .collect();
    if !condition_edges.is_empty() {
        return Some(pick_among(&condition_edges, outcome));
    }

    // Step 2 (of the candidate set: all edges that have no condition, i.e.
    // unconditional matches): prefer one whose `to` is in suggestedNextIds.
    let unconditional: Vec<_> = edges.iter().filter(|e| e.condition.is_none()).collect();
    if unconditional.is_empty() {
        return edges.first();
    }
    Some(pick_among(&unconditional, outcome))
}

/// Within a candidate set, prefer a `suggestedNextIds` match (in the
/// outcome's listed order); otherwise tie-break by weight then lexical `to`.
fn pick_among<'a>(candidates: &[&'a PipelineEdge], outcome: &attractor_types::Outcome) -> &'a PipelineEdge {
    for suggested in &outcome.suggested_next_ids {
        if let Some(edge) = candidates.iter().find(|e| e.to == *suggested) {
            return edge;
        }
    }
    best_by_weight_then_lexical(candidates)
}

/// Pick the edge with the highest weight; break ties by lexicographically
/// smallest `to` field.
fn best_by_weight_then_lexical<'a>(edges: &[&'a PipelineEdge]) -> &'a PipelineEdge {
    edges
        .iter()
        .copied()
        .max_by(|a, b| {
            a.weight
                .cmp(&b.weight)
                .then(b.to.cmp(&a.to)) // lexical ascending = reverse compare
        })
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;

    fn parse_and_build(dot: &str) -> PipelineGraph {
        let graph = attractor_dot::parse(dot).unwrap();
        PipelineGraph::from_dot(graph).unwrap()
    }

    fn make_outcome() -> attractor_types::Outcome {
        attractor_types::Outcome::success("ok")
    }

    fn make_resolve(outcome_val: &str) -> impl Fn(&str) -> String + '_ {
        move |key: &str| match key {
            "outcome" => outcome_val.to_string(),
            _ => String::new(),
        }
    }

    #[test]
    fn step1_condition_match_takes_priority() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B [condition="outcome=success"]
            A -> C
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("success");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "B");
    }

    #[test]
    fn step2_suggested_next_id_among_conditioned_candidates() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B [condition="outcome=success"]
            A -> C [condition="outcome=success"]
        }"#,
        );
        let mut outcome = make_outcome();
        outcome.suggested_next_ids = vec!["C".to_string()];
        let resolve = make_resolve("success");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "C");
    }

    #[test]
    fn step3_suggested_next_id_among_unconditional() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B
            A -> C
        }"#,
        );
        let mut outcome = make_outcome();
        outcome.suggested_next_ids = vec!["C".to_string()];
        let resolve = make_resolve("unknown");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "C");
    }

    #[test]
    fn step4_highest_weight_wins() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B [weight=1]
            A -> C [weight=5]
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("unknown");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "C");
    }

    #[test]
    fn step5_lexical_tiebreak() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> C [weight=1]
            A -> B [weight=1]
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("unknown");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "B");
    }

    #[test]
    fn no_edges_returns_none() {
        let pg = parse_and_build(
            r#"digraph G {
            A [label="terminal"]
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("unknown");
        assert!(select_edge("A", &outcome, &resolve, &pg).is_none());
    }

    #[test]
    fn condition_false_skips_to_unconditional_step() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B [condition="outcome=fail"]
            A -> C
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("success");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "C");
    }

    #[test]
    fn malformed_condition_treated_as_false() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> B [condition="=bad"]
            A -> C
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("success");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "C");
    }

    #[test]
    fn two_equal_weight_candidates_lexically_smaller_to_wins() {
        let pg = parse_and_build(
            r#"digraph G {
            A -> bravo [weight=2]
            A -> alpha [weight=2]
        }"#,
        );
        let outcome = make_outcome();
        let resolve = make_resolve("unknown");
        let edge = select_edge("A", &outcome, &resolve, &pg).unwrap();
        assert_eq!(edge.to, "alpha");
    }
}
