use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Node and attribute maps use `IndexMap` rather than `HashMap` so that
/// declaration order survives parsing — the engine's goal-gate and
/// validator diagnostics depend on visiting nodes in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotGraph {
    pub name: String,
    pub attrs: IndexMap<String, AttributeValue>,
    pub nodes: IndexMap<String, NodeDef>,
    pub edges: Vec<EdgeDef>,
    pub subgraphs: Vec<SubgraphDef>,
    pub node_defaults: IndexMap<String, AttributeValue>,
    pub edge_defaults: IndexMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub attrs: IndexMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    pub attrs: IndexMap<String, AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphDef {
    pub name: Option<String>,
    pub attrs: IndexMap<String, AttributeValue>,
    pub nodes: IndexMap<String, NodeDef>,
    pub edges: Vec<EdgeDef>,
    pub node_defaults: IndexMap<String, AttributeValue>,
    pub edge_defaults: IndexMap<String, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    #[serde(with = "crate::duration_serde")]
    Duration(Duration),
}
