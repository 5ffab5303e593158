//! Arena-backed documents whose containers may reference each other.
//!
//! `serde_json::Value` is a tree, but live documents handed over by a host
//! often are not: an item points back at its owning actor, which lists the
//! item again. `DocumentGraph` stores every node in one arena and links
//! containers by `NodeId`, so cycles are plain data.

use serde_json::{Number, Value};

/// Index of a node inside a `DocumentGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A single node. Containers refer to children by id.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Host callable; carries no data.
    Function,
    List(Vec<NodeId>),
    Map(Vec<(String, NodeId)>),
}

#[derive(Debug, Clone, Default)]
pub struct DocumentGraph {
    nodes: Vec<GraphValue>,
}

impl DocumentGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its id.
    pub fn add(&mut self, value: GraphValue) -> NodeId {
        self.nodes.push(value);
        NodeId(self.nodes.len() - 1)
    }

    /// Replace a node in place. This is how cycles are closed: add a
    /// placeholder, build the children, then fill the placeholder.
    ///
    /// Ids not produced by this graph are ignored.
    pub fn set(&mut self, id: NodeId, value: GraphValue) {
        if let Some(slot) = self.nodes.get_mut(id.0) {
            *slot = value;
        }
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&GraphValue> {
        self.nodes.get(id.0)
    }

    /// Borrow a node as a walkable reference.
    #[must_use]
    pub const fn node(&self, id: NodeId) -> GraphRef<'_> {
        GraphRef { graph: self, id }
    }

    /// Import a JSON tree, returning the id of its root.
    pub fn import(&mut self, value: &Value) -> NodeId {
        let node = match value {
            Value::Null => GraphValue::Null,
            Value::Bool(b) => GraphValue::Bool(*b),
            Value::Number(n) => GraphValue::Number(n.clone()),
            Value::String(s) => GraphValue::String(s.clone()),
            Value::Array(items) => GraphValue::List(items.iter().map(|v| self.import(v)).collect()),
            Value::Object(map) => GraphValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.import(v)))
                    .collect(),
            ),
        };
        self.add(node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A node of a graph, paired with the graph it lives in.
#[derive(Debug, Clone, Copy)]
pub struct GraphRef<'a> {
    graph: &'a DocumentGraph,
    id: NodeId,
}

impl<'a> GraphRef<'a> {
    #[must_use]
    pub const fn id(self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn value(self) -> Option<&'a GraphValue> {
        self.graph.get(self.id)
    }

    #[must_use]
    pub const fn at(self, id: NodeId) -> Self {
        Self {
            graph: self.graph,
            id,
        }
    }
}
