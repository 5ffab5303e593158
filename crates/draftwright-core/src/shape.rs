//! Value-free shape mirrors of documents.
//!
//! The shape of a document tells a model which fields exist and what type
//! they hold, without sending any of the values:
//!
//! ```text
//! {"a": 1, "b": "x", "c": [{"d": true}]}  ->  {"a": "number", "b": "string", "c": [{"d": "boolean"}]}
//! ```
//!
//! Lists are described by their first element only. Documents in this domain
//! keep lists nearly homogeneous, and sampling keeps the cost independent of
//! list length; a heterogeneous list is under-described, not mis-described.

use crate::graph::{GraphRef, GraphValue};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Emitted in place of a container that was already visited during one
/// extraction.
pub const CIRCULAR_SENTINEL: &str = "[Circular Reference]";

/// What a node looks like to the extractor.
pub enum NodeKind<'a, N> {
    Null,
    Bool,
    Number,
    String,
    Function,
    List(Vec<N>),
    Map(Vec<(&'a str, N)>),
}

/// Read access to a document node, for any document representation.
pub trait DocumentNode<'a>: Copy {
    /// Identity of a container, stable for the duration of one walk.
    /// Scalars return `None`.
    fn identity(self) -> Option<usize>;

    fn kind(self) -> NodeKind<'a, Self>;
}

impl<'a> DocumentNode<'a> for &'a Value {
    fn identity(self) -> Option<usize> {
        match self {
            Value::Array(_) | Value::Object(_) => Some(std::ptr::from_ref(self).addr()),
            _ => None,
        }
    }

    fn kind(self) -> NodeKind<'a, Self> {
        match self {
            Value::Null => NodeKind::Null,
            Value::Bool(_) => NodeKind::Bool,
            Value::Number(_) => NodeKind::Number,
            Value::String(_) => NodeKind::String,
            Value::Array(items) => NodeKind::List(items.iter().collect()),
            Value::Object(map) => NodeKind::Map(map.iter().map(|(k, v)| (k.as_str(), v)).collect()),
        }
    }
}

impl<'a> DocumentNode<'a> for GraphRef<'a> {
    fn identity(self) -> Option<usize> {
        match self.value()? {
            GraphValue::List(_) | GraphValue::Map(_) => Some(self.id().index()),
            _ => None,
        }
    }

    fn kind(self) -> NodeKind<'a, Self> {
        match self.value() {
            None | Some(GraphValue::Null) => NodeKind::Null,
            Some(GraphValue::Bool(_)) => NodeKind::Bool,
            Some(GraphValue::Number(_)) => NodeKind::Number,
            Some(GraphValue::String(_)) => NodeKind::String,
            Some(GraphValue::Function) => NodeKind::Function,
            Some(GraphValue::List(items)) => {
                NodeKind::List(items.iter().map(|id| self.at(*id)).collect())
            }
            Some(GraphValue::Map(entries)) => NodeKind::Map(
                entries
                    .iter()
                    .map(|(key, id)| (key.as_str(), self.at(*id)))
                    .collect(),
            ),
        }
    }
}

/// Recursive shape of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldShape {
    /// Leaf type name: `string`, `number`, `boolean`, `null` or `function`.
    Primitive(&'static str),
    /// Shape of the first element, or `None` for an empty list.
    List(Option<Box<FieldShape>>),
    /// Keyed shapes in source order.
    Map(Vec<(String, FieldShape)>),
    /// A container seen earlier in the same walk.
    Circular,
}

impl FieldShape {
    /// JSON rendering, as sent to the model.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Primitive(name) => Value::String((*name).to_string()),
            Self::List(None) => Value::Array(Vec::new()),
            Self::List(Some(element)) => Value::Array(vec![element.to_value()]),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, shape)| (key.clone(), shape.to_value()))
                    .collect::<Map<_, _>>(),
            ),
            Self::Circular => Value::String(CIRCULAR_SENTINEL.to_string()),
        }
    }

    /// Every leaf, in depth-first order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'s>(&'s self, out: &mut Vec<&'s str>) {
        match self {
            Self::Primitive(name) => out.push(name),
            Self::Circular => out.push(CIRCULAR_SENTINEL),
            Self::List(None) => {}
            Self::List(Some(element)) => element.collect_leaves(out),
            Self::Map(entries) => {
                for (_, shape) in entries {
                    shape.collect_leaves(out);
                }
            }
        }
    }
}

impl Serialize for FieldShape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Primitive(name) => serializer.serialize_str(name),
            Self::Circular => serializer.serialize_str(CIRCULAR_SENTINEL),
            Self::List(element) => {
                let mut seq = serializer.serialize_seq(Some(usize::from(element.is_some())))?;
                if let Some(element) = element {
                    seq.serialize_element(&**element)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, shape) in entries {
                    map.serialize_entry(key, shape)?;
                }
                map.end()
            }
        }
    }
}

/// Which map keys the extractor leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeOptions {
    /// Keys starting with this prefix are host-internal.
    pub internal_prefix: String,
    /// Keys that point back up the ownership graph.
    pub back_reference_keys: Vec<String>,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            internal_prefix: "_".to_string(),
            back_reference_keys: ["parent", "collection", "apps", "compendium"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ShapeOptions {
    fn excludes(&self, key: &str) -> bool {
        (!self.internal_prefix.is_empty() && key.starts_with(&self.internal_prefix))
            || self.back_reference_keys.iter().any(|k| k == key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructureExtractor {
    options: ShapeOptions,
}

impl StructureExtractor {
    #[must_use]
    pub const fn new(options: ShapeOptions) -> Self {
        Self { options }
    }

    /// Shape of `node`. Terminates on any graph; never fails.
    #[must_use]
    pub fn extract<'a, N: DocumentNode<'a>>(&self, node: N) -> FieldShape {
        let mut visited = HashSet::new();
        self.walk(node, &mut visited)
    }

    fn walk<'a, N: DocumentNode<'a>>(&self, node: N, visited: &mut HashSet<usize>) -> FieldShape {
        if let Some(identity) = node.identity() {
            if !visited.insert(identity) {
                return FieldShape::Circular;
            }
        }

        match node.kind() {
            NodeKind::Null => FieldShape::Primitive("null"),
            NodeKind::Bool => FieldShape::Primitive("boolean"),
            NodeKind::Number => FieldShape::Primitive("number"),
            NodeKind::String => FieldShape::Primitive("string"),
            NodeKind::Function => FieldShape::Primitive("function"),
            NodeKind::List(items) => FieldShape::List(
                items
                    .into_iter()
                    .next()
                    .map(|first| Box::new(self.walk(first, visited))),
            ),
            NodeKind::Map(entries) => FieldShape::Map(
                entries
                    .into_iter()
                    .filter(|(key, child)| {
                        !self.options.excludes(key) && !matches!(child.kind(), NodeKind::Function)
                    })
                    .map(|(key, child)| (key.to_string(), self.walk(child, visited)))
                    .collect(),
            ),
        }
    }
}

/// Shape of `node` with default exclusions.
#[must_use]
pub fn extract_structure<'a, N: DocumentNode<'a>>(node: N) -> FieldShape {
    StructureExtractor::default().extract(node)
}
