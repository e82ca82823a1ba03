//! Graph node and edge types.
//!
//! Nodes are held in an `id -> node` table and edges as `(source, target)`
//! id pairs; the graph never holds pointer structures, so cyclic imports and
//! inheritance chains are representable without ownership issues.

use serde::{Deserialize, Serialize};

/// Kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Function,
    Class,
    Module,
    Variable,
    Interface,
    Type,
}

/// Relationship kind between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Calls,
    Imports,
    Inherits,
    Contains,
    References,
    Exports,
}

/// Node attributes filled in during parsing and post-processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// `in_degree + out_degree`, computed in post-processing.
    #[serde(default)]
    pub importance: usize,
    #[serde(default)]
    pub in_degree: usize,
    #[serde(default)]
    pub out_degree: usize,
}

/// A code entity. File nodes use the file path as id; symbols use
/// `"{file}::{name}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: NodeMetadata,
    /// Ids of directly contained nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            content: None,
            metadata: NodeMetadata::default(),
            children: Vec::new(),
        }
    }

    /// The file path part of this node's id.
    pub fn file_path(&self) -> &str {
        self.id.split("::").next().unwrap_or(&self.id)
    }

    /// The symbol name for non-file nodes.
    pub fn symbol_name(&self) -> Option<&str> {
        self.id.split_once("::").map(|(_, name)| name)
    }
}

/// Edge attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

/// A directed relationship between two nodes (by id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub metadata: EdgeMetadata,
}

impl GraphEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
            metadata: EdgeMetadata::default(),
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.metadata.line_number = Some(line);
        self
    }
}
