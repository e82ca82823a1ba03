//! Persisted code entity/relationship graph.
//!
//! The graph is built by walking a repository with regex-level parsers (an
//! acknowledged approximation; the graph contract is language-agnostic), and
//! serves context expansion for the reasoning layer plus hot-path extraction
//! for cache warmup.

mod memory_graph;
mod parser;
mod types;

pub use memory_graph::{GraphStats, MemoryGraph};
pub use parser::{parse_source, Declaration, DeclarationKind, ParsedFile};
pub use types::{EdgeKind, EdgeMetadata, GraphEdge, GraphNode, NodeKind, NodeMetadata};
