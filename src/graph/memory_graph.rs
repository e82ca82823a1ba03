//! The memory graph: build, query, expand, persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::Result;

use super::parser::{language_for_extension, parse_source};
use super::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};

const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

/// Counts by node and edge kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_kind: HashMap<String, usize>,
    pub edges_by_kind: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphMetadata {
    built_at: Option<DateTime<Utc>>,
    repo_path: Option<PathBuf>,
    file_count: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    metadata: GraphMetadata,
}

/// Directed multigraph of code entities, persisted as `{nodes, edges, metadata}`.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: HashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    metadata: GraphMetadata,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk a repository and build the graph from its source files.
    ///
    /// Dot-directories, `node_modules`, and `target` are skipped. Files with
    /// unsupported extensions are ignored.
    pub fn build_from_repository(repo_path: impl AsRef<Path>) -> Result<Self> {
        let repo_path = repo_path.as_ref();
        let mut graph = Self::new();

        let mut files = Vec::new();
        collect_source_files(repo_path, &mut files)?;
        files.sort();

        for file in &files {
            graph.ingest_file(repo_path, file)?;
        }

        graph.resolve_imports();
        graph.build_call_graph();
        graph.compute_importance();

        graph.metadata = GraphMetadata {
            built_at: Some(Utc::now()),
            repo_path: Some(repo_path.to_path_buf()),
            file_count: files.len(),
        };

        tracing::info!(
            files = files.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "memory graph built"
        );
        Ok(graph)
    }

    fn ingest_file(&mut self, repo_path: &Path, file: &Path) -> Result<()> {
        let extension = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %file.display(), error = %e, "skipping unreadable file");
                return Ok(());
            }
        };

        let rel = file
            .strip_prefix(repo_path)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");
        let parsed = parse_source(&content, extension);

        let mut file_node = GraphNode::new(rel.clone(), NodeKind::File);
        file_node.metadata.language = parsed.language.map(|l| l.to_string());

        for declaration in &parsed.declarations {
            let child_id = format!("{rel}::{}", declaration.name);

            let mut node = GraphNode::new(child_id.clone(), declaration.kind.node_kind());
            node.content = Some(declaration.content.clone());
            node.metadata.language = parsed.language.map(|l| l.to_string());
            node.metadata.line = Some(declaration.line);
            node.metadata.is_exported = declaration.is_exported;
            node.metadata.parameters = declaration.parameters.clone();
            node.metadata.return_type = declaration.return_type.clone();
            self.nodes.insert(child_id.clone(), node);

            file_node.children.push(child_id.clone());
            self.edges.push(
                GraphEdge::new(rel.clone(), child_id.clone(), EdgeKind::Contains)
                    .at_line(declaration.line),
            );

            for parent in &declaration.parents {
                self.edges.push(
                    GraphEdge::new(child_id.clone(), parent.clone(), EdgeKind::Inherits)
                        .at_line(declaration.line),
                );
            }
        }

        for (target, line) in &parsed.imports {
            self.ensure_module_node(target);
            self.edges
                .push(GraphEdge::new(rel.clone(), target.clone(), EdgeKind::Imports).at_line(*line));
        }

        for (name, line) in &parsed.exports {
            let symbol_id = format!("{rel}::{name}");
            if self.nodes.contains_key(&symbol_id) {
                self.edges
                    .push(GraphEdge::new(rel.clone(), symbol_id, EdgeKind::Exports).at_line(*line));
            }
        }
        for declaration in &parsed.declarations {
            if declaration.is_exported {
                let symbol_id = format!("{rel}::{}", declaration.name);
                self.edges.push(
                    GraphEdge::new(rel.clone(), symbol_id, EdgeKind::Exports)
                        .at_line(declaration.line),
                );
            }
        }

        self.nodes.insert(rel, file_node);
        Ok(())
    }

    fn ensure_module_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) {
            self.nodes
                .insert(id.to_string(), GraphNode::new(id, NodeKind::Module));
        }
    }

    /// Retarget relative import edges to file nodes when one of
    /// `{p.ts, p.js, p/index.ts, p/index.js}` exists in the node set.
    fn resolve_imports(&mut self) {
        let node_ids: HashSet<String> = self.nodes.keys().cloned().collect();
        let mut dropped_modules = Vec::new();

        for edge in &mut self.edges {
            if edge.kind != EdgeKind::Imports || !edge.target.starts_with('.') {
                continue;
            }
            let base = normalize_relative(&edge.source, &edge.target);
            let candidates = [
                format!("{base}.ts"),
                format!("{base}.js"),
                format!("{base}/index.ts"),
                format!("{base}/index.js"),
            ];
            if let Some(resolved) = candidates.iter().find(|c| node_ids.contains(*c)) {
                dropped_modules.push(edge.target.clone());
                edge.target = resolved.clone();
            }
        }

        // Unresolved-placeholder modules whose every edge got retargeted.
        for module in dropped_modules {
            let still_used = self
                .edges
                .iter()
                .any(|e| e.source == module || e.target == module);
            if !still_used {
                self.nodes.remove(&module);
            }
        }

        // Inherits targets: resolve bare parent names to symbols when unique.
        let symbol_index: HashMap<String, Vec<String>> = {
            let mut index: HashMap<String, Vec<String>> = HashMap::new();
            for node in self.nodes.values() {
                if let Some(name) = node.symbol_name() {
                    index.entry(name.to_string()).or_default().push(node.id.clone());
                }
            }
            index
        };
        for edge in &mut self.edges {
            if edge.kind != EdgeKind::Inherits || self.nodes.contains_key(&edge.target) {
                continue;
            }
            match symbol_index.get(&edge.target) {
                Some(ids) if ids.len() == 1 => edge.target = ids[0].clone(),
                _ => {}
            }
        }
        // Any remaining dangling inherits target becomes a placeholder type node.
        let dangling: Vec<String> = self
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Inherits && !self.nodes.contains_key(&e.target))
            .map(|e| e.target.clone())
            .collect();
        for target in dangling {
            self.nodes
                .entry(target.clone())
                .or_insert_with(|| GraphNode::new(target, NodeKind::Type));
        }
    }

    /// Naive call graph: scan each function's content for `name(` substrings
    /// matching other known function names.
    fn build_call_graph(&mut self) {
        let functions: Vec<(String, String)> = self
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Function)
            .filter_map(|n| {
                n.symbol_name()
                    .map(|name| (name.to_string(), n.id.clone()))
            })
            .collect();

        let mut new_edges = Vec::new();
        for node in self.nodes.values() {
            if node.kind != NodeKind::Function {
                continue;
            }
            let Some(content) = &node.content else {
                continue;
            };
            for (name, callee_id) in &functions {
                if callee_id == &node.id {
                    continue;
                }
                if contains_call(content, name) {
                    new_edges.push(GraphEdge::new(
                        node.id.clone(),
                        callee_id.clone(),
                        EdgeKind::Calls,
                    ));
                }
            }
        }
        self.edges.extend(new_edges);
    }

    fn compute_importance(&mut self) {
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut out_degree: HashMap<String, usize> = HashMap::new();
        for edge in &self.edges {
            *out_degree.entry(edge.source.clone()).or_default() += 1;
            *in_degree.entry(edge.target.clone()).or_default() += 1;
        }

        for node in self.nodes.values_mut() {
            let inbound = in_degree.get(&node.id).copied().unwrap_or(0);
            let outbound = out_degree.get(&node.id).copied().unwrap_or(0);
            node.metadata.in_degree = inbound;
            node.metadata.out_degree = outbound;
            node.metadata.importance = inbound + outbound;
        }
    }

    /// Expand a seed context with the content of nodes contained in the seed
    /// files and nodes incident to edges involving them.
    ///
    /// Added content is deduplicated against the accumulated text by
    /// substring match. Traversal is by id with a visited set.
    pub fn expand_context(&self, seed_text: &str, seed_file_paths: &[String]) -> String {
        let seeds: HashSet<&str> = seed_file_paths.iter().map(|s| s.as_str()).collect();
        let involves_seed = |id: &str| {
            seeds.contains(id) || seeds.contains(GraphNode::file_part(id))
        };

        let mut candidate_ids: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        for path in seed_file_paths {
            if let Some(file_node) = self.nodes.get(path) {
                for child in &file_node.children {
                    if visited.insert(child.clone()) {
                        candidate_ids.push(child.clone());
                    }
                }
            }
        }

        for edge in &self.edges {
            if involves_seed(&edge.source) || involves_seed(&edge.target) {
                for id in [&edge.source, &edge.target] {
                    if visited.insert(id.clone()) {
                        candidate_ids.push(id.clone());
                    }
                }
            }
        }

        let mut expanded = seed_text.to_string();
        for id in candidate_ids {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let Some(content) = &node.content else {
                continue;
            };
            if content.trim().is_empty() || expanded.contains(content.as_str()) {
                continue;
            }
            expanded.push_str("\n\n// ");
            expanded.push_str(&node.id);
            expanded.push('\n');
            expanded.push_str(content);
        }
        expanded
    }

    /// Cache-key tuples worth pre-seeding: the top-10 nodes by importance
    /// projected to path tuples, plus the top-5 imported modules.
    pub fn get_hot_paths(&self) -> Vec<Vec<String>> {
        let mut by_importance: Vec<&GraphNode> = self.nodes.values().collect();
        by_importance.sort_by(|a, b| {
            b.metadata
                .importance
                .cmp(&a.metadata.importance)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut paths: Vec<Vec<String>> = Vec::new();
        for node in by_importance.iter().take(10) {
            let mut tuple: Vec<String> = node
                .file_path()
                .split('/')
                .map(|s| s.to_string())
                .collect();
            if let Some(symbol) = node.symbol_name() {
                tuple.push(symbol.to_string());
            }
            if !paths.contains(&tuple) {
                paths.push(tuple);
            }
        }

        let mut import_counts: HashMap<&str, usize> = HashMap::new();
        for edge in &self.edges {
            if edge.kind == EdgeKind::Imports {
                *import_counts.entry(edge.target.as_str()).or_default() += 1;
            }
        }
        let mut imports: Vec<(&str, usize)> = import_counts.into_iter().collect();
        imports.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (module, _) in imports.into_iter().take(5) {
            let tuple = vec!["imports".to_string(), module.to_string()];
            if !paths.contains(&tuple) {
                paths.push(tuple);
            }
        }

        paths
    }

    /// Node lookup by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// All edges.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            ..Default::default()
        };
        for node in self.nodes.values() {
            *stats
                .nodes_by_kind
                .entry(format!("{:?}", node.kind).to_lowercase())
                .or_default() += 1;
        }
        for edge in &self.edges {
            *stats
                .edges_by_kind
                .entry(format!("{:?}", edge.kind).to_lowercase())
                .or_default() += 1;
        }
        stats
    }

    /// Persist as `{nodes, edges, metadata}` JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut nodes: Vec<GraphNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let persisted = PersistedGraph {
            nodes,
            edges: self.edges.clone(),
            metadata: self.metadata.clone(),
        };
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&persisted)?)?;
        Ok(())
    }

    /// Load a persisted graph.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        let persisted: PersistedGraph = serde_json::from_slice(&bytes)?;
        Ok(Self {
            nodes: persisted
                .nodes
                .into_iter()
                .map(|n| (n.id.clone(), n))
                .collect(),
            edges: persisted.edges,
            metadata: persisted.metadata,
        })
    }
}

impl GraphNode {
    fn file_part(id: &str) -> &str {
        id.split("::").next().unwrap_or(id)
    }
}

fn collect_source_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            collect_source_files(&path, out)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if language_for_extension(ext).is_some() {
                out.push(path);
            }
        }
    }
    Ok(())
}

/// Resolve `./x` / `../x` against the importing file's directory, in id space.
fn normalize_relative(source_file: &str, target: &str) -> String {
    let dir = Path::new(source_file).parent().unwrap_or_else(|| Path::new(""));
    let joined = dir.join(target);

    let mut parts: Vec<String> = Vec::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            _ => {}
        }
    }
    parts.join("/")
}

/// True when `name(` occurs with a non-identifier character before it.
fn contains_call(content: &str, name: &str) -> bool {
    let needle = format!("{name}(");
    let mut search_from = 0;
    while let Some(pos) = content[search_from..].find(&needle) {
        let absolute = search_from + pos;
        let boundary = absolute == 0
            || !content[..absolute]
                .chars()
                .next_back()
                .map_or(false, |c| c.is_alphanumeric() || c == '_');
        if boundary {
            return true;
        }
        search_from = absolute + needle.len();
    }
    false
}
