//! Corpus structures: trees of corpora and documents
//!
//! Every node carries a path, the names of its ancestors and itself joined
//! with `/`. Paths are unique within one structure and serve as the
//! cross-structure key when nodes of different structures are matched.

use crate::error::{Error, Result};
use crate::graph::DocumentGraph;
use crate::id::{Identifier, NodeKey, StructureId};
use crate::meta::{MetaAnnotation, MetaAnnotations};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Separator between path segments
pub const PATH_SEPARATOR: char = '/';

/// Whether a node is a corpus or a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Corpus,
    Document,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Corpus => write!(f, "corpus"),
            NodeRole::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Clone)]
struct Label {
    name: String,
    path: String,
}

/// A corpus or document node of a structure
pub struct CorpusNode {
    id: Identifier,
    role: NodeRole,
    label: RwLock<Label>,
    meta: RwLock<MetaAnnotations>,
    /// Only documents own a graph
    graph: RwLock<Option<DocumentGraph>>,
}

impl CorpusNode {
    fn new(id: Identifier, role: NodeRole, name: &str, path: String) -> Self {
        let graph = match role {
            NodeRole::Document => Some(DocumentGraph::new()),
            NodeRole::Corpus => None,
        };
        Self {
            id,
            role,
            label: RwLock::new(Label {
                name: name.to_string(),
                path,
            }),
            meta: RwLock::new(MetaAnnotations::new()),
            graph: RwLock::new(graph),
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_document(&self) -> bool {
        self.role == NodeRole::Document
    }

    pub fn is_corpus(&self) -> bool {
        self.role == NodeRole::Corpus
    }

    pub fn name(&self) -> String {
        self.label.read().name.clone()
    }

    pub fn path(&self) -> String {
        self.label.read().path.clone()
    }

    /// Display id combining path and owning structure
    pub fn global_id(&self) -> String {
        format!("graft:/{}#{}", self.label.read().path, self.id.structure())
    }

    pub fn meta(&self) -> RwLockReadGuard<'_, MetaAnnotations> {
        self.meta.read()
    }

    pub fn meta_mut(&self) -> RwLockWriteGuard<'_, MetaAnnotations> {
        self.meta.write()
    }

    /// Convenience for adding a single meta-annotation
    pub fn annotate(&self, namespace: Option<&str>, name: &str, value: &str) {
        self.meta.write().insert(MetaAnnotation::new(namespace, name, value));
    }

    pub fn graph(&self) -> RwLockReadGuard<'_, Option<DocumentGraph>> {
        self.graph.read()
    }

    pub fn graph_mut(&self) -> RwLockWriteGuard<'_, Option<DocumentGraph>> {
        self.graph.write()
    }

    /// Replace the document graph
    pub fn set_graph(&self, graph: DocumentGraph) -> Result<()> {
        if !self.is_document() {
            return Err(Error::NotADocument(self.id));
        }
        *self.graph.write() = Some(graph);
        Ok(())
    }

    fn relabel(&self, name: Option<&str>, path: String) {
        let mut label = self.label.write();
        if let Some(name) = name {
            label.name = name.to_string();
        }
        label.path = path;
    }
}

impl std::fmt::Debug for CorpusNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("path", &self.label.read().path)
            .finish()
    }
}

#[derive(Default)]
struct Tree {
    /// Keys are allocated monotonically, so iteration is insertion order
    nodes: BTreeMap<NodeKey, Arc<CorpusNode>>,
    by_path: HashMap<String, NodeKey>,
    parent: HashMap<NodeKey, NodeKey>,
    children: HashMap<NodeKey, Vec<NodeKey>>,
}

impl Tree {
    fn subtree(&self, root: NodeKey) -> Vec<NodeKey> {
        let mut keys = vec![root];
        let mut i = 0;
        while i < keys.len() {
            if let Some(children) = self.children.get(&keys[i]) {
                keys.extend(children.iter().copied());
            }
            i += 1;
        }
        keys
    }
}

/// A corpus structure (corpus graph) produced by one pipeline
pub struct CorpusStructure {
    id: StructureId,
    name: String,
    next_key: AtomicU64,
    tree: RwLock<Tree>,
}

impl CorpusStructure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StructureId::new(),
            name: name.into(),
            next_key: AtomicU64::new(1),
            tree: RwLock::new(Tree::default()),
        }
    }

    pub fn id(&self) -> StructureId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a corpus without parent
    pub fn add_root_corpus(&self, name: &str) -> Result<Arc<CorpusNode>> {
        self.insert(None, name, NodeRole::Corpus)
    }

    /// Add a corpus below an existing corpus
    pub fn add_sub_corpus(&self, parent: &Identifier, name: &str) -> Result<Arc<CorpusNode>> {
        self.insert(Some(parent), name, NodeRole::Corpus)
    }

    /// Add a document with an empty graph below an existing corpus
    pub fn add_document(&self, parent: &Identifier, name: &str) -> Result<Arc<CorpusNode>> {
        self.insert(Some(parent), name, NodeRole::Document)
    }

    fn insert(&self, parent: Option<&Identifier>, name: &str, role: NodeRole) -> Result<Arc<CorpusNode>> {
        validate_name(name)?;
        let mut tree = self.tree.write();

        let parent = match parent {
            Some(parent_id) => {
                self.check_owner(parent_id)?;
                let parent = tree
                    .nodes
                    .get(&parent_id.key())
                    .ok_or(Error::NodeNotFound(*parent_id))?;
                if !parent.is_corpus() {
                    return Err(Error::NotACorpus(*parent_id));
                }
                Some((parent_id.key(), parent.path()))
            }
            None => None,
        };

        let path = match &parent {
            Some((_, parent_path)) => format!("{}{}{}", parent_path, PATH_SEPARATOR, name),
            None => name.to_string(),
        };
        if tree.by_path.contains_key(&path) {
            return Err(Error::DuplicateNode(path));
        }

        let key = NodeKey::new(self.next_key.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(CorpusNode::new(
            Identifier::new(self.id, key),
            role,
            name,
            path.clone(),
        ));

        trace!(structure = %self.name, path = %path, role = %role, "Added node");
        tree.nodes.insert(key, node.clone());
        tree.by_path.insert(path, key);
        if let Some((parent_key, _)) = parent {
            tree.parent.insert(key, parent_key);
            tree.children.entry(parent_key).or_default().push(key);
        }

        Ok(node)
    }

    fn check_owner(&self, id: &Identifier) -> Result<()> {
        if id.structure() != self.id {
            return Err(Error::ForeignNode {
                node: *id,
                structure: self.id,
            });
        }
        Ok(())
    }

    /// Make sure a chain of corpora exists for `path`, creating what is missing.
    ///
    /// Returns the corpus at `path` and the number of nodes created.
    pub fn ensure_corpus_path(&self, path: &str) -> Result<(Arc<CorpusNode>, usize)> {
        let mut created = 0;
        let mut current: Option<Arc<CorpusNode>> = None;
        let mut prefix = String::new();

        for segment in split_path(path)? {
            if !prefix.is_empty() {
                prefix.push(PATH_SEPARATOR);
            }
            prefix.push_str(segment);

            let node = match self.node_by_path(&prefix) {
                Some(existing) if existing.is_corpus() => existing,
                Some(existing) => return Err(Error::NotACorpus(existing.id())),
                None => {
                    created += 1;
                    match &current {
                        Some(parent) => self.add_sub_corpus(&parent.id(), segment)?,
                        None => self.add_root_corpus(segment)?,
                    }
                }
            };
            current = Some(node);
        }

        current
            .map(|node| (node, created))
            .ok_or_else(|| Error::InvalidPath(path.to_string()))
    }

    /// Make sure a document exists at `path`, creating it and its parent
    /// corpora when missing.
    pub fn ensure_document_path(&self, path: &str) -> Result<(Arc<CorpusNode>, usize)> {
        let (parent_path, name) = path.rsplit_once(PATH_SEPARATOR).ok_or_else(|| {
            Error::InvalidPath(format!("document path '{}' needs a parent corpus", path))
        })?;

        if let Some(existing) = self.node_by_path(path) {
            if !existing.is_document() {
                return Err(Error::NotADocument(existing.id()));
            }
            return Ok((existing, 0));
        }

        let (parent, created) = self.ensure_corpus_path(parent_path)?;
        let document = self.add_document(&parent.id(), name)?;
        Ok((document, created + 1))
    }

    pub fn node(&self, id: &Identifier) -> Option<Arc<CorpusNode>> {
        if id.structure() != self.id {
            return None;
        }
        self.tree.read().nodes.get(&id.key()).cloned()
    }

    pub fn node_by_path(&self, path: &str) -> Option<Arc<CorpusNode>> {
        let tree = self.tree.read();
        tree.by_path
            .get(path)
            .and_then(|key| tree.nodes.get(key))
            .cloned()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> Vec<Arc<CorpusNode>> {
        self.tree.read().nodes.values().cloned().collect()
    }

    pub fn corpora(&self) -> Vec<Arc<CorpusNode>> {
        self.nodes_with_role(NodeRole::Corpus)
    }

    pub fn documents(&self) -> Vec<Arc<CorpusNode>> {
        self.nodes_with_role(NodeRole::Document)
    }

    fn nodes_with_role(&self, role: NodeRole) -> Vec<Arc<CorpusNode>> {
        self.tree
            .read()
            .nodes
            .values()
            .filter(|n| n.role() == role)
            .cloned()
            .collect()
    }

    /// Nodes without a parent
    pub fn roots(&self) -> Vec<Arc<CorpusNode>> {
        let tree = self.tree.read();
        tree.nodes
            .iter()
            .filter(|(key, _)| !tree.parent.contains_key(key))
            .map(|(_, node)| node.clone())
            .collect()
    }

    pub fn children(&self, id: &Identifier) -> Vec<Arc<CorpusNode>> {
        if id.structure() != self.id {
            return Vec::new();
        }
        let tree = self.tree.read();
        tree.children
            .get(&id.key())
            .map(|keys| keys.iter().filter_map(|k| tree.nodes.get(k).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: &Identifier) -> Option<Arc<CorpusNode>> {
        if id.structure() != self.id {
            return None;
        }
        let tree = self.tree.read();
        tree.parent.get(&id.key()).and_then(|k| tree.nodes.get(k)).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.tree.read().nodes.len()
    }

    pub fn document_count(&self) -> usize {
        self.tree.read().nodes.values().filter(|n| n.is_document()).count()
    }

    pub fn corpus_count(&self) -> usize {
        self.tree.read().nodes.values().filter(|n| n.is_corpus()).count()
    }

    /// Number of corpus -> sub-corpus edges
    pub fn corpus_relation_count(&self) -> usize {
        self.edge_count(NodeRole::Corpus)
    }

    /// Number of corpus -> document edges
    pub fn document_relation_count(&self) -> usize {
        self.edge_count(NodeRole::Document)
    }

    fn edge_count(&self, child_role: NodeRole) -> usize {
        let tree = self.tree.read();
        tree.parent
            .keys()
            .filter(|key| tree.nodes.get(key).map(|n| n.role()) == Some(child_role))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().nodes.is_empty()
    }

    /// Remove a node together with everything below it
    pub fn remove_node(&self, id: &Identifier) -> Option<Arc<CorpusNode>> {
        if id.structure() != self.id {
            return None;
        }
        let mut tree = self.tree.write();
        let removed = tree.nodes.get(&id.key()).cloned()?;

        for key in tree.subtree(id.key()) {
            if let Some(node) = tree.nodes.remove(&key) {
                tree.by_path.remove(&node.path());
            }
            tree.children.remove(&key);
            tree.parent.remove(&key);
        }
        for siblings in tree.children.values_mut() {
            siblings.retain(|k| *k != id.key());
        }

        trace!(structure = %self.name, path = %removed.path(), "Removed node");
        Some(removed)
    }

    /// Rename a node, updating the paths of the node and everything below it
    pub fn rename(&self, id: &Identifier, name: &str) -> Result<()> {
        validate_name(name)?;
        self.check_owner(id)?;
        let mut tree = self.tree.write();

        let node = tree.nodes.get(&id.key()).cloned().ok_or(Error::NodeNotFound(*id))?;
        let new_path = match tree.parent.get(&id.key()).and_then(|k| tree.nodes.get(k)) {
            Some(parent) => format!("{}{}{}", parent.path(), PATH_SEPARATOR, name),
            None => name.to_string(),
        };
        let old_path = node.path();
        if new_path == old_path {
            return Ok(());
        }
        if tree.by_path.contains_key(&new_path) {
            return Err(Error::DuplicateNode(new_path));
        }

        for key in tree.subtree(id.key()) {
            let Some(descendant) = tree.nodes.get(&key).cloned() else {
                continue;
            };
            let current = descendant.path();
            let updated = format!("{}{}", new_path, &current[old_path.len()..]);
            tree.by_path.remove(&current);
            tree.by_path.insert(updated.clone(), key);
            let new_name = (key == id.key()).then_some(name);
            descendant.relabel(new_name, updated);
        }

        debug!(structure = %self.name, from = %old_path, to = %new_path, "Renamed node");
        Ok(())
    }
}

impl std::fmt::Debug for CorpusStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusStructure")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.node_count())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidName("name cannot be empty".into()));
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(Error::InvalidName(format!(
            "'{}' must not contain '{}'",
            name, PATH_SEPARATOR
        )));
    }
    Ok(())
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
