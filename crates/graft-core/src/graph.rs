//! Document graphs: content nodes, relations and textual datasources
//!
//! Offsets of textual relations count characters, not bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Globally unique id of a content node, datasource or relation.
///
/// Ids stay valid when elements move between graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(Uuid);

impl ContentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a content node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Token,
    Span,
    Structure,
    Other(String),
}

/// A non-textual node of a document graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: ContentId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ContentNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: ContentId::new(),
            kind,
            annotations: BTreeMap::new(),
        }
    }

    pub fn token() -> Self {
        Self::new(NodeKind::Token)
    }

    pub fn span() -> Self {
        Self::new(NodeKind::Span)
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }
}

/// A raw text buffer content nodes are anchored into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextualDs {
    pub id: ContentId,
    pub text: String,
}

impl TextualDs {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: ContentId::new(),
            text: text.into(),
        }
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Kind of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum RelationKind {
    /// Anchors the source node to `[start, end)` of the target datasource
    Textual { start: usize, end: usize },
    Spanning,
    Dominance,
    Pointing,
    Order,
}

/// A directed relation between two graph elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: ContentId,
    pub source: ContentId,
    pub target: ContentId,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(kind: RelationKind, source: ContentId, target: ContentId) -> Self {
        Self {
            id: ContentId::new(),
            source,
            target,
            kind,
        }
    }

    pub fn textual(source: ContentId, datasource: ContentId, start: usize, end: usize) -> Self {
        Self::new(RelationKind::Textual { start, end }, source, datasource)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self.kind, RelationKind::Textual { .. })
    }

    /// `[start, end)` of a textual relation
    pub fn range(&self) -> Option<(usize, usize)> {
        match self.kind {
            RelationKind::Textual { start, end } => Some((start, end)),
            _ => None,
        }
    }

    /// Shift both offsets of a textual relation; no-op for other kinds
    pub fn shift(&mut self, offset: usize) {
        if let RelationKind::Textual { start, end } = &mut self.kind {
            *start += offset;
            *end += offset;
        }
    }
}

/// Where an id lives inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Text(usize),
    Node(usize),
    Relation(usize),
}

/// Serialized form of a [`DocumentGraph`]; the id index is rebuilt on load
#[derive(Deserialize)]
struct GraphParts {
    #[serde(default)]
    texts: Vec<TextualDs>,
    #[serde(default)]
    nodes: Vec<ContentNode>,
    #[serde(default)]
    relations: Vec<Relation>,
}

/// The annotated content of one document
///
/// Every element id is indexed, so inserting an element and looking one up
/// do not depend on the size of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphParts")]
pub struct DocumentGraph {
    texts: Vec<TextualDs>,
    nodes: Vec<ContentNode>,
    relations: Vec<Relation>,
    #[serde(skip)]
    index: HashMap<ContentId, Slot>,
}

impl From<GraphParts> for DocumentGraph {
    fn from(parts: GraphParts) -> Self {
        let mut index = HashMap::with_capacity(parts.texts.len() + parts.nodes.len() + parts.relations.len());
        // a duplicate keeps its first position; validate() reports it
        for (i, ds) in parts.texts.iter().enumerate() {
            index.entry(ds.id).or_insert(Slot::Text(i));
        }
        for (i, node) in parts.nodes.iter().enumerate() {
            index.entry(node.id).or_insert(Slot::Node(i));
        }
        for (i, relation) in parts.relations.iter().enumerate() {
            index.entry(relation.id).or_insert(Slot::Relation(i));
        }
        Self {
            texts: parts.texts,
            nodes: parts.nodes,
            relations: parts.relations,
            index,
        }
    }
}

impl DocumentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a textual datasource, returning its id
    pub fn add_text(&mut self, text: impl Into<String>) -> ContentId {
        let ds = TextualDs::new(text);
        let id = ds.id;
        self.index.insert(id, Slot::Text(self.texts.len()));
        self.texts.push(ds);
        id
    }

    /// Insert an existing datasource, e.g. one moved from another graph
    pub fn insert_text(&mut self, ds: TextualDs) -> Result<ContentId> {
        if self.contains(&ds.id) {
            return Err(Error::DuplicateContent(ds.id));
        }
        let id = ds.id;
        self.index.insert(id, Slot::Text(self.texts.len()));
        self.texts.push(ds);
        Ok(id)
    }

    /// Add a content node, returning its id
    pub fn add_node(&mut self, node: ContentNode) -> Result<ContentId> {
        if self.contains(&node.id) {
            return Err(Error::DuplicateContent(node.id));
        }
        let id = node.id;
        self.index.insert(id, Slot::Node(self.nodes.len()));
        self.nodes.push(node);
        Ok(id)
    }

    /// Add a relation; both endpoints must already be part of this graph.
    ///
    /// Textual relations must point at a datasource, all others at a node.
    pub fn add_relation(&mut self, relation: Relation) -> Result<ContentId> {
        if self.contains(&relation.id) {
            return Err(Error::DuplicateContent(relation.id));
        }
        if self.node(&relation.source).is_none() {
            return Err(Error::DanglingRelation {
                relation: relation.id,
                endpoint: relation.source,
            });
        }
        let target_known = if relation.is_textual() {
            self.text(&relation.target).is_some()
        } else {
            self.node(&relation.target).is_some()
        };
        if !target_known {
            return Err(Error::DanglingRelation {
                relation: relation.id,
                endpoint: relation.target,
            });
        }
        let id = relation.id;
        self.index.insert(id, Slot::Relation(self.relations.len()));
        self.relations.push(relation);
        Ok(id)
    }

    /// Whether any element of this graph carries the id
    pub fn contains(&self, id: &ContentId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &ContentId) -> Option<&ContentNode> {
        match self.index.get(id) {
            Some(Slot::Node(i)) => self.nodes.get(*i),
            _ => None,
        }
    }

    pub fn text(&self, id: &ContentId) -> Option<&TextualDs> {
        match self.index.get(id) {
            Some(Slot::Text(i)) => self.texts.get(*i),
            _ => None,
        }
    }

    /// Mutable datasource; its id must stay unchanged
    pub fn text_mut(&mut self, id: &ContentId) -> Option<&mut TextualDs> {
        match self.index.get(id) {
            Some(Slot::Text(i)) => self.texts.get_mut(*i),
            _ => None,
        }
    }

    pub fn relation(&self, id: &ContentId) -> Option<&Relation> {
        match self.index.get(id) {
            Some(Slot::Relation(i)) => self.relations.get(*i),
            _ => None,
        }
    }

    /// The first datasource, used when texts are concatenated
    pub fn primary_text(&self) -> Option<&TextualDs> {
        self.texts.first()
    }

    pub fn nodes(&self) -> &[ContentNode] {
        &self.nodes
    }

    pub fn texts(&self) -> &[TextualDs] {
        &self.texts
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Mutable relations, e.g. to shift offsets; ids and endpoints must stay
    /// unchanged
    pub fn relations_mut(&mut self) -> &mut [Relation] {
        &mut self.relations
    }

    /// Textual relations anchored to the given datasource
    pub fn textual_relations(&self, datasource: &ContentId) -> impl Iterator<Item = &Relation> {
        let datasource = *datasource;
        self.relations
            .iter()
            .filter(move |r| r.is_textual() && r.target == datasource)
    }

    /// Covered text of a node, via its first textual relation
    pub fn covered_text(&self, node: &ContentId) -> Option<String> {
        let relation = self
            .relations
            .iter()
            .find(|r| r.is_textual() && &r.source == node)?;
        let (start, end) = relation.range()?;
        let ds = self.text(&relation.target)?;
        Some(ds.text.chars().skip(start).take(end.saturating_sub(start)).collect())
    }

    /// Remove and return all content nodes
    pub fn drain_nodes(&mut self) -> Vec<ContentNode> {
        self.index.retain(|_, slot| !matches!(slot, Slot::Node(_)));
        std::mem::take(&mut self.nodes)
    }

    /// Remove and return all datasources
    pub fn drain_texts(&mut self) -> Vec<TextualDs> {
        self.index.retain(|_, slot| !matches!(slot, Slot::Text(_)));
        std::mem::take(&mut self.texts)
    }

    /// Remove and return all relations
    pub fn drain_relations(&mut self) -> Vec<Relation> {
        self.index.retain(|_, slot| !matches!(slot, Slot::Relation(_)));
        std::mem::take(&mut self.relations)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.texts.is_empty() && self.relations.is_empty()
    }

    /// Check that ids are unique and every relation endpoint exists
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for id in self
            .texts
            .iter()
            .map(|t| t.id)
            .chain(self.nodes.iter().map(|n| n.id))
            .chain(self.relations.iter().map(|r| r.id))
        {
            if !seen.insert(id) {
                return Err(Error::DuplicateContent(id));
            }
        }
        for relation in &self.relations {
            let source_ok = self.node(&relation.source).is_some();
            let target_ok = if relation.is_textual() {
                self.text(&relation.target).is_some()
            } else {
                self.node(&relation.target).is_some()
            };
            if !source_ok || !target_ok {
                return Err(Error::DanglingRelation {
                    relation: relation.id,
                    endpoint: if source_ok { relation.target } else { relation.source },
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covered_text() {
        let mut graph = DocumentGraph::new();
        let ds = graph.add_text("Grüße aus Berlin");
        let tok = graph.add_node(ContentNode::token()).unwrap();
        graph.add_relation(Relation::textual(tok, ds, 10, 16)).unwrap();

        assert_eq!(graph.covered_text(&tok).as_deref(), Some("Berlin"));
    }

    #[test]
    fn test_relation_requires_endpoints() {
        let mut graph = DocumentGraph::new();
        let tok = graph.add_node(ContentNode::token()).unwrap();
        let missing = ContentId::new();

        let err = graph
            .add_relation(Relation::textual(tok, missing, 0, 1))
            .unwrap_err();
        assert!(matches!(err, Error::DanglingRelation { endpoint, .. } if endpoint == missing));

        // a textual relation cannot target a content node
        let other = graph.add_node(ContentNode::span()).unwrap();
        assert!(graph.add_relation(Relation::textual(tok, other, 0, 1)).is_err());
        assert!(graph
            .add_relation(Relation::new(RelationKind::Spanning, other, tok))
            .is_ok());
    }

    #[test]
    fn test_duplicate_content_rejected() {
        let mut graph = DocumentGraph::new();
        let node = ContentNode::token();
        graph.add_node(node.clone()).unwrap();
        assert!(matches!(graph.add_node(node), Err(Error::DuplicateContent(_))));
    }

    #[test]
    fn test_index_rebuilt_on_load() {
        let mut graph = DocumentGraph::new();
        let ds = graph.add_text("abc");
        let tok = graph.add_node(ContentNode::token()).unwrap();
        let rel = graph.add_relation(Relation::textual(tok, ds, 0, 3)).unwrap();

        let json = serde_json::to_value(&graph).unwrap();
        assert!(json.get("index").is_none());
        let mut loaded: DocumentGraph = serde_json::from_value(json).unwrap();
        assert_eq!(loaded, graph);
        assert!(loaded.node(&tok).is_some());
        assert!(loaded.text(&ds).is_some());
        assert_eq!(loaded.relation(&rel).and_then(Relation::range), Some((0, 3)));

        // lookups are typed: a node id is not a datasource
        assert!(loaded.text(&tok).is_none());
        let span = loaded.add_node(ContentNode::span()).unwrap();
        assert!(loaded
            .add_relation(Relation::new(RelationKind::Spanning, span, tok))
            .is_ok());
    }

    #[test]
    fn test_drained_content_leaves_index() {
        let mut graph = DocumentGraph::new();
        let ds = graph.add_text("abc");
        let node = ContentNode::token();
        let tok = graph.add_node(node.clone()).unwrap();
        graph.add_relation(Relation::textual(tok, ds, 0, 3)).unwrap();

        let relations = graph.drain_relations();
        let nodes = graph.drain_nodes();
        assert_eq!(relations.len(), 1);
        assert_eq!(nodes.len(), 1);
        assert!(graph.node(&tok).is_none());
        assert!(!graph.contains(&relations[0].id));
        assert!(graph.text(&ds).is_some());

        // moving the same content back in is not a duplicate
        graph.add_node(node).unwrap();
        graph.add_relation(relations[0].clone()).unwrap();
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_large_graph_inserts() {
        let mut graph = DocumentGraph::new();
        let ds = graph.add_text("x".repeat(50_000));
        for i in 0..50_000 {
            let tok = graph.add_node(ContentNode::token()).unwrap();
            graph.add_relation(Relation::textual(tok, ds, i, i + 1)).unwrap();
        }
        assert_eq!(graph.node_count(), 50_000);
        assert_eq!(graph.relation_count(), 50_000);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_shift_only_touches_textual() {
        let mut textual = Relation::textual(ContentId::new(), ContentId::new(), 0, 3);
        textual.shift(4);
        assert_eq!(textual.range(), Some((4, 7)));

        let mut pointing = Relation::new(RelationKind::Pointing, ContentId::new(), ContentId::new());
        pointing.shift(4);
        assert_eq!(pointing.kind, RelationKind::Pointing);
    }

    #[test]
    fn test_validate_detects_dangling() {
        let json = serde_json::json!({
            "nodes": [{ "id": "6f1c2a52-3d64-4a8f-9a43-5e1f0e0d4b11", "kind": "token" }],
            "relations": [{
                "id": "0b9d0f8e-1e57-4d0e-8f55-1c1a1b1c1d1e",
                "source": "6f1c2a52-3d64-4a8f-9a43-5e1f0e0d4b11",
                "target": "d3b07384-d9a0-4c9b-8f1e-2b3c4d5e6f70",
                "kind": { "type": "textual", "start": 0, "end": 2 }
            }]
        });
        let graph: DocumentGraph = serde_json::from_value(json).unwrap();
        assert!(graph.validate().is_err());
    }
}
