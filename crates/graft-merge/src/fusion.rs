//! Graph fusion: combine the document graphs of one group into its target
//!
//! Content moves between graphs, it is never copied: after fusion every
//! non-target member is an empty husk waiting to be removed from its
//! structure.

use crate::config::FusionMode;
use crate::error::Result;
use crate::resolver::GroupId;
use graft_core::{ContentId, ContentNode, CorpusNode, DocumentGraph, Identifier, Relation, TextualDs};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator placed between the texts of two appended documents
pub const APPEND_SEPARATOR: char = '\n';

/// One released group, resolved to live nodes
#[derive(Clone)]
pub struct FusionBatch {
    pub group: GroupId,
    pub key: String,
    /// Members in canonical group order; may or may not include the target
    pub members: Vec<Arc<CorpusNode>>,
    pub target: Arc<CorpusNode>,
}

impl FusionBatch {
    /// Members other than the target, in group order
    pub fn absorbed(&self) -> impl Iterator<Item = &Arc<CorpusNode>> {
        let target = self.target.id();
        self.members.iter().filter(move |m| m.id() != target)
    }
}

/// What one fusion did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusionReport {
    pub group: GroupId,
    pub key: String,
    pub target: Identifier,
    /// Members whose content was moved into the target
    pub absorbed: Vec<Identifier>,
    pub moved_nodes: usize,
    pub moved_relations: usize,
    pub meta_copied: usize,
    pub dropped_datasources: usize,
}

impl FusionReport {
    fn new(batch: &FusionBatch) -> Self {
        Self {
            group: batch.group,
            key: batch.key.clone(),
            target: batch.target.id(),
            absorbed: batch.absorbed().map(|m| m.id()).collect(),
            moved_nodes: 0,
            moved_relations: 0,
            meta_copied: 0,
            dropped_datasources: 0,
        }
    }
}

/// Running text of an append merge
#[derive(Debug, Default)]
struct TextAccumulator {
    text: String,
    chars: usize,
    started: bool,
}

impl TextAccumulator {
    /// Append one member's text, returning the character offset it lands at
    fn push(&mut self, text: &str) -> usize {
        if self.started {
            self.text.push(APPEND_SEPARATOR);
            self.chars += 1;
        }
        self.started = true;
        let offset = self.chars;
        self.text.push_str(text);
        self.chars += text.chars().count();
        offset
    }
}

/// Content taken out of a member's graph
struct Drained {
    texts: Vec<TextualDs>,
    nodes: Vec<ContentNode>,
    relations: Vec<Relation>,
}

fn drain(member: &CorpusNode) -> Drained {
    let mut guard = member.graph_mut();
    match guard.as_mut() {
        Some(graph) => Drained {
            texts: graph.drain_texts(),
            nodes: graph.drain_nodes(),
            relations: graph.drain_relations(),
        },
        None => Drained {
            texts: Vec::new(),
            nodes: Vec::new(),
            relations: Vec::new(),
        },
    }
}

/// Fuses released groups into their targets
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphFusionEngine {
    mode: FusionMode,
}

impl GraphFusionEngine {
    pub fn new(mode: FusionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    /// Fuse all members of the batch into its target
    pub fn fuse(&self, batch: &FusionBatch) -> Result<FusionReport> {
        let report = match self.mode {
            FusionMode::Structural => self.fuse_structural(batch)?,
            FusionMode::Append => self.fuse_append(batch)?,
        };
        debug!(
            group = %batch.key,
            mode = %self.mode,
            absorbed = report.absorbed.len(),
            nodes = report.moved_nodes,
            relations = report.moved_relations,
            "Fused group"
        );
        Ok(report)
    }

    /// Union of graph structure; the target keeps its own text and meta
    /// values and acts as the accumulator, so it is handled last.
    fn fuse_structural(&self, batch: &FusionBatch) -> Result<FusionReport> {
        let mut report = FusionReport::new(batch);

        for member in batch.absorbed() {
            let drained = drain(member);

            {
                let mut guard = batch.target.graph_mut();
                let graph = guard.get_or_insert_with(DocumentGraph::new);

                let mut unified: HashMap<ContentId, ContentId> = HashMap::new();
                for ds in drained.texts {
                    let same = graph.texts().iter().find(|t| t.text == ds.text).map(|t| t.id);
                    match same {
                        Some(existing) => {
                            unified.insert(ds.id, existing);
                        }
                        None => {
                            graph.insert_text(ds)?;
                        }
                    }
                }

                for node in drained.nodes {
                    graph.add_node(node)?;
                    report.moved_nodes += 1;
                }
                for mut relation in drained.relations {
                    if relation.is_textual() {
                        if let Some(existing) = unified.get(&relation.target) {
                            relation.target = *existing;
                        }
                    }
                    graph.add_relation(relation)?;
                    report.moved_relations += 1;
                }
            }

            report.meta_copied += batch.target.meta_mut().absorb(&mut member.meta_mut());
        }

        Ok(report)
    }

    /// Concatenation of the members' primary texts in group order
    fn fuse_append(&self, batch: &FusionBatch) -> Result<FusionReport> {
        let mut report = FusionReport::new(batch);
        let mut accumulated = TextAccumulator::default();
        let target_id = batch.target.id();

        // created on demand when the target has no text of its own
        let mut target_ds: Option<ContentId> = batch
            .target
            .graph()
            .as_ref()
            .and_then(|g| g.primary_text())
            .map(|ds| ds.id);
        let target_has_text = target_ds.is_some();
        // relations the target owned before anything was moved in
        let own: HashSet<ContentId> = match (batch.target.graph().as_ref(), target_ds) {
            (Some(graph), Some(ds)) => graph.textual_relations(&ds).map(|r| r.id).collect(),
            _ => HashSet::new(),
        };

        for member in &batch.members {
            if member.id() == target_id {
                let Some(ds) = target_ds.filter(|_| target_has_text) else {
                    continue;
                };
                let mut guard = batch.target.graph_mut();
                let graph = guard.get_or_insert_with(DocumentGraph::new);
                warn_extra_texts(member, graph.texts().len());
                let text = graph.text(&ds).map(|ds| ds.text.clone()).unwrap_or_default();
                let offset = accumulated.push(&text);
                if offset > 0 {
                    for relation in graph.relations_mut() {
                        if own.contains(&relation.id) {
                            relation.shift(offset);
                        }
                    }
                }
                continue;
            }

            let mut drained = drain(member);
            warn_extra_texts(member, drained.texts.len());
            report.dropped_datasources += drained.texts.len().saturating_sub(1);

            let primary = if drained.texts.is_empty() {
                None
            } else {
                let ds = drained.texts.swap_remove(0);
                Some((ds.id, accumulated.push(&ds.text)))
            };

            let mut guard = batch.target.graph_mut();
            let graph = guard.get_or_insert_with(DocumentGraph::new);
            let anchor = match primary {
                Some(_) => Some(*target_ds.get_or_insert_with(|| graph.add_text(String::new()))),
                None => None,
            };
            for node in drained.nodes {
                graph.add_node(node)?;
                report.moved_nodes += 1;
            }
            for mut relation in drained.relations {
                if relation.is_textual() {
                    match (primary, anchor) {
                        (Some((ds, offset)), Some(anchor)) if relation.target == ds => {
                            relation.target = anchor;
                            relation.shift(offset);
                        }
                        // anchored to a dropped datasource
                        _ => continue,
                    }
                }
                graph.add_relation(relation)?;
                report.moved_relations += 1;
            }
        }

        if let Some(id) = target_ds {
            if let Some(ds) = batch.target.graph_mut().as_mut().and_then(|g| g.text_mut(&id)) {
                ds.text = accumulated.text;
            }
        }

        Ok(report)
    }
}

fn warn_extra_texts(member: &CorpusNode, count: usize) {
    if count > 1 {
        warn!(
            document = %member.global_id(),
            texts = count,
            "Appending only works for documents with a single text, only the first one is merged"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{CorpusStructure, QName, RelationKind};

    struct Fixture {
        structures: Vec<CorpusStructure>,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            Self {
                structures: (0..count).map(|i| CorpusStructure::new(format!("s{}", i))).collect(),
            }
        }

        /// A document holding `text` with one token per word
        fn document(&self, structure: usize, text: &str) -> Arc<CorpusNode> {
            let (doc, _) = self.structures[structure].ensure_document_path("c/d").unwrap();
            if !text.is_empty() {
                let mut graph = DocumentGraph::new();
                let ds = graph.add_text(text);
                let mut start = 0;
                for word in text.split(' ') {
                    let end = start + word.chars().count();
                    let token = graph.add_node(ContentNode::token()).unwrap();
                    graph.add_relation(Relation::textual(token, ds, start, end)).unwrap();
                    start = end + 1;
                }
                doc.set_graph(graph).unwrap();
            }
            doc
        }
    }

    fn batch(members: &[Arc<CorpusNode>], target: &Arc<CorpusNode>) -> FusionBatch {
        FusionBatch {
            group: GroupId::default(),
            key: "c/d".to_string(),
            members: members.to_vec(),
            target: target.clone(),
        }
    }

    fn covered(doc: &CorpusNode) -> Vec<String> {
        let guard = doc.graph();
        let graph = guard.as_ref().unwrap();
        graph.nodes().iter().filter_map(|n| graph.covered_text(&n.id)).collect()
    }

    #[test]
    fn test_append_concatenates_with_separator() {
        let fx = Fixture::new(3);
        let docs: Vec<_> = ["foo", "bar", "baz"]
            .iter()
            .enumerate()
            .map(|(i, text)| fx.document(i, text))
            .collect();

        let report = GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &docs[0]))
            .unwrap();

        let guard = docs[0].graph();
        let graph = guard.as_ref().unwrap();
        assert_eq!(graph.texts().len(), 1);
        assert_eq!(graph.primary_text().unwrap().text, "foo\nbar\nbaz");

        let ranges: Vec<_> = graph.relations().iter().filter_map(Relation::range).collect();
        assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 11)]);
        drop(guard);

        assert_eq!(covered(&docs[0]), vec!["foo", "bar", "baz"]);
        assert_eq!(report.absorbed, vec![docs[1].id(), docs[2].id()]);
        assert_eq!(report.moved_nodes, 2);
        assert!(docs[1].graph().as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_append_offsets_count_characters() {
        let fx = Fixture::new(2);
        let docs = vec![fx.document(0, "Straße"), fx.document(1, "groß klein")];

        GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &docs[0]))
            .unwrap();

        assert_eq!(covered(&docs[0]), vec!["Straße", "groß", "klein"]);
    }

    #[test]
    fn test_append_drops_extra_datasources() {
        let fx = Fixture::new(2);
        let first = fx.document(0, "one");
        let second = fx.document(1, "two");
        {
            let mut guard = second.graph_mut();
            let graph = guard.as_mut().unwrap();
            let extra = graph.add_text("ignored");
            let token = graph.add_node(ContentNode::token()).unwrap();
            graph.add_relation(Relation::textual(token, extra, 0, 7)).unwrap();
        }
        let docs = vec![first.clone(), second];

        let report = GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &first))
            .unwrap();

        assert_eq!(report.dropped_datasources, 1);
        let guard = first.graph();
        let graph = guard.as_ref().unwrap();
        assert_eq!(graph.texts().len(), 1);
        assert_eq!(graph.primary_text().unwrap().text, "one\ntwo");
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_append_into_synthesized_target() {
        let fx = Fixture::new(3);
        let target = fx.document(0, "");
        let docs = vec![fx.document(1, "ab"), fx.document(2, "cd")];

        GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &target))
            .unwrap();

        assert_eq!(target.graph().as_ref().unwrap().primary_text().unwrap().text, "ab\ncd");
        assert_eq!(covered(&target), vec!["ab", "cd"]);
    }

    #[test]
    fn test_append_textless_target_in_the_middle() {
        let fx = Fixture::new(3);
        let target = fx.document(0, "");
        let docs = vec![fx.document(1, "ab"), target.clone(), fx.document(2, "cd")];

        GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &target))
            .unwrap();

        assert_eq!(target.graph().as_ref().unwrap().primary_text().unwrap().text, "ab\ncd");
        assert_eq!(covered(&target), vec!["ab", "cd"]);
    }

    #[test]
    fn test_append_without_text_adds_no_datasource() {
        let fx = Fixture::new(3);
        let target = fx.document(0, "");
        let members: Vec<_> = (1..3)
            .map(|i| {
                let doc = fx.document(i, "");
                let mut graph = DocumentGraph::new();
                graph.add_node(ContentNode::span().with_annotation("cat", "S")).unwrap();
                doc.set_graph(graph).unwrap();
                doc
            })
            .collect();

        let report = GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&members, &target))
            .unwrap();

        assert_eq!(report.moved_nodes, 2);
        let guard = target.graph();
        let graph = guard.as_ref().unwrap();
        assert!(graph.texts().is_empty());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_append_target_not_first_is_shifted() {
        let fx = Fixture::new(2);
        let first = fx.document(1, "head");
        let target = fx.document(0, "tail");
        let docs = vec![first, target.clone()];

        GraphFusionEngine::new(FusionMode::Append)
            .fuse(&batch(&docs, &target))
            .unwrap();

        let guard = target.graph();
        let graph = guard.as_ref().unwrap();
        assert_eq!(graph.primary_text().unwrap().text, "head\ntail");
        let mut ranges: Vec<_> = graph.relations().iter().filter_map(Relation::range).collect();
        ranges.sort();
        assert_eq!(ranges, vec![(0, 4), (5, 9)]);
    }

    #[test]
    fn test_structural_keeps_target_text_and_moves_nodes() {
        let fx = Fixture::new(2);
        let target = fx.document(0, "same text");
        let other = fx.document(1, "same text");
        {
            let mut guard = other.graph_mut();
            let graph = guard.as_mut().unwrap();
            let tokens: Vec<ContentId> = graph.nodes().iter().map(|n| n.id).collect();
            let span = graph.add_node(ContentNode::span().with_annotation("cat", "NP")).unwrap();
            for token in tokens {
                graph.add_relation(Relation::new(RelationKind::Spanning, span, token)).unwrap();
            }
        }

        let report = GraphFusionEngine::new(FusionMode::Structural)
            .fuse(&batch(&[target.clone(), other.clone()], &target))
            .unwrap();

        assert_eq!(report.moved_nodes, 3);
        assert_eq!(report.moved_relations, 4);
        let guard = target.graph();
        let graph = guard.as_ref().unwrap();
        // identical text is unified with the target's datasource
        assert_eq!(graph.texts().len(), 1);
        assert_eq!(graph.node_count(), 5);
        assert!(graph.validate().is_ok());
        assert!(other.graph().as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_structural_moves_differing_datasource() {
        let fx = Fixture::new(2);
        let target = fx.document(0, "first");
        let other = fx.document(1, "second");

        GraphFusionEngine::new(FusionMode::Structural)
            .fuse(&batch(&[target.clone(), other], &target))
            .unwrap();

        let guard = target.graph();
        let graph = guard.as_ref().unwrap();
        assert_eq!(graph.texts().len(), 2);
        assert_eq!(graph.primary_text().unwrap().text, "first");
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_structural_meta_first_wins() {
        let fx = Fixture::new(3);
        let target = fx.document(0, "x");
        let second = fx.document(1, "x");
        let third = fx.document(2, "x");
        target.annotate(Some("ns"), "k", "A");
        second.annotate(Some("ns"), "k", "B");
        second.annotate(Some("ns"), "only-second", "2");
        third.annotate(Some("ns"), "only-second", "3");
        third.annotate(None, "plain", "p");

        let report = GraphFusionEngine::new(FusionMode::Structural)
            .fuse(&batch(&[target.clone(), second, third], &target))
            .unwrap();

        let meta = target.meta();
        assert_eq!(meta.get(&QName::new(Some("ns"), "k")), Some("A"));
        assert_eq!(meta.get(&QName::new(Some("ns"), "only-second")), Some("2"));
        assert_eq!(meta.get(&QName::new(None, "plain")), Some("p"));
        assert_eq!(report.meta_copied, 2);
    }
}
