//! Placeholders in the base structure for groups without a base member

use crate::error::{MergeError, Result};
use crate::resolver::{GroupId, GroupIndex};
use graft_core::{CorpusStructure, NodeRole, PATH_SEPARATOR};
use tracing::{debug, error};

/// Creates the skeleton nodes a group needs in the base structure
pub struct StructureSynthesizer<'a> {
    base: &'a CorpusStructure,
}

impl<'a> StructureSynthesizer<'a> {
    pub fn new(base: &'a CorpusStructure) -> Self {
        Self { base }
    }

    /// Give every group a target, creating nodes in the base structure where
    /// necessary. Returns the number of nodes created.
    ///
    /// Corpus groups are handled before document groups and shallow paths
    /// before deep ones, so a corpus created for one group is found again
    /// when a deeper group needs it as parent.
    pub fn synthesize(&self, index: &mut GroupIndex) -> Result<usize> {
        let mut pending: Vec<(GroupId, NodeRole, String)> = index
            .groups()
            .iter()
            .filter(|g| g.target().is_none())
            .map(|g| (g.id(), g.role(), g.key().to_string()))
            .collect();
        pending.sort_by_key(|(id, role, key)| {
            (
                *role == NodeRole::Document,
                key.matches(PATH_SEPARATOR).count(),
                *id,
            )
        });

        let mut created = 0;
        for (id, role, key) in pending {
            let (node, count) = match role {
                NodeRole::Corpus => self.base.ensure_corpus_path(&key)?,
                NodeRole::Document => self.base.ensure_document_path(&key)?,
            };

            // a node found at the path may belong to another group, e.g. the
            // first member of a manual mapping sitting in the base already
            if count == 0 {
                if let Some(owner) = index.group_of(&node.id()) {
                    if owner.id() != id {
                        let err = MergeError::PathConflict {
                            path: key,
                            claimed_by: owner.key().to_string(),
                        };
                        error!(error = %err, "Cannot synthesize base node");
                        return Err(err);
                    }
                }
            }

            debug!(group = %key, node = %node.global_id(), created = count, "Synthesized base node");
            index.set_target(id, node.id(), true);
            created += count;
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentMapping;
    use crate::resolver::GroupResolver;
    use graft_core::Project;

    #[test]
    fn test_synthesizes_missing_document_and_corpora() {
        let project = Project::new();
        let base = project.add_structure(CorpusStructure::new("base"));
        base.ensure_document_path("c1/d1").unwrap();
        let other = project.add_structure(CorpusStructure::new("other"));
        other.ensure_document_path("c1/d1").unwrap();
        other.ensure_document_path("c1/sub/d2").unwrap();

        let mut index = GroupResolver::new(&project, base.id(), &[]).resolve().unwrap().unwrap();
        let created = StructureSynthesizer::new(&base).synthesize(&mut index).unwrap();

        // corpus c1/sub and document c1/sub/d2
        assert_eq!(created, 2);
        for group in index.groups() {
            let target = group.target().unwrap();
            assert_eq!(target.structure(), base.id());
            assert_eq!(base.node(&target).unwrap().path(), group.key());
        }
        let d2 = index.group_by_key(NodeRole::Document, "c1/sub/d2").unwrap();
        assert!(d2.is_synthesized());
        assert!(!d2.contains(&d2.target().unwrap()));
        let d1 = index.group_by_key(NodeRole::Document, "c1/d1").unwrap();
        assert!(!d1.is_synthesized());
    }

    #[test]
    fn test_synthesized_document_has_empty_graph() {
        let project = Project::new();
        let base = project.add_structure(CorpusStructure::new("base"));
        base.add_root_corpus("c").unwrap();
        let other = project.add_structure(CorpusStructure::new("other"));
        other.ensure_document_path("c/d").unwrap();

        let mut index = GroupResolver::new(&project, base.id(), &[]).resolve().unwrap().unwrap();
        StructureSynthesizer::new(&base).synthesize(&mut index).unwrap();

        let node = base.node_by_path("c/d").unwrap();
        assert!(node.is_document());
        assert!(node.graph().as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_path_claimed_by_other_group_is_conflict() {
        let project = Project::new();
        let base = project.add_structure(CorpusStructure::new("base"));
        base.ensure_document_path("c/a").unwrap();
        let other = project.add_structure(CorpusStructure::new("other"));
        other.ensure_document_path("c/y").unwrap();
        other.ensure_document_path("c/a").unwrap();

        // the base's c/a is claimed by the manual group keyed "c/y", while
        // other's c/a forms an implicit group that needs a base node at c/a
        let mappings = vec![DocumentMapping::new("merged", ["y", "a"])];
        let mut index = GroupResolver::new(&project, base.id(), &mappings)
            .resolve()
            .unwrap()
            .unwrap();

        let err = StructureSynthesizer::new(&base).synthesize(&mut index).unwrap_err();
        assert!(matches!(err, MergeError::PathConflict { ref path, ref claimed_by }
            if path == "c/a" && claimed_by == "c/y"));
    }
}
