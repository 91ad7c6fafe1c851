//! Group resolution: which nodes of which structures denote the same entity
//!
//! Manual mappings are applied first; every remaining corpus and document
//! is grouped by its path. The resulting [`GroupIndex`] also carries the
//! import order each producer is asked to follow: documents of large groups
//! first, so the gate holds as few incomplete groups as possible.

use crate::config::DocumentMapping;
use crate::error::Result;
use graft_core::{CorpusNode, Identifier, NodeRole, Project, StructureId};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Position of a group in the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

impl GroupId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Set of nodes from different structures that fuse into one
#[derive(Debug, Clone)]
pub struct MergeGroup {
    id: GroupId,
    key: String,
    role: NodeRole,
    members: Vec<Identifier>,
    /// Target name of a manual mapping
    mapped_name: Option<String>,
    target: Option<Identifier>,
    synthesized: bool,
}

impl MergeGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Path shared by the group, the path of the first member for manual groups.
    ///
    /// Unmapped documents at the path of any member of a manual group join
    /// that group.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Members in canonical order: mapping order or discovery order
    pub fn members(&self) -> &[Identifier] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn mapped_name(&self) -> Option<&str> {
        self.mapped_name.as_deref()
    }

    pub fn is_manual(&self) -> bool {
        self.mapped_name.is_some()
    }

    /// The surviving node in the base structure, once known
    pub fn target(&self) -> Option<Identifier> {
        self.target
    }

    /// Whether the target was created because no member lived in the base
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.members.contains(id)
    }
}

/// Result of group resolution
#[derive(Debug, Clone)]
pub struct GroupIndex {
    base: StructureId,
    groups: Vec<MergeGroup>,
    membership: HashMap<Identifier, GroupId>,
    by_key: HashMap<(NodeRole, String), GroupId>,
    import_order: HashMap<StructureId, Vec<Identifier>>,
}

impl GroupIndex {
    fn new(base: StructureId) -> Self {
        Self {
            base,
            groups: Vec::new(),
            membership: HashMap::new(),
            by_key: HashMap::new(),
            import_order: HashMap::new(),
        }
    }

    pub fn base(&self) -> StructureId {
        self.base
    }

    pub fn groups(&self) -> &[MergeGroup] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&MergeGroup> {
        self.groups.get(id.0)
    }

    /// Group a node belongs to
    pub fn group_of(&self, id: &Identifier) -> Option<&MergeGroup> {
        self.membership.get(id).and_then(|gid| self.groups.get(gid.0))
    }

    pub fn group_by_key(&self, role: NodeRole, key: &str) -> Option<&MergeGroup> {
        self.by_key
            .get(&(role, key.to_string()))
            .and_then(|gid| self.groups.get(gid.0))
    }

    /// Proposed document order for one structure
    pub fn import_order(&self, structure: StructureId) -> Option<&[Identifier]> {
        self.import_order.get(&structure).map(Vec::as_slice)
    }

    pub fn document_groups(&self) -> impl Iterator<Item = &MergeGroup> {
        self.groups.iter().filter(|g| g.role == NodeRole::Document)
    }

    pub fn corpus_groups(&self) -> impl Iterator<Item = &MergeGroup> {
        self.groups.iter().filter(|g| g.role == NodeRole::Corpus)
    }

    /// Size of the largest document group
    pub fn max_group_size(&self) -> usize {
        self.document_groups().map(MergeGroup::len).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub(crate) fn set_target(&mut self, id: GroupId, target: Identifier, synthesized: bool) {
        if let Some(group) = self.groups.get_mut(id.0) {
            group.target = Some(target);
            group.synthesized = synthesized;
        }
    }

    /// One line per group listing its members, for diagnostics
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            let members: Vec<String> = group.members.iter().map(ToString::to_string).collect();
            let _ = write!(out, "{} {} '{}' ({})", group.id, group.role, group.key, members.join(", "));
            if let Some(target) = group.target {
                let _ = write!(out, " -> {}", target);
            }
            out.push_str("; ");
        }
        out
    }

    fn open(&mut self, role: NodeRole, key: String, mapped_name: Option<String>) -> GroupId {
        let id = GroupId(self.groups.len());
        self.claim(role, key.clone(), id);
        self.groups.push(MergeGroup {
            id,
            key,
            role,
            members: Vec::new(),
            mapped_name,
            target: None,
            synthesized: false,
        });
        id
    }

    fn join(&mut self, id: GroupId, node: Identifier) {
        self.membership.insert(node, id);
        if let Some(group) = self.groups.get_mut(id.0) {
            group.members.push(node);
            if group.target.is_none() && node.structure() == self.base {
                group.target = Some(node);
            }
        }
    }

    /// Route unmapped nodes at `key` into the group; the first claim wins
    fn claim(&mut self, role: NodeRole, key: String, id: GroupId) {
        self.by_key.entry((role, key)).or_insert(id);
    }

    fn join_by_key(&mut self, node: &CorpusNode) {
        let key = (node.role(), node.path());
        let id = match self.by_key.get(&key) {
            Some(id) => *id,
            None => self.open(key.0, key.1, None),
        };
        self.join(id, node.id());
    }

    fn compute_import_order(&mut self, structures: &[StructureId]) {
        for structure in structures {
            self.import_order.insert(*structure, Vec::new());
        }

        // stable sort keeps discovery order inside one size bucket
        let mut ordered: Vec<&MergeGroup> = self.document_groups().collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut order: HashMap<StructureId, Vec<Identifier>> = HashMap::new();
        for group in ordered {
            for member in &group.members {
                order.entry(member.structure()).or_default().push(*member);
            }
        }
        self.import_order.extend(order);
    }
}

/// Computes merge groups and the import order
pub struct GroupResolver<'a> {
    project: &'a Project,
    base: StructureId,
    mappings: &'a [DocumentMapping],
}

impl<'a> GroupResolver<'a> {
    pub fn new(project: &'a Project, base: StructureId, mappings: &'a [DocumentMapping]) -> Self {
        Self {
            project,
            base,
            mappings,
        }
    }

    /// Resolve all groups.
    ///
    /// Returns `None` when there is nothing to merge: a single structure and
    /// no manual mapping. Documents then pass through unmerged.
    pub fn resolve(&self) -> Result<Option<GroupIndex>> {
        let structures = self.project.structures();
        if self.mappings.is_empty() && structures.len() <= 1 {
            return Ok(None);
        }

        let mut index = GroupIndex::new(self.base);
        self.apply_mappings(&mut index);

        for structure in &structures {
            for corpus in structure.corpora() {
                if !index.membership.contains_key(&corpus.id()) {
                    index.join_by_key(&corpus);
                }
            }
            for document in structure.documents() {
                if !index.membership.contains_key(&document.id()) {
                    index.join_by_key(&document);
                }
            }
        }

        let ids: Vec<StructureId> = structures.iter().map(|s| s.id()).collect();
        index.compute_import_order(&ids);

        debug!(
            groups = index.len(),
            max_group_size = index.max_group_size(),
            "Resolved merge groups"
        );
        Ok(Some(index))
    }

    fn apply_mappings(&self, index: &mut GroupIndex) {
        if self.mappings.is_empty() {
            return;
        }

        let mut documents_by_name: HashMap<String, Vec<Arc<CorpusNode>>> = HashMap::new();
        for structure in self.project.structures() {
            for document in structure.documents() {
                documents_by_name.entry(document.name()).or_default().push(document);
            }
        }

        for mapping in self.mappings {
            let mut group: Option<GroupId> = None;

            for source in &mapping.sources {
                let candidates = documents_by_name.get(source).map(Vec::as_slice).unwrap_or(&[]);
                let Some(document) = candidates.first() else {
                    warn!(
                        document = %source,
                        target = %mapping.target,
                        "No document found with this name, the mapping entry is ignored"
                    );
                    continue;
                };
                // same-path copies in other structures join through the path
                let path = document.path();
                let ambiguous = candidates.iter().filter(|c| c.path() != path).count();
                if ambiguous > 0 {
                    warn!(
                        document = %source,
                        matches = ambiguous + 1,
                        chosen = %document.global_id(),
                        "More than one document with this name, only the first one is considered"
                    );
                }
                if index.membership.contains_key(&document.id()) {
                    warn!(
                        document = %document.global_id(),
                        target = %mapping.target,
                        "Document is already part of another mapping, the entry is ignored"
                    );
                    continue;
                }

                let id = match group {
                    Some(id) => id,
                    None => {
                        let id = index.open(NodeRole::Document, path.clone(), Some(mapping.target.clone()));
                        group = Some(id);
                        id
                    }
                };
                index.join(id, document.id());
                index.claim(NodeRole::Document, path, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::CorpusStructure;

    fn structure(project: &Project, name: &str, paths: &[&str]) -> Arc<CorpusStructure> {
        let s = project.add_structure(CorpusStructure::new(name));
        for path in paths {
            s.ensure_document_path(path).unwrap();
        }
        s
    }

    #[test]
    fn test_single_structure_without_mapping_is_bypass() {
        let project = Project::new();
        let s = structure(&project, "only", &["c1/d1"]);
        let resolver = GroupResolver::new(&project, s.id(), &[]);
        assert!(resolver.resolve().unwrap().is_none());
    }

    #[test]
    fn test_groups_by_path() {
        let project = Project::new();
        let a = structure(&project, "a", &["c1/c2/d1"]);
        let b = structure(&project, "b", &["c1/c2/d1", "c1/c2/d2", "c1/c3/d3"]);
        let c = structure(&project, "c", &["c1/c3/d3", "c1/c2/d1", "c1/c2/d2"]);

        let index = GroupResolver::new(&project, a.id(), &[]).resolve().unwrap().unwrap();

        let d1 = index.group_by_key(NodeRole::Document, "c1/c2/d1").unwrap();
        assert_eq!(d1.len(), 3);
        assert_eq!(d1.target(), Some(a.node_by_path("c1/c2/d1").unwrap().id()));

        let d3 = index.group_by_key(NodeRole::Document, "c1/c3/d3").unwrap();
        assert_eq!(d3.len(), 2);
        assert_eq!(d3.target(), None);

        // c1, c2, c3 and d1, d2, d3
        assert_eq!(index.len(), 6);
        assert_eq!(index.max_group_size(), 3);

        // every node sits in exactly one group
        for s in [&a, &b, &c] {
            for node in s.nodes() {
                let group = index.group_of(&node.id()).unwrap();
                assert_eq!(group.key(), node.path());
                let occurrences = index.groups().iter().filter(|g| g.contains(&node.id())).count();
                assert_eq!(occurrences, 1);
            }
        }
    }

    #[test]
    fn test_import_order_largest_groups_first() {
        let project = Project::new();
        let a = structure(&project, "a", &["c/solo", "c/pair", "c/all"]);
        let b = structure(&project, "b", &["c/pair", "c/all"]);
        structure(&project, "c", &["c/all"]);

        let index = GroupResolver::new(&project, a.id(), &[]).resolve().unwrap().unwrap();

        let order_a: Vec<String> = index
            .import_order(a.id())
            .unwrap()
            .iter()
            .map(|id| project.node(id).unwrap().name())
            .collect();
        assert_eq!(order_a, vec!["all", "pair", "solo"]);

        let order_b: Vec<String> = index
            .import_order(b.id())
            .unwrap()
            .iter()
            .map(|id| project.node(id).unwrap().name())
            .collect();
        assert_eq!(order_b, vec!["all", "pair"]);
    }

    #[test]
    fn test_manual_mapping_first_source_is_target() {
        let project = Project::new();
        let s = structure(&project, "s", &["c/part1", "c/part2", "c/other"]);
        let mappings = vec![DocumentMapping::new("whole", ["part1", "part2"])];

        let index = GroupResolver::new(&project, s.id(), &mappings).resolve().unwrap().unwrap();

        let part1 = s.node_by_path("c/part1").unwrap().id();
        let part2 = s.node_by_path("c/part2").unwrap().id();
        let group = index.group_of(&part2).unwrap();
        assert!(group.is_manual());
        assert_eq!(group.mapped_name(), Some("whole"));
        assert_eq!(group.members(), &[part1, part2]);
        assert_eq!(group.target(), Some(part1));

        let other = s.node_by_path("c/other").unwrap().id();
        assert_eq!(index.group_of(&other).unwrap().len(), 1);
        assert_eq!(index.import_order(s.id()).unwrap(), &[part1, part2, other]);
    }

    #[test]
    fn test_ambiguous_name_uses_first_match() {
        let project = Project::new();
        let s = structure(&project, "s", &["a/d1", "b/d1", "a/d2"]);
        let mappings = vec![DocumentMapping::new("t", ["d1", "d2"])];

        let index = GroupResolver::new(&project, s.id(), &mappings).resolve().unwrap().unwrap();

        let first = s.node_by_path("a/d1").unwrap().id();
        let second = s.node_by_path("b/d1").unwrap().id();
        let group = index.group_of(&first).unwrap();
        assert_eq!(group.len(), 2);
        assert!(!group.contains(&second));

        // the ignored document stays on its own
        let own = index.group_of(&second).unwrap();
        assert_eq!(own.members(), &[second]);
        assert!(!own.is_manual());
    }

    #[test]
    fn test_unmatched_source_skipped() {
        let project = Project::new();
        let s = structure(&project, "s", &["c/d1"]);
        let mappings = vec![DocumentMapping::new("t", ["missing", "d1"])];

        let index = GroupResolver::new(&project, s.id(), &mappings).resolve().unwrap().unwrap();
        let d1 = s.node_by_path("c/d1").unwrap().id();
        let group = index.group_of(&d1).unwrap();
        assert!(group.is_manual());
        assert_eq!(group.members(), &[d1]);
    }

    #[test]
    fn test_unmapped_same_path_joins_manual_group() {
        let project = Project::new();
        let a = structure(&project, "a", &["c/d1", "c/d2"]);
        let b = structure(&project, "b", &["c/d1"]);
        let mappings = vec![DocumentMapping::new("t", ["d1"])];

        let index = GroupResolver::new(&project, a.id(), &mappings).resolve().unwrap().unwrap();
        let in_a = a.node_by_path("c/d1").unwrap().id();
        let in_b = b.node_by_path("c/d1").unwrap().id();

        let group = index.group_of(&in_b).unwrap();
        assert!(group.is_manual());
        assert_eq!(group.members(), &[in_a, in_b]);
        assert_eq!(group.target(), Some(in_a));
    }

    #[test]
    fn test_mapping_claims_every_member_path() {
        let project = Project::new();
        let a = structure(&project, "a", &["c/part1", "c/part2"]);
        let b = structure(&project, "b", &["c/part1", "c/part2"]);
        let mappings = vec![DocumentMapping::new("full", ["part1", "part2"])];

        let index = GroupResolver::new(&project, a.id(), &mappings).resolve().unwrap().unwrap();

        fn id(s: &CorpusStructure, path: &str) -> Identifier {
            s.node_by_path(path).unwrap().id()
        }
        let group = index.group_of(&id(&a, "c/part1")).unwrap();
        assert_eq!(
            group.members(),
            &[id(&a, "c/part1"), id(&a, "c/part2"), id(&b, "c/part1"), id(&b, "c/part2")]
        );
        assert_eq!(group.target(), Some(id(&a, "c/part1")));

        // the corpus c and the manual group
        assert_eq!(index.len(), 2);
        assert_eq!(index.document_groups().count(), 1);
        assert_eq!(index.max_group_size(), 4);
    }
}
