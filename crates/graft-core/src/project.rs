//! Project - the set of corpus structures taking part in a run

use crate::id::{Identifier, StructureId};
use crate::structure::{CorpusNode, CorpusStructure};
use parking_lot::RwLock;
use std::sync::Arc;

/// Ordered collection of corpus structures
pub struct Project {
    structures: RwLock<Vec<Arc<CorpusStructure>>>,
}

impl Project {
    pub fn new() -> Self {
        Self {
            structures: RwLock::new(Vec::new()),
        }
    }

    /// Append a structure, keeping insertion order
    pub fn add_structure(&self, structure: CorpusStructure) -> Arc<CorpusStructure> {
        let structure = Arc::new(structure);
        self.structures.write().push(structure.clone());
        structure
    }

    pub fn structures(&self) -> Vec<Arc<CorpusStructure>> {
        self.structures.read().clone()
    }

    pub fn structure(&self, id: StructureId) -> Option<Arc<CorpusStructure>> {
        self.structures.read().iter().find(|s| s.id() == id).cloned()
    }

    /// Structure at the given position
    pub fn structure_at(&self, index: usize) -> Option<Arc<CorpusStructure>> {
        self.structures.read().get(index).cloned()
    }

    /// Look up a corpus or document node across all structures
    pub fn node(&self, id: &Identifier) -> Option<Arc<CorpusNode>> {
        self.structure(id.structure()).and_then(|s| s.node(id))
    }

    pub fn remove_structure(&self, id: StructureId) -> Option<Arc<CorpusStructure>> {
        let mut structures = self.structures.write();
        let position = structures.iter().position(|s| s.id() == id)?;
        Some(structures.remove(position))
    }

    pub fn len(&self) -> usize {
        self.structures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.read().is_empty()
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}
