//! Serializable form of a corpus structure
//!
//! Snapshots are plain nested trees; identifiers are not persisted and are
//! allocated afresh when a snapshot is turned back into a structure.

use crate::error::{Error, Result};
use crate::graph::DocumentGraph;
use crate::meta::MetaAnnotations;
use crate::structure::{CorpusNode, CorpusStructure};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A whole structure: its name and root corpora
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub name: String,
    #[serde(default)]
    pub corpora: Vec<CorpusSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "MetaAnnotations::is_empty")]
    pub meta: MetaAnnotations,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corpora: Vec<CorpusSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<DocumentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "MetaAnnotations::is_empty")]
    pub meta: MetaAnnotations,
    #[serde(default)]
    pub graph: DocumentGraph,
}

impl StructureSnapshot {
    /// Capture the current state of a structure
    pub fn capture(structure: &CorpusStructure) -> Self {
        Self {
            name: structure.name().to_string(),
            corpora: structure
                .roots()
                .iter()
                .filter(|n| n.is_corpus())
                .map(|n| CorpusSnapshot::capture(structure, n))
                .collect(),
        }
    }

    /// Build a new structure from this snapshot
    pub fn into_structure(self) -> Result<CorpusStructure> {
        let structure = CorpusStructure::new(self.name);
        for corpus in self.corpora {
            let root = structure.add_root_corpus(&corpus.name)?;
            corpus.populate(&structure, &root)?;
        }
        Ok(structure)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl CorpusSnapshot {
    fn capture(structure: &CorpusStructure, corpus: &Arc<CorpusNode>) -> Self {
        let children = structure.children(&corpus.id());
        Self {
            name: corpus.name(),
            meta: corpus.meta().clone(),
            corpora: children
                .iter()
                .filter(|n| n.is_corpus())
                .map(|n| CorpusSnapshot::capture(structure, n))
                .collect(),
            documents: children
                .iter()
                .filter(|n| n.is_document())
                .map(|n| DocumentSnapshot {
                    name: n.name(),
                    meta: n.meta().clone(),
                    graph: n.graph().clone().unwrap_or_default(),
                })
                .collect(),
        }
    }

    fn populate(self, structure: &CorpusStructure, node: &Arc<CorpusNode>) -> Result<()> {
        copy_meta(node, self.meta);
        for document in self.documents {
            document.graph.validate()?;
            let created = structure.add_document(&node.id(), &document.name)?;
            copy_meta(&created, document.meta);
            created.set_graph(document.graph)?;
        }
        for corpus in self.corpora {
            let created = structure.add_sub_corpus(&node.id(), &corpus.name)?;
            corpus.populate(structure, &created)?;
        }
        Ok(())
    }
}

fn copy_meta(node: &CorpusNode, meta: MetaAnnotations) {
    let mut target = node.meta_mut();
    for annotation in meta.iter() {
        target.insert(annotation.clone());
    }
}
