//! Graft Core - corpus structures and document graphs
//!
//! This crate provides the data model the merge engine works on:
//! - Corpus structures: trees of corpora and documents, one per producer
//! - Document graphs: content nodes, relations and textual datasources
//! - Meta-annotations keyed by qualified name
//! - The project holding all structures of a run

pub mod error;
pub mod graph;
pub mod id;
pub mod meta;
pub mod project;
pub mod snapshot;
pub mod structure;

pub use error::{Error, Result};
pub use graph::{ContentId, ContentNode, DocumentGraph, NodeKind, Relation, RelationKind, TextualDs};
pub use id::{Identifier, NodeKey, StructureId};
pub use meta::{MetaAnnotation, MetaAnnotations, QName};
pub use project::Project;
pub use snapshot::{CorpusSnapshot, DocumentSnapshot, StructureSnapshot};
pub use structure::{CorpusNode, CorpusStructure, NodeRole, PATH_SEPARATOR};
