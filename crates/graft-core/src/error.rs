//! Error types for Graft Core

use crate::graph::ContentId;
use crate::id::{Identifier, StructureId};
use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(Identifier),

    #[error("Node {0} is not a corpus")]
    NotACorpus(Identifier),

    #[error("Node {0} is not a document")]
    NotADocument(Identifier),

    #[error("Node {node} does not belong to structure {structure}")]
    ForeignNode {
        node: Identifier,
        structure: StructureId,
    },

    #[error("Relation {relation} references unknown endpoint {endpoint}")]
    DanglingRelation {
        relation: ContentId,
        endpoint: ContentId,
    },

    #[error("Content element already present: {0}")]
    DuplicateContent(ContentId),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for Graft Core operations
pub type Result<T> = std::result::Result<T, Error>;
