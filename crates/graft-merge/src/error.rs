//! Error types for the merge engine

use graft_core::Identifier;
use thiserror::Error;

/// Merge engine errors
///
/// Every variant except `InvalidConfig` signals a defect or a stalled run;
/// none of them is retryable because fusion is not idempotent mid-way.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error(
        "Slot overflow for group '{key}': {} documents given but only {mappable} mappable (given: {given:?}; table: {table})",
        given.len()
    )]
    SlotOverflow {
        key: String,
        given: Vec<Identifier>,
        mappable: usize,
        table: String,
    },

    #[error("No document known for identifier {id} (table: {table})")]
    UnknownDocument { id: Identifier, table: String },

    #[error("Identifier {0} does not denote a document")]
    NotADocument(Identifier),

    #[error("No base node found for group '{0}'")]
    MissingBaseNode(String),

    #[error("Path '{path}' in the base structure is already claimed by group '{claimed_by}'")]
    PathConflict { path: String, claimed_by: String },

    #[error("Merge stalled: {} documents are still sleeping: {sleeping:?}", sleeping.len())]
    Stalled { sleeping: Vec<Identifier> },

    #[error("Fusion task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Core error: {0}")]
    Core(#[from] graft_core::Error),
}

/// Result type alias for merge operations
pub type Result<T> = std::result::Result<T, MergeError>;
