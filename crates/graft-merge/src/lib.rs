//! Graft Merge - fusing parallel corpus structures into one
//!
//! This crate provides the merge core:
//! - Group resolution and the proposed import order per structure
//! - A synchronization gate that holds documents until their group is complete
//! - Structural and append fusion of document graphs
//! - A host interface for residency budgets, with a default implementation
//! - The `MergeEngine` driving a whole run

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod host;
pub mod pool;
pub mod resolver;
pub mod synth;

pub use cleanup::{discard_source_structures, CleanupReport};
pub use config::{split_sources, DocumentMapping, FusionMode, MergeConfig};
pub use engine::{MergeEngine, MergeSummary};
pub use error::{MergeError, Result};
pub use fusion::{FusionBatch, FusionReport, GraphFusionEngine, APPEND_SEPARATOR};
pub use gate::{Admission, ReleasedGroup, SynchronizationGate};
pub use host::{DocumentHost, DocumentState, ResidencyBudget};
pub use pool::FusionPool;
pub use resolver::{GroupId, GroupIndex, GroupResolver, MergeGroup};
pub use synth::StructureSynthesizer;
