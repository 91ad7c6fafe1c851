//! Identifiers for structures and their nodes
//!
//! An [`Identifier`] names one corpus or document node inside one structure.
//! Two structures may hold nodes with the same name and path; their
//! identifiers still differ, because equality covers the owning structure.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a corpus structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureId(Uuid);

impl StructureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StructureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StructureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Per-structure key of a node, allocated in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(u64);

impl NodeKey {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Structure-scoped handle of a corpus or document node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    structure: StructureId,
    key: NodeKey,
}

impl Identifier {
    pub fn new(structure: StructureId, key: NodeKey) -> Self {
        Self { structure, key }
    }

    /// The structure owning the node
    pub fn structure(&self) -> StructureId {
        self.structure
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.structure, self.key.0)
    }
}
