//! Synchronization gate
//!
//! Holds each arriving document until every member of its group has arrived.
//! All slot mutation goes through one lock, so a group is released exactly
//! once and never partially.

use crate::error::{MergeError, Result};
use crate::resolver::{GroupId, GroupIndex};
use graft_core::{Identifier, NodeRole};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, trace};

/// Outcome of one arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nothing to merge, the document passes straight through
    Bypass,
    /// The group is incomplete; the document goes to sleep
    Blocked { waiting: usize },
    /// The arrival completed its group
    Released(ReleasedGroup),
}

/// A complete group, ready for fusion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedGroup {
    pub group: GroupId,
    pub key: String,
    /// All members in canonical group order
    pub members: Vec<Identifier>,
    pub target: Option<Identifier>,
    /// Members that were sleeping and have to be woken up
    pub woken: Vec<Identifier>,
}

#[derive(Default)]
struct GateState {
    slots: HashMap<GroupId, Vec<Identifier>>,
    sleeping: HashSet<Identifier>,
    completed: HashSet<GroupId>,
}

/// Admission control per merge group
pub struct SynchronizationGate {
    index: Option<Arc<GroupIndex>>,
    state: Mutex<GateState>,
}

impl SynchronizationGate {
    pub fn new(index: Arc<GroupIndex>) -> Self {
        Self {
            index: Some(index),
            state: Mutex::new(GateState::default()),
        }
    }

    /// A gate that lets every document through
    pub fn bypass() -> Self {
        Self {
            index: None,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn is_bypass(&self) -> bool {
        self.index.is_none()
    }

    /// Register an arriving document in its group's slot
    pub fn admit(&self, id: &Identifier) -> Result<Admission> {
        let Some(index) = &self.index else {
            trace!(document = %id, "Bypass");
            return Ok(Admission::Bypass);
        };

        let group = index.group_of(id).ok_or_else(|| {
            let err = MergeError::UnknownDocument {
                id: *id,
                table: index.describe(),
            };
            error!(error = %err, "Arrival rejected");
            err
        })?;
        if group.role() != NodeRole::Document {
            return Err(MergeError::NotADocument(*id));
        }

        let mut state = self.state.lock();
        trace!(group = %group.key(), document = %id, "Document arrived");
        let overflow = state.completed.contains(&group.id())
            || state
                .slots
                .get(&group.id())
                .map_or(false, |given| given.contains(id));
        if overflow {
            let mut given = state
                .slots
                .get(&group.id())
                .cloned()
                .unwrap_or_else(|| group.members().to_vec());
            given.push(*id);
            let err = MergeError::SlotOverflow {
                key: group.key().to_string(),
                given,
                mappable: group.len(),
                table: index.describe(),
            };
            error!(error = %err, "Slot invariant violated");
            return Err(err);
        }

        let given = state.slots.entry(group.id()).or_default();
        given.push(*id);
        let arrived = given.len();

        if arrived < group.len() {
            state.sleeping.insert(*id);
            let waiting = group.len() - arrived;
            trace!(group = %group.key(), document = %id, waiting, "Document sleeps");
            return Ok(Admission::Blocked { waiting });
        }

        let given = state.slots.remove(&group.id()).unwrap_or_default();
        state.completed.insert(group.id());
        let woken: Vec<Identifier> = given
            .iter()
            .filter(|member| state.sleeping.remove(*member))
            .copied()
            .collect();
        trace!(
            group = %group.key(),
            document = %id,
            woken = woken.len(),
            sleeping = state.sleeping.len(),
            "Group released"
        );

        Ok(Admission::Released(ReleasedGroup {
            group: group.id(),
            key: group.key().to_string(),
            members: group.members().to_vec(),
            target: group.target(),
            woken,
        }))
    }

    /// Documents still waiting for their group
    pub fn sleeping(&self) -> Vec<Identifier> {
        let mut sleeping: Vec<Identifier> = self.state.lock().sleeping.iter().copied().collect();
        sleeping.sort();
        sleeping
    }

    /// Number of arrivals registered for a group that is still open
    pub fn given(&self, group: GroupId) -> usize {
        self.state.lock().slots.get(&group).map_or(0, Vec::len)
    }

    pub fn is_completed(&self, group: GroupId) -> bool {
        self.state.lock().completed.contains(&group)
    }
}
