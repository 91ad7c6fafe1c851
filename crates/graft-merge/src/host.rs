//! Host scheduler interface and a budgeted default implementation
//!
//! The engine never manages producer threads itself. It tells the host when
//! a document goes to sleep or wakes up, and asks the host for permission
//! before pulling a document back into memory.

use async_trait::async_trait;
use dashmap::DashMap;
use graft_core::Identifier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

/// Lifecycle of a document as seen by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentState {
    Arrived,
    Sleeping,
    Woken,
    /// Handed to fusion as target, or passed through in bypass mode
    Released,
    /// Absorbed into a target and removed from its structure
    Deleted,
}

/// Capabilities the host scheduler offers the merge engine
#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// Maximum number of documents resident in memory at once
    fn max_resident_documents(&self) -> usize;

    fn set_max_resident_documents(&self, max: usize);

    /// Wait until the document may be resident
    async fn request_admission(&self, id: &Identifier);

    /// Give back the residency of a document
    fn release_residency(&self, id: &Identifier);

    /// The document waits for its group partners
    fn suspend(&self, id: &Identifier);

    /// The document's group is complete
    fn resume(&self, id: &Identifier);

    /// Terminal state reached; residency is released as well
    fn finish(&self, id: &Identifier, state: DocumentState) {
        let _ = state;
        self.release_residency(id);
    }
}

/// Host with a fixed budget of resident documents
///
/// Residency is a semaphore permit held per document. Raising the budget adds
/// permits immediately; lowering it withdraws as many idle permits as are
/// available right now.
pub struct ResidencyBudget {
    limit: AtomicUsize,
    permits: Arc<Semaphore>,
    resident: DashMap<Identifier, OwnedSemaphorePermit>,
    states: DashMap<Identifier, DocumentState>,
    history: DashMap<Identifier, Vec<DocumentState>>,
}

impl ResidencyBudget {
    pub fn new(max_resident: usize) -> Self {
        Self {
            limit: AtomicUsize::new(max_resident),
            permits: Arc::new(Semaphore::new(max_resident)),
            resident: DashMap::new(),
            states: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// Number of documents currently holding residency
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_resident(&self, id: &Identifier) -> bool {
        self.resident.contains_key(id)
    }

    pub fn state(&self, id: &Identifier) -> Option<DocumentState> {
        self.states.get(id).map(|s| *s.value())
    }

    /// Number of documents in the given state
    pub fn count_in(&self, state: DocumentState) -> usize {
        self.states.iter().filter(|entry| *entry.value() == state).count()
    }

    /// Every state the document went through, oldest first
    pub fn history(&self, id: &Identifier) -> Vec<DocumentState> {
        self.history.get(id).map(|h| h.value().clone()).unwrap_or_default()
    }

    fn transition(&self, id: &Identifier, state: DocumentState) {
        self.states.insert(*id, state);
        self.history.entry(*id).or_default().push(state);
    }
}

#[async_trait]
impl DocumentHost for ResidencyBudget {
    fn max_resident_documents(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    fn set_max_resident_documents(&self, max: usize) {
        let current = self.limit.swap(max, Ordering::SeqCst);
        if max > current {
            self.permits.add_permits(max - current);
        } else if max < current {
            let surplus = (current - max) as u32;
            match self.permits.try_acquire_many(surplus) {
                Ok(permits) => permits.forget(),
                Err(_) => {
                    warn!(current, requested = max, "Budget busy, lowering takes no effect for resident documents");
                }
            }
        }
    }

    async fn request_admission(&self, id: &Identifier) {
        if self.resident.contains_key(id) {
            return;
        }
        match self.permits.clone().acquire_owned().await {
            Ok(permit) => {
                self.resident.insert(*id, permit);
                if !self.states.contains_key(id) {
                    self.transition(id, DocumentState::Arrived);
                }
                trace!(document = %id, resident = self.resident.len(), "Admitted document");
            }
            // the semaphore is owned here and never closed
            Err(_) => warn!(document = %id, "Residency budget closed"),
        }
    }

    fn release_residency(&self, id: &Identifier) {
        if self.resident.remove(id).is_some() {
            trace!(document = %id, resident = self.resident.len(), "Released residency");
        }
    }

    fn suspend(&self, id: &Identifier) {
        self.transition(id, DocumentState::Sleeping);
    }

    fn resume(&self, id: &Identifier) {
        self.transition(id, DocumentState::Woken);
    }

    fn finish(&self, id: &Identifier, state: DocumentState) {
        self.transition(id, state);
        self.release_residency(id);
    }
}
