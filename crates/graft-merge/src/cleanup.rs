//! End of run: drop every structure except the base

use graft_core::{Project, StructureId};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of the removed structures
    pub removed: Vec<String>,
    /// Removed structures that still held documents
    pub residual: usize,
}

/// Remove all structures but `base` from the project.
///
/// A source structure that still holds documents belongs to a group whose
/// members never all arrived; it is removed anyway and reported.
pub fn discard_source_structures(project: &Project, base: StructureId) -> CleanupReport {
    let mut report = CleanupReport::default();

    for structure in project.structures() {
        if structure.id() == base {
            continue;
        }
        let leftover: Vec<String> = structure.documents().iter().map(|d| d.global_id()).collect();
        if !leftover.is_empty() {
            warn!(
                structure = %structure.name(),
                documents = ?leftover,
                "Structure still holds documents after merging, these were never fused"
            );
            report.residual += 1;
        }
        project.remove_structure(structure.id());
        report.removed.push(structure.name().to_string());
    }

    info!(
        removed = report.removed.len(),
        residual = report.residual,
        remaining = project.len(),
        "Discarded source structures"
    );
    report
}
