//! Merge engine: one complete run, from group resolution to cleanup
//!
//! The engine owns no producers. The caller feeds document identifiers
//! through a channel, having asked [`MergeEngine::propose_import_order`] for
//! the order each structure should deliver in and the host for admission.
//! The engine reacts to arrivals: incomplete groups go to sleep, complete
//! groups go to the fusion pool.

use crate::cleanup::discard_source_structures;
use crate::config::{FusionMode, MergeConfig};
use crate::error::{MergeError, Result};
use crate::fusion::{FusionBatch, FusionReport, GraphFusionEngine};
use crate::gate::{Admission, ReleasedGroup, SynchronizationGate};
use crate::host::{DocumentHost, DocumentState};
use crate::pool::FusionPool;
use crate::resolver::{GroupIndex, GroupResolver};
use crate::synth::StructureSynthesizer;
use graft_core::{CorpusNode, Identifier, Project, StructureId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Outcome of a merge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Corpus and document groups
    pub groups: usize,
    /// Document groups fused into their target
    pub fused_documents: usize,
    /// Members absorbed and removed from their structure
    pub deleted_documents: usize,
    /// Documents let through unmerged in bypass mode
    pub passed_through: usize,
    pub synthesized_nodes: usize,
    pub meta_copied: usize,
    /// New resident-document budget, if it had to be raised
    pub budget_raised_to: Option<usize>,
    pub residual_structures: usize,
}

/// Shared by all fusion tasks of a run
struct FusionContext {
    project: Arc<Project>,
    host: Arc<dyn DocumentHost>,
    index: Arc<GroupIndex>,
    fusion: GraphFusionEngine,
    rename_targets: bool,
    /// One group at a time collects residency, so two waking groups never
    /// hold part of the budget each while waiting for the rest
    wake: Mutex<()>,
}

impl FusionContext {
    async fn process(self: Arc<Self>, released: ReleasedGroup) -> Result<FusionReport> {
        let target = released.target.ok_or_else(|| {
            let err = MergeError::MissingBaseNode(released.key.clone());
            error!(error = %err, "Released group has no target");
            err
        })?;
        let mut resident = released.members.clone();
        if !resident.contains(&target) {
            resident.push(target);
        }

        {
            let _wake = self.wake.lock().await;
            for id in &resident {
                self.host.request_admission(id).await;
            }
        }
        for id in &released.woken {
            self.host.resume(id);
        }
        trace!(group = %released.key, resident = resident.len(), "Group resident");

        let result = self.fuse(&released, target).await;
        if result.is_err() {
            for id in &resident {
                self.host.release_residency(id);
            }
        }
        result
    }

    async fn fuse(&self, released: &ReleasedGroup, target: Identifier) -> Result<FusionReport> {
        let mut members = released
            .members
            .iter()
            .map(|id| self.node(id))
            .collect::<Result<Vec<_>>>()?;
        let target_node = self
            .project
            .node(&target)
            .ok_or_else(|| MergeError::MissingBaseNode(released.key.clone()))?;

        // the target accumulates structural content, so it comes last
        if self.fusion.mode() == FusionMode::Structural {
            if let Some(pos) = members.iter().position(|m| m.id() == target) {
                let node = members.remove(pos);
                members.push(node);
            }
        }

        let batch = FusionBatch {
            group: released.group,
            key: released.key.clone(),
            members,
            target: target_node,
        };
        let fusion = self.fusion;
        let report = tokio::task::spawn_blocking(move || fusion.fuse(&batch))
            .await
            .map_err(|e| MergeError::TaskFailed(format!("Fusion of '{}': {}", released.key, e)))??;

        for id in &report.absorbed {
            if let Some(structure) = self.project.structure(id.structure()) {
                structure.remove_node(id);
            }
            self.host.finish(id, DocumentState::Deleted);
        }

        if self.rename_targets {
            self.rename(released, target);
        }
        self.host.finish(&target, DocumentState::Released);
        Ok(report)
    }

    fn rename(&self, released: &ReleasedGroup, target: Identifier) {
        let Some(name) = self.index.group(released.group).and_then(|g| g.mapped_name()) else {
            return;
        };
        let Some(structure) = self.project.structure(target.structure()) else {
            return;
        };
        if let Err(e) = structure.rename(&target, name) {
            warn!(group = %released.key, name, error = %e, "Cannot rename target, keeping its name");
        }
    }

    fn node(&self, id: &Identifier) -> Result<Arc<CorpusNode>> {
        self.project.node(id).ok_or_else(|| {
            let err = MergeError::UnknownDocument {
                id: *id,
                table: self.index.describe(),
            };
            error!(error = %err, "Group member vanished");
            err
        })
    }
}

/// Merges all structures of a project into its base structure
pub struct MergeEngine {
    project: Arc<Project>,
    config: MergeConfig,
    host: Arc<dyn DocumentHost>,
    base: StructureId,
    index: Option<GroupIndex>,
    resolved: bool,
    prepared: bool,
    synthesized_nodes: usize,
    budget_raised_to: Option<usize>,
}

impl MergeEngine {
    pub fn new(project: Arc<Project>, config: MergeConfig, host: Arc<dyn DocumentHost>) -> Result<Self> {
        config.validate()?;
        let base = project
            .structure_at(config.base)
            .ok_or_else(|| {
                MergeError::InvalidConfig(format!(
                    "base structure {} does not exist, the project has {}",
                    config.base,
                    project.len()
                ))
            })?
            .id();

        Ok(Self {
            project,
            config,
            host,
            base,
            index: None,
            resolved: false,
            prepared: false,
            synthesized_nodes: 0,
            budget_raised_to: None,
        })
    }

    pub fn base(&self) -> StructureId {
        self.base
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Group index, once resolved; `None` in bypass mode
    pub fn index(&self) -> Option<&GroupIndex> {
        self.index.as_ref()
    }

    pub fn is_bypass(&self) -> bool {
        self.resolved && self.index.is_none()
    }

    /// Compute the merge groups. Idempotent.
    pub fn resolve(&mut self) -> Result<()> {
        if self.resolved {
            return Ok(());
        }
        self.index = GroupResolver::new(&self.project, self.base, &self.config.mappings).resolve()?;
        self.resolved = true;
        Ok(())
    }

    /// Order in which the given structure should deliver its documents.
    ///
    /// `None` means there is nothing to merge and any order will do.
    pub fn propose_import_order(&mut self, structure: StructureId) -> Result<Option<Vec<Identifier>>> {
        self.resolve()?;
        Ok(self
            .index
            .as_ref()
            .and_then(|index| index.import_order(structure))
            .map(<[Identifier]>::to_vec))
    }

    /// Resolve groups, synthesize missing base nodes and adjust the host's
    /// budget. Called by [`run`](Self::run) when the caller did not.
    pub fn prepare(&mut self) -> Result<()> {
        self.resolve()?;
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;

        let Some(index) = self.index.as_mut() else {
            info!("Single structure without mapping, documents pass through unmerged");
            return Ok(());
        };

        let base = self.project.structure(self.base).ok_or_else(|| {
            MergeError::InvalidConfig("base structure was removed from the project".into())
        })?;
        self.synthesized_nodes = StructureSynthesizer::new(&base).synthesize(index)?;
        debug!(table = %index.describe(), "Mapping table");

        let required = index.max_group_size() + 1;
        let current = self.host.max_resident_documents();
        if current < required {
            warn!(
                current,
                required,
                "Resident document budget is smaller than the largest merge group plus one, raising it"
            );
            self.host.set_max_resident_documents(required);
            self.budget_raised_to = Some(required);
        }

        info!(
            groups = index.len(),
            synthesized = self.synthesized_nodes,
            max_group_size = index.max_group_size(),
            "Merge prepared"
        );
        Ok(())
    }

    /// Consume arrivals until the channel closes, then finish the run.
    ///
    /// Each identifier must have been admitted by the host before it is sent.
    pub async fn run(mut self, mut arrivals: mpsc::Receiver<Identifier>) -> Result<MergeSummary> {
        self.prepare()?;
        let mut summary = MergeSummary {
            synthesized_nodes: self.synthesized_nodes,
            budget_raised_to: self.budget_raised_to,
            ..MergeSummary::default()
        };

        let Some(index) = self.index.take().map(Arc::new) else {
            while let Some(id) = arrivals.recv().await {
                trace!(document = %id, "Passing through");
                self.host.finish(&id, DocumentState::Released);
                summary.passed_through += 1;
            }
            info!(documents = summary.passed_through, "Run finished without merging");
            return Ok(summary);
        };
        summary.groups = index.len();

        let gate = SynchronizationGate::new(index.clone());
        let context = Arc::new(FusionContext {
            project: self.project.clone(),
            host: self.host.clone(),
            index: index.clone(),
            fusion: GraphFusionEngine::new(self.config.mode),
            rename_targets: self.config.rename_targets,
            wake: Mutex::new(()),
        });
        let mut pool = FusionPool::new(self.config.max_concurrent_fusions);

        while let Some(id) = arrivals.recv().await {
            match gate.admit(&id)? {
                Admission::Blocked { .. } => {
                    self.host.suspend(&id);
                    self.host.release_residency(&id);
                }
                Admission::Released(released) => {
                    self.host.release_residency(&id);
                    pool.spawn(context.clone().process(released));
                }
                Admission::Bypass => self.host.finish(&id, DocumentState::Released),
            }
        }

        let reports = pool.join_all().await?;
        let sleeping = gate.sleeping();
        if !sleeping.is_empty() {
            let err = MergeError::Stalled { sleeping };
            error!(error = %err, "All producers finished but groups are incomplete");
            return Err(err);
        }

        summary.fused_documents = reports.len();
        summary.deleted_documents = reports.iter().map(|r| r.absorbed.len()).sum();
        summary.meta_copied = reports.iter().map(|r| r.meta_copied).sum();
        summary.meta_copied += self.fuse_corpus_meta(&index)?;

        let cleanup = discard_source_structures(&self.project, self.base);
        summary.residual_structures = cleanup.residual;

        info!(
            groups = summary.groups,
            fused = summary.fused_documents,
            deleted = summary.deleted_documents,
            residual = summary.residual_structures,
            "Merge finished"
        );
        Ok(summary)
    }

    /// Corpora carry no graph; only their meta-annotations are merged
    fn fuse_corpus_meta(&self, index: &GroupIndex) -> Result<usize> {
        let mut copied = 0;
        for group in index.corpus_groups() {
            let target = group
                .target()
                .ok_or_else(|| MergeError::MissingBaseNode(group.key().to_string()))?;
            let target_node = self
                .project
                .node(&target)
                .ok_or_else(|| MergeError::MissingBaseNode(group.key().to_string()))?;

            for member in group.members().iter().filter(|m| **m != target) {
                if let Some(node) = self.project.node(member) {
                    copied += target_node.meta_mut().absorb(&mut node.meta_mut());
                }
            }
        }
        Ok(copied)
    }
}
