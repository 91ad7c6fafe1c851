//! Bounded pool for fusion tasks

use crate::error::{MergeError, Result};
use crate::fusion::FusionReport;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Runs at most `limit` fusion tasks at once
pub struct FusionPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<Result<FusionReport>>,
}

impl FusionPool {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Queue one unit of fusion work; it starts once a slot is free
    pub fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = Result<FusionReport>> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| MergeError::TaskFailed(format!("Pool closed: {}", e)))?;
            work.await
        });
    }

    /// Tasks queued or running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task, returning the reports or the first failure.
    ///
    /// Remaining tasks still run to completion after a failure, so no fusion
    /// is left half done in the background.
    pub async fn join_all(mut self) -> Result<Vec<FusionReport>> {
        let mut reports = Vec::new();
        let mut failure = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined
                .map_err(|e| MergeError::TaskFailed(format!("Join error: {}", e)))
                .and_then(|result| result);
            match outcome {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(error = %err, "Fusion task failed");
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::GroupId;
    use graft_core::{Identifier, NodeKey, StructureId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn report(key: &str) -> FusionReport {
        FusionReport {
            group: GroupId::default(),
            key: key.to_string(),
            target: Identifier::new(StructureId::new(), NodeKey::new(1)),
            absorbed: Vec::new(),
            moved_nodes: 0,
            moved_relations: 0,
            meta_copied: 0,
            dropped_datasources: 0,
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut pool = FusionPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(report(&format!("g{}", i)))
            });
        }
        assert_eq!(pool.len(), 6);

        let reports = pool.join_all().await.unwrap();
        assert_eq!(reports.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_is_reported_after_all_tasks() {
        let mut pool = FusionPool::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        pool.spawn(async { Err(MergeError::MissingBaseNode("c/d".to_string())) });
        for _ in 0..3 {
            let done = done.clone();
            pool.spawn(async move {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(report("ok"))
            });
        }

        let err = pool.join_all().await.unwrap_err();
        assert!(matches!(err, MergeError::MissingBaseNode(_)));
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_is_task_failure() {
        let mut pool = FusionPool::new(1);
        pool.spawn(async {
            if true {
                panic!("boom");
            }
            Ok(report("unreachable"))
        });
        assert!(matches!(pool.join_all().await, Err(MergeError::TaskFailed(_))));
    }
}
