use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::Repository;
use crate::error::{ApiError, ExporterError};
use crate::github::GithubApi;
use crate::github::models::Workflow;

/// Workflow definitions of every configured repository, keyed by
/// repository and workflow id.
///
/// A snapshot is always complete: it is built off to the side and
/// published in one step.
#[derive(Debug, Default)]
pub struct WorkflowSnapshot {
    workflows: HashMap<Repository, HashMap<i64, Workflow>>,
}

impl WorkflowSnapshot {
    pub fn get(&self, repo: &Repository, workflow_id: i64) -> Option<&Workflow> {
        self.workflows.get(repo)?.get(&workflow_id)
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.values().map(HashMap::len).sum()
    }
}

#[derive(Debug, Clone)]
enum CacheState {
    Pending,
    Ready(Arc<WorkflowSnapshot>),
    Failed(String),
}

/// Readiness-gated workflow cache.
///
/// Lifecycle:
/// - `Pending` until the background task finished the first population
/// - `Ready(snapshot)` from then on; refreshes swap in a new snapshot,
///   a failed refresh keeps the current one
/// - `Failed(reason)` if the first population failed; the task ends
///
/// Consumers call [`WorkflowCache::ready`], which waits on the watch
/// channel instead of polling. Handles are cheap to clone.
#[derive(Clone)]
pub struct WorkflowCache {
    rx: watch::Receiver<CacheState>,
}

impl WorkflowCache {
    /// Starts the population task. Returns immediately.
    pub fn spawn(
        api: Arc<dyn GithubApi>,
        repositories: Vec<Repository>,
        refresh: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = watch::channel(CacheState::Pending);

        let handle = tokio::spawn(async move {
            run_cache(api, repositories, refresh, tx, cancel).await;
        });

        (Self { rx }, handle)
    }

    /// Waits until the first population finished.
    ///
    /// Returns the snapshot, or `CacheUnavailable` if the population
    /// failed or the task went away before finishing.
    pub async fn ready(&self) -> Result<Arc<WorkflowSnapshot>, ExporterError> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(|s| !matches!(s, CacheState::Pending))
            .await
            .map_err(|_| {
                ExporterError::CacheUnavailable("cache task stopped before populating".to_string())
            })?;

        match &*state {
            CacheState::Ready(snapshot) => Ok(snapshot.clone()),
            CacheState::Failed(reason) => Err(ExporterError::CacheUnavailable(reason.clone())),
            CacheState::Pending => Err(ExporterError::CacheUnavailable(
                "cache is still pending".to_string(),
            )),
        }
    }

    /// Current snapshot, `None` before the first population.
    pub fn snapshot(&self) -> Option<Arc<WorkflowSnapshot>> {
        match &*self.rx.borrow() {
            CacheState::Ready(snapshot) => Some(snapshot.clone()),
            _ => None,
        }
    }
}

async fn populate(
    api: &dyn GithubApi,
    repositories: &[Repository],
) -> Result<WorkflowSnapshot, ApiError> {
    let mut workflows = HashMap::with_capacity(repositories.len());

    for repo in repositories {
        let by_id = api
            .list_workflows(repo)
            .await?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();
        workflows.insert(repo.clone(), by_id);
    }

    Ok(WorkflowSnapshot { workflows })
}

async fn run_cache(
    api: Arc<dyn GithubApi>,
    repositories: Vec<Repository>,
    refresh: Duration,
    tx: watch::Sender<CacheState>,
    cancel: CancellationToken,
) {
    // --------------------------------------------------------
    // Initial population
    // --------------------------------------------------------
    let first = tokio::select! {
        _ = cancel.cancelled() => return,
        res = populate(api.as_ref(), &repositories) => res,
    };

    match first {
        Ok(snapshot) => {
            info!(
                "workflow cache ready: {} workflow(s) across {} repositories",
                snapshot.workflow_count(),
                repositories.len()
            );
            tx.send_replace(CacheState::Ready(Arc::new(snapshot)));
        }
        Err(e) => {
            error!("workflow cache population failed: {e}");
            tx.send_replace(CacheState::Failed(e.to_string()));
            return;
        }
    }

    // --------------------------------------------------------
    // Periodic refresh
    // --------------------------------------------------------
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(refresh) => {}
        }

        let res = tokio::select! {
            _ = cancel.cancelled() => return,
            res = populate(api.as_ref(), &repositories) => res,
        };

        match res {
            Ok(snapshot) => {
                tx.send_replace(CacheState::Ready(Arc::new(snapshot)));
            }
            Err(e) => warn!("workflow cache refresh failed, keeping previous snapshot: {e}"),
        }
    }
}
