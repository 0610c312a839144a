use crate::config::Repository;
use crate::error::ApiError;

use super::models::{Runner, Workflow, WorkflowRun, WorkflowRunUsage, WorkflowUsage};

/// Where a runner listing is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerScope {
    Repository,
    Organization,
    Enterprise,
}

impl RunnerScope {
    /// API path of the runner listing for one target of this scope.
    pub fn runners_path(&self, target: &str) -> String {
        match self {
            RunnerScope::Repository => format!("repos/{target}/actions/runners"),
            RunnerScope::Organization => format!("orgs/{target}/actions/runners"),
            RunnerScope::Enterprise => format!("enterprises/{target}/actions/runners"),
        }
    }
}

/// GithubApi is the only way the collectors talk to the platform.
///
/// The production implementation is `GithubClient`; tests plug in
/// in-memory fakes.
///
/// CONTRACT:
/// - Listings return the complete (paginated) result set, except
///   `list_workflow_runs` which returns the most recent `per_page` runs.
/// - Implementations bound every call with a timeout.
/// - Must be Send + Sync: one instance is shared by all fetchers.
#[async_trait::async_trait]
pub trait GithubApi: Send + Sync {
    async fn list_runners(
        &self,
        scope: RunnerScope,
        target: &str,
    ) -> Result<Vec<Runner>, ApiError>;

    async fn list_workflows(&self, repo: &Repository) -> Result<Vec<Workflow>, ApiError>;

    async fn workflow_usage(
        &self,
        repo: &Repository,
        workflow_id: i64,
    ) -> Result<WorkflowUsage, ApiError>;

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        per_page: u32,
    ) -> Result<Vec<WorkflowRun>, ApiError>;

    async fn workflow_run_usage(
        &self,
        repo: &Repository,
        run_id: i64,
    ) -> Result<WorkflowRunUsage, ApiError>;
}
