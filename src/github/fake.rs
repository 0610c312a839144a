//! In-memory `GithubApi` used by the collector tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use crate::config::Repository;
use crate::error::ApiError;

use super::api::{GithubApi, RunnerScope};
use super::models::{BillableOs, Runner, Workflow, WorkflowRun, WorkflowRunUsage, WorkflowUsage};

/// Calls are keyed by strings, which are also what `fail` takes:
/// - runners:      the runner listing path (`orgs/acme/actions/runners`)
/// - workflows:    `workflows:owner/name`
/// - usage:        `usage:owner/name#id`
/// - runs:         `runs:owner/name`
/// - run usage:    `run:owner/name#id`
///
/// `fail(key)` makes every call for that key return an error until
/// `recover(key)`. Missing listings are empty, missing usages zero.
#[derive(Default)]
pub struct FakeGithub {
    runners: Mutex<HashMap<String, Vec<Runner>>>,
    workflows: Mutex<HashMap<String, Vec<Workflow>>>,
    usage: Mutex<HashMap<String, WorkflowUsage>>,
    runs: Mutex<HashMap<String, Vec<WorkflowRun>>>,
    run_usage: Mutex<HashMap<String, WorkflowRunUsage>>,
    failing: Mutex<HashSet<String>>,
    workflows_gate: Mutex<Option<Arc<Semaphore>>>,
    pub workflow_listings: AtomicUsize,
}

impl FakeGithub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_runners(&self, scope: RunnerScope, target: &str, runners: Vec<Runner>) {
        self.runners
            .lock()
            .unwrap()
            .insert(scope.runners_path(target), runners);
    }

    pub fn set_workflows(&self, repo: &str, workflows: Vec<Workflow>) {
        self.workflows
            .lock()
            .unwrap()
            .insert(format!("workflows:{repo}"), workflows);
    }

    pub fn set_usage(&self, repo: &str, workflow_id: i64, billable: &[(&str, u64)]) {
        let usage = WorkflowUsage {
            billable: billable
                .iter()
                .map(|(os, ms)| (os.to_string(), BillableOs { total_ms: *ms }))
                .collect(),
        };
        self.usage
            .lock()
            .unwrap()
            .insert(format!("usage:{repo}#{workflow_id}"), usage);
    }

    pub fn set_runs(&self, repo: &str, runs: Vec<WorkflowRun>) {
        self.runs.lock().unwrap().insert(format!("runs:{repo}"), runs);
    }

    pub fn set_run_duration(&self, repo: &str, run_id: i64, run_duration_ms: u64) {
        self.run_usage
            .lock()
            .unwrap()
            .insert(format!("run:{repo}#{run_id}"), WorkflowRunUsage { run_duration_ms });
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn recover(&self, key: &str) {
        self.failing.lock().unwrap().remove(key);
    }

    /// Blocks workflow listings until the returned semaphore gets permits.
    pub fn hold_workflows(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.workflows_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn check(&self, key: &str) -> Result<(), ApiError> {
        if self.failing.lock().unwrap().contains(key) {
            return Err(ApiError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: key.to_string(),
            });
        }
        Ok(())
    }
}

pub fn runner(id: i64, name: &str, status: &str, busy: bool) -> Runner {
    Runner {
        id,
        name: name.to_string(),
        os: "linux".to_string(),
        status: status.to_string(),
        busy,
    }
}

pub fn workflow(id: i64, name: &str) -> Workflow {
    Workflow {
        id,
        node_id: format!("W_{id}"),
        name: name.to_string(),
        state: "active".to_string(),
    }
}

pub fn run(id: i64, workflow_id: i64, status: &str, conclusion: Option<&str>) -> WorkflowRun {
    WorkflowRun {
        id,
        node_id: format!("WR_{id}"),
        name: Some(format!("run-name-{workflow_id}")),
        head_branch: Some("main".to_string()),
        head_sha: "deadbeef".to_string(),
        run_number: id,
        workflow_id,
        event: "push".to_string(),
        status: Some(status.to_string()),
        conclusion: conclusion.map(str::to_string),
    }
}

#[async_trait::async_trait]
impl GithubApi for FakeGithub {
    async fn list_runners(
        &self,
        scope: RunnerScope,
        target: &str,
    ) -> Result<Vec<Runner>, ApiError> {
        let key = scope.runners_path(target);
        self.check(&key)?;
        Ok(self.runners.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }

    async fn list_workflows(&self, repo: &Repository) -> Result<Vec<Workflow>, ApiError> {
        let gate = self.workflows_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        self.workflow_listings.fetch_add(1, Ordering::SeqCst);
        let key = format!("workflows:{repo}");
        self.check(&key)?;
        Ok(self.workflows.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }

    async fn workflow_usage(
        &self,
        repo: &Repository,
        workflow_id: i64,
    ) -> Result<WorkflowUsage, ApiError> {
        let key = format!("usage:{repo}#{workflow_id}");
        self.check(&key)?;
        Ok(self.usage.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }

    async fn list_workflow_runs(
        &self,
        repo: &Repository,
        per_page: u32,
    ) -> Result<Vec<WorkflowRun>, ApiError> {
        let key = format!("runs:{repo}");
        self.check(&key)?;
        let runs = self.runs.lock().unwrap().get(&key).cloned();
        Ok(runs
            .unwrap_or_default()
            .into_iter()
            .take(per_page as usize)
            .collect())
    }

    async fn workflow_run_usage(
        &self,
        repo: &Repository,
        run_id: i64,
    ) -> Result<WorkflowRunUsage, ApiError> {
        let key = format!("run:{repo}#{run_id}");
        self.check(&key)?;
        Ok(self.run_usage.lock().unwrap().get(&key).cloned().unwrap_or_default())
    }
}
