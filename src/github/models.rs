use std::collections::HashMap;

use serde::Deserialize;

// ------------------------------------------------------------
// Response payloads
// ------------------------------------------------------------
//
// Only the fields the collectors turn into labels or values are
// declared; serde ignores the rest of each payload.
//

/// Self-hosted runner, identical for repository, organization and
/// enterprise listings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Runner {
    pub id: i64,
    pub name: String,
    pub os: String,

    /// `online` or `offline`
    pub status: String,

    pub busy: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunnersPage {
    pub total_count: u64,
    pub runners: Vec<Runner>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Workflow {
    pub id: i64,
    pub node_id: String,
    pub name: String,

    /// `active`, `disabled_manually`, ...
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowsPage {
    pub total_count: u64,
    pub workflows: Vec<Workflow>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WorkflowRun {
    pub id: i64,
    pub node_id: String,

    /// Name of the workflow at the time of the run
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub head_branch: Option<String>,

    pub head_sha: String,
    pub run_number: i64,
    pub workflow_id: i64,
    pub event: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRunsPage {
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct BillableOs {
    #[serde(default)]
    pub total_ms: u64,
}

/// `GET .../workflows/{id}/timing`
///
/// `billable` is keyed by runner OS: `UBUNTU`, `MACOS`, `WINDOWS`.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct WorkflowUsage {
    #[serde(default)]
    pub billable: HashMap<String, BillableOs>,
}

/// `GET .../runs/{id}/timing`
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct WorkflowRunUsage {
    #[serde(default)]
    pub run_duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
