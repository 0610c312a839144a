use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ExporterError;
use crate::util;

/// Host name of the public API. Anything else is treated as an
/// Enterprise Server deployment.
pub const PUBLIC_API_HOST: &str = "api.github.com";

const DEFAULT_METRICS: &str = "runners,billable_time,workflow_runs";
const DEFAULT_EXPORT_FIELDS: &str =
    "repo,id,node_id,head_branch,head_sha,run_number,workflow_id,workflow,event,status";

// ------------------------------------------------------------
// File configuration
// ------------------------------------------------------------
//
// This is the raw shape of `config.json`. It is never used
// directly by the collectors: `Config::from_file` validates it
// and resolves every comma-separated list into typed values.
//
#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    pub github: GithubFileConfig,

    /// Comma-separated metric families
    #[serde(default = "default_metrics")]
    pub metrics_to_export: String,

    /// Comma-separated workflow run label fields
    #[serde(default = "default_export_fields")]
    pub export_fields: String,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GithubFileConfig {
    /// Personal access token. Takes precedence over the app fields.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub app_id: Option<u64>,

    #[serde(default)]
    pub app_installation_id: Option<u64>,

    /// Path to the app's PEM private key
    #[serde(default)]
    pub app_private_key: Option<PathBuf>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub repositories: String,

    #[serde(default)]
    pub organizations: String,

    #[serde(default)]
    pub enterprises: String,

    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_runs_per_repo")]
    pub workflow_runs_per_repo: u32,
}

// ------------------------------------------------------------
// Scrape server configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_metrics_path(),
        }
    }
}

fn default_metrics() -> String {
    DEFAULT_METRICS.to_string()
}

fn default_export_fields() -> String {
    DEFAULT_EXPORT_FIELDS.to_string()
}

fn default_api_url() -> String {
    PUBLIC_API_HOST.to_string()
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_runs_per_repo() -> u32 {
    30
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9999))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

// ------------------------------------------------------------
// Credential
// ------------------------------------------------------------
//
// Selected exactly once while loading the configuration and never
// re-evaluated afterwards.
//
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    AppInstallation {
        app_id: u64,
        installation_id: u64,
        private_key_path: PathBuf,
    },
}

// Tokens must never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(***)"),
            Credential::AppInstallation {
                app_id,
                installation_id,
                private_key_path,
            } => f
                .debug_struct("AppInstallation")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

// ------------------------------------------------------------
// Metric families
// ------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    Runners,
    RunnersOrg,
    RunnersEnterprise,
    BillableTime,
    WorkflowRuns,
}

impl MetricFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::Runners => "runners",
            MetricFamily::RunnersOrg => "runners_org",
            MetricFamily::RunnersEnterprise => "runners_enterprise",
            MetricFamily::BillableTime => "billable_time",
            MetricFamily::WorkflowRuns => "workflow_runs",
        }
    }

    /// Families that must wait for the workflow cache.
    pub fn needs_workflow_cache(&self) -> bool {
        matches!(self, MetricFamily::WorkflowRuns)
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricFamily {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runners" => Ok(MetricFamily::Runners),
            "runners_org" => Ok(MetricFamily::RunnersOrg),
            "runners_enterprise" => Ok(MetricFamily::RunnersEnterprise),
            "billable_time" => Ok(MetricFamily::BillableTime),
            "workflow_runs" => Ok(MetricFamily::WorkflowRuns),
            other => Err(ExporterError::Configuration(format!(
                "unknown metric family '{other}'"
            ))),
        }
    }
}

// ------------------------------------------------------------
// Workflow run label fields
// ------------------------------------------------------------
//
// Each variant is both a label key of the workflow run gauges and
// the selector of the run attribute that becomes its value.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowField {
    Repo,
    Id,
    NodeId,
    HeadBranch,
    HeadSha,
    RunNumber,
    WorkflowId,
    Workflow,
    Event,
    Status,
    Conclusion,
}

impl WorkflowField {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowField::Repo => "repo",
            WorkflowField::Id => "id",
            WorkflowField::NodeId => "node_id",
            WorkflowField::HeadBranch => "head_branch",
            WorkflowField::HeadSha => "head_sha",
            WorkflowField::RunNumber => "run_number",
            WorkflowField::WorkflowId => "workflow_id",
            WorkflowField::Workflow => "workflow",
            WorkflowField::Event => "event",
            WorkflowField::Status => "status",
            WorkflowField::Conclusion => "conclusion",
        }
    }
}

impl FromStr for WorkflowField {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "repo" => WorkflowField::Repo,
            "id" => WorkflowField::Id,
            "node_id" => WorkflowField::NodeId,
            "head_branch" => WorkflowField::HeadBranch,
            "head_sha" => WorkflowField::HeadSha,
            "run_number" => WorkflowField::RunNumber,
            "workflow_id" => WorkflowField::WorkflowId,
            "workflow" => WorkflowField::Workflow,
            "event" => WorkflowField::Event,
            "status" => WorkflowField::Status,
            "conclusion" => WorkflowField::Conclusion,
            other => {
                return Err(ExporterError::Configuration(format!(
                    "unknown workflow field '{other}'"
                )));
            }
        };
        Ok(field)
    }
}

// ------------------------------------------------------------
// Repository reference
// ------------------------------------------------------------
//
// Always `owner/name`. The `Display` form is also the value of the
// `repo` label.
//
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for Repository {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Repository {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ExporterError::Configuration(format!(
                "repository '{s}' is not in owner/name form"
            ))),
        }
    }
}

// ------------------------------------------------------------
// Validated configuration
// ------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct GithubSettings {
    pub credential: Credential,
    pub api_url: String,
    pub repositories: Vec<Repository>,
    pub organizations: Vec<String>,
    pub enterprises: Vec<String>,
    pub refresh: Duration,
    pub request_timeout: Duration,
    pub workflow_runs_per_repo: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub github: GithubSettings,
    pub families: Vec<MetricFamily>,
    pub export_fields: Vec<WorkflowField>,
    pub server: ServerConfig,
}

impl Config {
    /// Validates a raw file configuration.
    ///
    /// `env_token` is the value of `GITHUB_TOKEN`, if any; it wins
    /// over the token stored in the file.
    pub fn from_file(file: FileConfig, env_token: Option<String>) -> Result<Self, ExporterError> {
        let gh = file.github;

        let token = env_token
            .filter(|t| !t.is_empty())
            .or(gh.token)
            .filter(|t| !t.is_empty());

        let credential = match (token, gh.app_id, gh.app_installation_id, gh.app_private_key) {
            (Some(token), ..) => Credential::Token(token),
            (None, Some(app_id), Some(installation_id), Some(private_key_path)) => {
                Credential::AppInstallation {
                    app_id,
                    installation_id,
                    private_key_path,
                }
            }
            _ => {
                return Err(ExporterError::Configuration(
                    "either github.token or all of github.app_id, github.app_installation_id \
                     and github.app_private_key must be set"
                        .to_string(),
                ));
            }
        };

        if gh.refresh_secs == 0 {
            return Err(ExporterError::Configuration(
                "github.refresh_secs must be greater than zero".to_string(),
            ));
        }

        if gh.request_timeout_secs == 0 {
            return Err(ExporterError::Configuration(
                "github.request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if !(1..=100).contains(&gh.workflow_runs_per_repo) {
            return Err(ExporterError::Configuration(
                "github.workflow_runs_per_repo must be between 1 and 100".to_string(),
            ));
        }

        let repositories = util::split_list(&gh.repositories)
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<Repository>, _>>()?;

        let families = expand_runner_scopes(parse_unique::<MetricFamily>(
            &file.metrics_to_export,
            "metric family",
        )?);
        let export_fields = parse_unique::<WorkflowField>(&file.export_fields, "workflow field")?;

        let path = &file.server.path;
        if !path.starts_with('/') || path == "/health" {
            return Err(ExporterError::Configuration(format!(
                "server.path '{path}' must start with '/' and must not be /health"
            )));
        }

        if families.contains(&MetricFamily::WorkflowRuns) && export_fields.is_empty() {
            return Err(ExporterError::Configuration(
                "export_fields must not be empty when workflow_runs is exported".to_string(),
            ));
        }

        Ok(Config {
            github: GithubSettings {
                credential,
                api_url: gh.api_url.trim().to_string(),
                repositories,
                organizations: util::split_list(&gh.organizations),
                enterprises: util::split_list(&gh.enterprises),
                refresh: Duration::from_secs(gh.refresh_secs),
                request_timeout: Duration::from_secs(gh.request_timeout_secs),
                workflow_runs_per_repo: gh.workflow_runs_per_repo,
            },
            families,
            export_fields,
            server: file.server,
        })
    }
}

fn parse_unique<T>(raw: &str, what: &str) -> Result<Vec<T>, ExporterError>
where
    T: FromStr<Err = ExporterError> + Copy + Eq + std::hash::Hash,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for item in util::split_list(raw) {
        let value: T = item.parse()?;
        if !seen.insert(value) {
            return Err(ExporterError::Configuration(format!(
                "{what} '{item}' is listed twice"
            )));
        }
        out.push(value);
    }

    Ok(out)
}

/// `runners` selects every runner scope: repositories, organizations
/// and enterprises. `runners_org` and `runners_enterprise` select a
/// single one. Listing a scope twice this way is not an error.
fn expand_runner_scopes(listed: Vec<MetricFamily>) -> Vec<MetricFamily> {
    static ALL_RUNNERS: [MetricFamily; 3] = [
        MetricFamily::Runners,
        MetricFamily::RunnersOrg,
        MetricFamily::RunnersEnterprise,
    ];

    let mut families = Vec::with_capacity(listed.len() + 2);
    for family in &listed {
        let group = match family {
            MetricFamily::Runners => &ALL_RUNNERS[..],
            other => std::slice::from_ref(other),
        };
        for f in group {
            if !families.contains(f) {
                families.push(*f);
            }
        }
    }
    families
}

/// Reads and validates `config.json`.
pub fn load_config(path: &Path) -> Result<Config, ExporterError> {
    let data = fs::read_to_string(path).map_err(|e| {
        ExporterError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let file: FileConfig = serde_json::from_str(&data).map_err(|e| {
        ExporterError::Configuration(format!("cannot parse {}: {e}", path.display()))
    })?;

    Config::from_file(file, std::env::var("GITHUB_TOKEN").ok())
}
