use log::warn;
use prometheus::GaugeVec;

use crate::config::MetricFamily;
use crate::github::models::Runner;
use crate::github::{GithubApi, RunnerScope};
use crate::metrics::{Observation, SeriesPublisher};
use crate::util;

use super::fetcher::{CycleReport, MetricFetcher};

/// Self-hosted runner status for repositories, organizations or
/// enterprises.
///
/// One value per runner: 1 when online, 0 otherwise.
/// Labels: `<scope>, os, name, id, busy`.
pub struct RunnersFetcher {
    family: MetricFamily,
    scope: RunnerScope,
    targets: Vec<String>,
    series: SeriesPublisher,
}

impl RunnersFetcher {
    pub fn new(scope: RunnerScope, targets: Vec<String>) -> Result<Self, prometheus::Error> {
        let (family, name, help, scope_label) = match scope {
            RunnerScope::Repository => (
                MetricFamily::Runners,
                "github_runner_status",
                "Repository self-hosted runner status (1 online, 0 offline)",
                "repo",
            ),
            RunnerScope::Organization => (
                MetricFamily::RunnersOrg,
                "github_runner_organization_status",
                "Organization self-hosted runner status (1 online, 0 offline)",
                "organization",
            ),
            RunnerScope::Enterprise => (
                MetricFamily::RunnersEnterprise,
                "github_runner_enterprise_status",
                "Enterprise self-hosted runner status (1 online, 0 offline)",
                "enterprise",
            ),
        };

        Ok(Self {
            family,
            scope,
            targets,
            series: SeriesPublisher::new(name, help, &[scope_label, "os", "name", "id", "busy"])?,
        })
    }
}

fn observe(target: &str, runner: &Runner) -> Observation {
    Observation::new(
        vec![
            target.to_string(),
            runner.os.clone(),
            runner.name.clone(),
            runner.id.to_string(),
            runner.busy.to_string(),
        ],
        util::online_value(&runner.status),
    )
}

#[async_trait::async_trait]
impl MetricFetcher for RunnersFetcher {
    fn family(&self) -> MetricFamily {
        self.family
    }

    fn gauges(&self) -> Vec<GaugeVec> {
        vec![self.series.gauge().clone()]
    }

    async fn fetch_cycle(&self, api: &dyn GithubApi) -> CycleReport {
        let mut report = CycleReport::default();

        for target in &self.targets {
            match api.list_runners(self.scope, target).await {
                Ok(runners) => {
                    let observations = runners.iter().map(|r| observe(target, r)).collect();
                    self.series.publish(target, observations);
                    report.record(true);
                }
                Err(e) => {
                    warn!("[{}] listing runners of {target} failed: {e}", self.family);
                    report.record(false);
                }
            }
        }

        report
    }
}
