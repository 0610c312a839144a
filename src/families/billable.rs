use futures_util::{StreamExt, TryStreamExt, stream};
use log::warn;
use prometheus::GaugeVec;

use crate::config::{MetricFamily, Repository};
use crate::error::ApiError;
use crate::github::GithubApi;
use crate::metrics::{Observation, SeriesPublisher};

use super::fetcher::{CycleReport, MetricFetcher, TIMING_CONCURRENCY};

/// Billable time of every workflow, per runner OS, in seconds.
///
/// Labels: `repo, id, node_id, name, state, os`.
///
/// Lists the workflows itself on every cycle, so it does not depend
/// on the workflow cache.
pub struct BillableFetcher {
    repositories: Vec<Repository>,
    series: SeriesPublisher,
}

impl BillableFetcher {
    pub fn new(repositories: Vec<Repository>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            repositories,
            series: SeriesPublisher::new(
                "github_workflow_usage_seconds",
                "Billable time of a workflow per runner OS (in seconds)",
                &["repo", "id", "node_id", "name", "state", "os"],
            )?,
        })
    }

    async fn collect_repo(
        &self,
        api: &dyn GithubApi,
        repo: &Repository,
    ) -> Result<Vec<Observation>, ApiError> {
        let workflows = api.list_workflows(repo).await?;

        let usages: Vec<_> = stream::iter(workflows)
            .map(|w| async move {
                let usage = api.workflow_usage(repo, w.id).await?;
                Ok::<_, ApiError>((w, usage))
            })
            .buffered(TIMING_CONCURRENCY)
            .try_collect()
            .await?;

        let repo_label = repo.to_string();
        let mut observations = Vec::new();
        for (workflow, usage) in usages {
            for (os, billable) in usage.billable {
                observations.push(Observation::new(
                    vec![
                        repo_label.clone(),
                        workflow.id.to_string(),
                        workflow.node_id.clone(),
                        workflow.name.clone(),
                        workflow.state.clone(),
                        os,
                    ],
                    billable.total_ms as f64 / 1000.0,
                ));
            }
        }

        Ok(observations)
    }
}

#[async_trait::async_trait]
impl MetricFetcher for BillableFetcher {
    fn family(&self) -> MetricFamily {
        MetricFamily::BillableTime
    }

    fn gauges(&self) -> Vec<GaugeVec> {
        vec![self.series.gauge().clone()]
    }

    async fn fetch_cycle(&self, api: &dyn GithubApi) -> CycleReport {
        let mut report = CycleReport::default();

        for repo in &self.repositories {
            match self.collect_repo(api, repo).await {
                Ok(observations) => {
                    self.series.publish(&repo.to_string(), observations);
                    report.record(true);
                }
                Err(e) => {
                    warn!("[billable_time] {repo}: {e}");
                    report.record(false);
                }
            }
        }

        report
    }
}
