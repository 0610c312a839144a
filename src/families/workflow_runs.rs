use futures_util::{StreamExt, TryStreamExt, stream};
use log::warn;
use prometheus::GaugeVec;

use crate::cache::{WorkflowCache, WorkflowSnapshot};
use crate::config::{MetricFamily, Repository, WorkflowField};
use crate::error::ApiError;
use crate::github::GithubApi;
use crate::github::models::WorkflowRun;
use crate::metrics::{Observation, SeriesPublisher};

use super::fetcher::{CycleReport, MetricFetcher, TIMING_CONCURRENCY};

/// Status and duration of the most recent workflow runs.
///
/// The label schema of both gauges is the configured field list, in
/// configuration order. Every observation carries a value for every
/// field.
///
/// Depends on a populated `WorkflowCache` for the `workflow` label;
/// cycles are skipped while it is not.
pub struct WorkflowRunsFetcher {
    repositories: Vec<Repository>,
    per_page: u32,
    fields: Vec<WorkflowField>,
    workflows: WorkflowCache,
    status: SeriesPublisher,
    duration: SeriesPublisher,
}

impl WorkflowRunsFetcher {
    pub fn new(
        repositories: Vec<Repository>,
        per_page: u32,
        fields: Vec<WorkflowField>,
        workflows: WorkflowCache,
    ) -> Result<Self, prometheus::Error> {
        let labels: Vec<&str> = fields.iter().map(WorkflowField::as_str).collect();

        Ok(Self {
            repositories,
            per_page,
            status: SeriesPublisher::new(
                "github_workflow_run_status",
                "Workflow run status",
                &labels,
            )?,
            duration: SeriesPublisher::new(
                "github_workflow_run_duration_ms",
                "Workflow run duration (in milliseconds)",
                &labels,
            )?,
            fields,
            workflows,
        })
    }

    async fn collect_repo(
        &self,
        api: &dyn GithubApi,
        repo: &Repository,
        snapshot: &WorkflowSnapshot,
    ) -> Result<(Vec<Observation>, Vec<Observation>), ApiError> {
        let runs = api.list_workflow_runs(repo, self.per_page).await?;

        let timed: Vec<_> = stream::iter(runs)
            .map(|run| async move {
                let usage = api.workflow_run_usage(repo, run.id).await?;
                Ok::<_, ApiError>((run, usage.run_duration_ms))
            })
            .buffered(TIMING_CONCURRENCY)
            .try_collect()
            .await?;

        let mut status = Vec::with_capacity(timed.len());
        let mut duration = Vec::with_capacity(timed.len());
        for (run, duration_ms) in timed {
            let labels: Vec<String> = self
                .fields
                .iter()
                .map(|f| label_value(*f, repo, &run, snapshot))
                .collect();

            status.push(Observation::new(labels.clone(), status_value(&run)));
            duration.push(Observation::new(labels, duration_ms as f64));
        }

        Ok((status, duration))
    }
}

/// Status code of a run.
///
/// 1 success, 2 skipped, 3 in progress, 4 queued, 0 anything else
/// (failure, cancelled, timed out, ...).
pub fn status_value(run: &WorkflowRun) -> f64 {
    match (run.conclusion.as_deref(), run.status.as_deref()) {
        (Some("success"), _) => 1.0,
        (Some("skipped"), _) => 2.0,
        (_, Some("in_progress")) => 3.0,
        (_, Some("queued")) => 4.0,
        _ => 0.0,
    }
}

fn label_value(
    field: WorkflowField,
    repo: &Repository,
    run: &WorkflowRun,
    snapshot: &WorkflowSnapshot,
) -> String {
    match field {
        WorkflowField::Repo => repo.to_string(),
        WorkflowField::Id => run.id.to_string(),
        WorkflowField::NodeId => run.node_id.clone(),
        WorkflowField::HeadBranch => run.head_branch.clone().unwrap_or_default(),
        WorkflowField::HeadSha => run.head_sha.clone(),
        WorkflowField::RunNumber => run.run_number.to_string(),
        WorkflowField::WorkflowId => run.workflow_id.to_string(),
        WorkflowField::Workflow => snapshot
            .get(repo, run.workflow_id)
            .map(|w| w.name.clone())
            .or_else(|| run.name.clone())
            .unwrap_or_default(),
        WorkflowField::Event => run.event.clone(),
        WorkflowField::Status => run.status.clone().unwrap_or_default(),
        WorkflowField::Conclusion => run.conclusion.clone().unwrap_or_default(),
    }
}

#[async_trait::async_trait]
impl MetricFetcher for WorkflowRunsFetcher {
    fn family(&self) -> MetricFamily {
        MetricFamily::WorkflowRuns
    }

    fn gauges(&self) -> Vec<GaugeVec> {
        vec![self.status.gauge().clone(), self.duration.gauge().clone()]
    }

    async fn fetch_cycle(&self, api: &dyn GithubApi) -> CycleReport {
        let mut report = CycleReport::default();

        // Taken once per cycle so every repository is labeled from the
        // same snapshot, even if the cache refreshes meanwhile.
        let Some(snapshot) = self.workflows.snapshot() else {
            warn!("[workflow_runs] workflow cache not populated, skipping cycle");
            for _ in &self.repositories {
                report.record(false);
            }
            return report;
        };

        for repo in &self.repositories {
            match self.collect_repo(api, repo, &snapshot).await {
                Ok((status, duration)) => {
                    let scope = repo.to_string();
                    self.status.publish(&scope, status);
                    self.duration.publish(&scope, duration);
                    report.record(true);
                }
                Err(e) => {
                    warn!("[workflow_runs] {repo}: {e}");
                    report.record(false);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::fake::{FakeGithub, run, workflow};
    use crate::metrics::{series_count, series_value};
    use prometheus::core::Collector;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const FIELDS: [WorkflowField; 4] = [
        WorkflowField::Repo,
        WorkflowField::Id,
        WorkflowField::Workflow,
        WorkflowField::Status,
    ];

    async fn ready_cache(fake: &Arc<FakeGithub>, repos: &[Repository]) -> WorkflowCache {
        let (cache, _task) = WorkflowCache::spawn(
            fake.clone(),
            repos.to_vec(),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );
        cache.ready().await.unwrap();
        cache
    }

    fn repo() -> Repository {
        "acme/api".parse().unwrap()
    }

    #[test]
    fn status_codes() {
        assert_eq!(status_value(&run(1, 1, "completed", Some("success"))), 1.0);
        assert_eq!(status_value(&run(1, 1, "completed", Some("skipped"))), 2.0);
        assert_eq!(status_value(&run(1, 1, "in_progress", None)), 3.0);
        assert_eq!(status_value(&run(1, 1, "queued", None)), 4.0);
        assert_eq!(status_value(&run(1, 1, "completed", Some("failure"))), 0.0);
        assert_eq!(status_value(&run(1, 1, "completed", Some("cancelled"))), 0.0);
    }

    #[tokio::test]
    async fn label_schema_follows_configured_fields() {
        let fake = Arc::new(FakeGithub::new());
        let cache = ready_cache(&fake, &[]).await;

        for fields in [
            FIELDS.to_vec(),
            vec![WorkflowField::Conclusion, WorkflowField::HeadBranch],
            vec![WorkflowField::Repo],
        ] {
            let fetcher =
                WorkflowRunsFetcher::new(vec![], 30, fields.clone(), cache.clone()).unwrap();
            let expected: HashSet<String> = fields.iter().map(|f| f.as_str().to_string()).collect();

            for gauge in fetcher.gauges() {
                let descs = gauge.desc();
                let labels: HashSet<String> = descs[0].variable_labels.iter().cloned().collect();
                assert_eq!(labels, expected);
            }
        }
    }

    #[tokio::test]
    async fn publishes_status_and_duration_with_workflow_name() {
        let fake = Arc::new(FakeGithub::new());
        fake.set_workflows("acme/api", vec![workflow(10, "ci")]);
        fake.set_runs(
            "acme/api",
            vec![
                run(1, 10, "completed", Some("success")),
                run(2, 99, "queued", None),
            ],
        );
        fake.set_run_duration("acme/api", 1, 120_000);

        let cache = ready_cache(&fake, &[repo()]).await;
        let fetcher = WorkflowRunsFetcher::new(vec![repo()], 30, FIELDS.to_vec(), cache).unwrap();

        assert_eq!(fetcher.fetch_cycle(fake.as_ref()).await, CycleReport { scopes: 1, failed: 0 });

        let gauges = fetcher.gauges();
        assert_eq!(series_value(&gauges[0], &["acme/api", "1", "ci", "completed"]), Some(1.0));
        assert_eq!(
            series_value(&gauges[1], &["acme/api", "1", "ci", "completed"]),
            Some(120_000.0)
        );
        // workflow 99 is unknown to the cache, the run's own name is used
        assert_eq!(
            series_value(&gauges[0], &["acme/api", "2", "run-name-99", "queued"]),
            Some(4.0)
        );
    }

    #[tokio::test]
    async fn every_observation_fills_every_label() {
        let fake = Arc::new(FakeGithub::new());
        let mut bare = run(5, 10, "completed", None);
        bare.head_branch = None;
        bare.name = None;
        fake.set_runs("acme/api", vec![bare]);

        let all = vec![
            WorkflowField::Repo,
            WorkflowField::Id,
            WorkflowField::NodeId,
            WorkflowField::HeadBranch,
            WorkflowField::HeadSha,
            WorkflowField::RunNumber,
            WorkflowField::WorkflowId,
            WorkflowField::Workflow,
            WorkflowField::Event,
            WorkflowField::Status,
            WorkflowField::Conclusion,
        ];
        let cache = ready_cache(&fake, &[repo()]).await;
        let fetcher = WorkflowRunsFetcher::new(vec![repo()], 30, all.clone(), cache).unwrap();
        fetcher.fetch_cycle(fake.as_ref()).await;

        for gauge in fetcher.gauges() {
            let families = gauge.collect();
            let metrics = families[0].get_metric();
            assert_eq!(metrics.len(), 1);
            assert_eq!(metrics[0].get_label().len(), all.len());
        }
    }

    #[tokio::test]
    async fn unpopulated_cache_skips_the_cycle() {
        let fake = Arc::new(FakeGithub::new());
        fake.set_runs("acme/api", vec![run(1, 10, "completed", Some("success"))]);
        let _gate = fake.hold_workflows();
        let (pending, _task) = WorkflowCache::spawn(
            fake.clone(),
            vec![repo()],
            Duration::from_secs(3600),
            CancellationToken::new(),
        );

        let fetcher = WorkflowRunsFetcher::new(vec![repo()], 30, FIELDS.to_vec(), pending).unwrap();
        assert_eq!(fetcher.fetch_cycle(fake.as_ref()).await, CycleReport { scopes: 1, failed: 1 });
        assert_eq!(series_count(&fetcher.gauges()[0]), 0);
    }

    #[tokio::test]
    async fn second_poll_replaces_duration() {
        let fake = Arc::new(FakeGithub::new());
        fake.set_runs("acme/api", vec![run(1, 10, "in_progress", None)]);
        fake.set_run_duration("acme/api", 1, 1_000);

        let cache = ready_cache(&fake, &[repo()]).await;
        let fetcher = WorkflowRunsFetcher::new(
            vec![repo()],
            30,
            vec![WorkflowField::Repo, WorkflowField::Id],
            cache,
        )
        .unwrap();

        fetcher.fetch_cycle(fake.as_ref()).await;
        fake.set_run_duration("acme/api", 1, 5_000);
        fetcher.fetch_cycle(fake.as_ref()).await;

        let duration = &fetcher.gauges()[1];
        assert_eq!(series_value(duration, &["acme/api", "1"]), Some(5_000.0));
        assert_eq!(series_count(duration), 1);
    }

    #[tokio::test]
    async fn failing_timing_call_keeps_last_successful_cycle() {
        let fake = Arc::new(FakeGithub::new());
        fake.set_runs(
            "acme/api",
            vec![run(1, 10, "completed", Some("success")), run(2, 10, "in_progress", None)],
        );
        fake.set_run_duration("acme/api", 1, 100);
        fake.set_run_duration("acme/api", 2, 200);

        let cache = ready_cache(&fake, &[repo()]).await;
        let fetcher = WorkflowRunsFetcher::new(
            vec![repo()],
            30,
            vec![WorkflowField::Repo, WorkflowField::Id],
            cache,
        )
        .unwrap();
        fetcher.fetch_cycle(fake.as_ref()).await;

        // second cycle: run 2 finished, but one of the N timing calls fails
        fake.set_runs(
            "acme/api",
            vec![
                run(1, 10, "completed", Some("success")),
                run(2, 10, "completed", Some("success")),
            ],
        );
        fake.set_run_duration("acme/api", 2, 900);
        fake.fail("run:acme/api#1");
        assert_eq!(fetcher.fetch_cycle(fake.as_ref()).await.failed, 1);

        let gauges = fetcher.gauges();
        assert_eq!(series_value(&gauges[0], &["acme/api", "2"]), Some(3.0));
        assert_eq!(series_value(&gauges[1], &["acme/api", "2"]), Some(200.0));
        assert_eq!(series_value(&gauges[1], &["acme/api", "1"]), Some(100.0));

        // third cycle recovers
        fake.recover("run:acme/api#1");
        assert_eq!(fetcher.fetch_cycle(fake.as_ref()).await.failed, 0);
        assert_eq!(series_value(&gauges[0], &["acme/api", "2"]), Some(1.0));
        assert_eq!(series_value(&gauges[1], &["acme/api", "2"]), Some(900.0));
    }
}
