use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::families::fetcher::MetricFetcher;
use crate::github::GithubApi;
use crate::metrics::ExporterMetrics;

/// Spawns the polling loop of one metric family.
///
/// DESIGN:
/// - One family -> exactly one task
/// - The task owns nothing but `Arc`s; the fetcher owns its gauges
/// - Failures are isolated per family (and per scope inside it)
///
/// The returned handle completes once `cancel` fired.
pub fn spawn_fetcher(
    fetcher: Arc<dyn MetricFetcher>,
    api: Arc<dyn GithubApi>,
    interval: Duration,
    metrics: ExporterMetrics,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_fetch_loop(fetcher, api, interval, metrics, cancel).await;
    })
}

/// Runs fetch cycles until cancelled.
///
/// This loop:
/// - Runs one full cycle (every scope published or skipped)
/// - Records the outcome in the exporter self-metrics
/// - Sleeps for `interval`, then starts over
///
/// GUARANTEES:
/// - Cycle N is fully published before cycle N+1 issues its first call
/// - A failed call never ends the loop; the next cycle retries
/// - Cancellation is observed between cycles only, so a cycle is never
///   half-published
///
async fn run_fetch_loop(
    fetcher: Arc<dyn MetricFetcher>,
    api: Arc<dyn GithubApi>,
    interval: Duration,
    metrics: ExporterMetrics,
    cancel: CancellationToken,
) {
    let family = fetcher.family();
    info!("[{family}] fetcher started, polling every {interval:?}");

    loop {
        let report = fetcher.fetch_cycle(api.as_ref()).await;
        metrics.record_cycle(family, report.failed);
        debug!(
            "[{family}] cycle done: {} scope(s), {} failed",
            report.scopes, report.failed
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    info!("[{family}] fetcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricFamily;
    use crate::families::runners::RunnersFetcher;
    use crate::github::RunnerScope;
    use crate::github::fake::{FakeGithub, runner};
    use crate::metrics::series_value;

    async fn wait_for_cycles(metrics: &ExporterMetrics, family: MetricFamily, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.cycles(family) < n {
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn loop_polls_repeatedly_and_stops_on_cancel() {
        let fake = Arc::new(FakeGithub::new());
        fake.set_runners(RunnerScope::Organization, "acme", vec![runner(1, "r", "online", false)]);

        let fetcher = Arc::new(
            RunnersFetcher::new(RunnerScope::Organization, vec!["acme".into()]).unwrap(),
        );
        let metrics = ExporterMetrics::new().unwrap();
        let cancel = CancellationToken::new();

        let task = spawn_fetcher(
            fetcher.clone(),
            fake.clone(),
            Duration::from_millis(5),
            metrics.clone(),
            cancel.clone(),
        );

        wait_for_cycles(&metrics, MetricFamily::RunnersOrg, 3).await;
        assert_eq!(
            series_value(&fetcher.gauges()[0], &["acme", "linux", "r", "1", "false"]),
            Some(1.0)
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.errors(MetricFamily::RunnersOrg), 0);
    }

    #[tokio::test]
    async fn failing_cycle_is_counted_and_loop_recovers() {
        let fake = Arc::new(FakeGithub::new());
        let runners = vec![runner(1, "r", "online", false)];
        fake.set_runners(RunnerScope::Repository, "acme/api", runners);
        fake.fail("repos/acme/api/actions/runners");

        let fetcher = Arc::new(
            RunnersFetcher::new(RunnerScope::Repository, vec!["acme/api".into()]).unwrap(),
        );
        let metrics = ExporterMetrics::new().unwrap();
        let cancel = CancellationToken::new();

        let task = spawn_fetcher(
            fetcher.clone(),
            fake.clone(),
            Duration::from_millis(5),
            metrics.clone(),
            cancel.clone(),
        );

        wait_for_cycles(&metrics, MetricFamily::Runners, 1).await;
        assert!(metrics.errors(MetricFamily::Runners) >= 1);
        assert_eq!(
            series_value(&fetcher.gauges()[0], &["acme/api", "linux", "r", "1", "false"]),
            None
        );

        fake.recover("repos/acme/api/actions/runners");
        tokio::time::timeout(Duration::from_secs(5), async {
            while series_value(&fetcher.gauges()[0], &["acme/api", "linux", "r", "1", "false"])
                .is_none()
            {
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }
}
