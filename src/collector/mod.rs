/// Collector module
///
/// This module groups all logic responsible for:
/// - Building the API client once
/// - Warming the workflow cache and waiting for it
/// - Registering every gauge vector, then launching one fetch loop per
///   enabled metric family
///
/// The collector layer is the orchestration layer between:
/// - Metric family fetchers (runners, billable time, workflow runs)
/// - The Prometheus registry scraped by the server
///
/// Design notes:
/// - Family-specific logic MUST NOT live here
/// - Startup is linear and runs exactly once:
///   Uninitialized -> ClientBuilt -> CacheWarming -> Ready
/// - Every task is spawned under one cancellation token owned by
///   `Collectors`
pub mod runner;

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use prometheus::Registry;
use prometheus::core::Collector;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::WorkflowCache;
use crate::config::{Config, MetricFamily};
use crate::error::ExporterError;
use crate::families::build_fetcher;
use crate::families::fetcher::MetricFetcher;
use crate::github::{GithubApi, GithubClient};
use crate::metrics::{self, ExporterMetrics};

/// Startup progress, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    Uninitialized,
    ClientBuilt,
    CacheWarming,
    Ready,
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StartupState::Uninitialized => "uninitialized",
            StartupState::ClientBuilt => "client built",
            StartupState::CacheWarming => "cache warming",
            StartupState::Ready => "ready",
        };
        f.write_str(s)
    }
}

fn enter(state: StartupState) {
    info!("[startup] {state}");
}

/// Running background tasks of the exporter.
pub struct Collectors {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    launched: Vec<MetricFamily>,
}

impl Collectors {
    /// Families whose fetch loop is running.
    pub fn launched(&self) -> &[MetricFamily] {
        &self.launched
    }

    /// Cancels every task and waits for them to finish.
    ///
    /// Fetchers stop between cycles, so this returns after at most one
    /// in-flight cycle per family.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {e}");
            }
        }
        info!("all collectors stopped");
    }
}

/// Runs the startup sequence against the real API.
///
/// ERRORS (all fatal, nothing is registered or launched):
/// - malformed API root -> `Configuration`
/// - unusable credential -> `Authentication`
/// - gauge name collision -> `Registration`
pub async fn start(config: &Config, registry: &Registry) -> Result<Collectors, ExporterError> {
    enter(StartupState::Uninitialized);

    let gh = &config.github;
    let client = GithubClient::new(&gh.credential, &gh.api_url, gh.request_timeout)?;

    start_with_api(Arc::new(client), config, registry).await
}

/// Startup sequence from `ClientBuilt` on, for any `GithubApi`.
pub async fn start_with_api(
    api: Arc<dyn GithubApi>,
    config: &Config,
    registry: &Registry,
) -> Result<Collectors, ExporterError> {
    enter(StartupState::ClientBuilt);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // --------------------------------------------------------
    // Workflow cache
    // --------------------------------------------------------
    //
    // Only warmed when an enabled family depends on it. A failed
    // first population disables the dependent families; the
    // independent ones are launched regardless.
    //
    let mut workflows = None;
    if config.families.iter().any(MetricFamily::needs_workflow_cache) {
        enter(StartupState::CacheWarming);

        let (cache, handle) = WorkflowCache::spawn(
            api.clone(),
            config.github.repositories.clone(),
            config.github.refresh,
            cancel.clone(),
        );
        tasks.push(handle);

        let gate = cache.ready().await;
        match gate {
            Ok(_) => workflows = Some(cache),
            Err(e) => error!("{e}; dependent metric families are disabled"),
        }
    }

    // --------------------------------------------------------
    // Fetchers
    // --------------------------------------------------------
    let mut fetchers: Vec<Arc<dyn MetricFetcher>> = Vec::with_capacity(config.families.len());
    for &family in &config.families {
        if family.needs_workflow_cache() && workflows.is_none() {
            warn!("[{family}] not launched: workflow cache unavailable");
            continue;
        }

        match build_fetcher(family, &config.github, &config.export_fields, workflows.as_ref()) {
            Ok(fetcher) => fetchers.push(fetcher),
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        }
    }

    // --------------------------------------------------------
    // Registration (all or nothing)
    // --------------------------------------------------------
    let exporter_metrics = match ExporterMetrics::new() {
        Ok(m) => m,
        Err(e) => {
            cancel.cancel();
            return Err(e.into());
        }
    };

    let collectors = || {
        let mut all = exporter_metrics.collectors();
        for fetcher in &fetchers {
            all.extend(
                fetcher
                    .gauges()
                    .into_iter()
                    .map(|g| Box::new(g) as Box<dyn Collector>),
            );
        }
        all
    };

    if let Err(e) = metrics::register_all(registry, collectors) {
        error!("metric registration failed: {e}");
        cancel.cancel();
        return Err(e.into());
    }

    // --------------------------------------------------------
    // Launch
    // --------------------------------------------------------
    let mut launched = Vec::with_capacity(fetchers.len());
    for fetcher in fetchers {
        launched.push(fetcher.family());
        tasks.push(runner::spawn_fetcher(
            fetcher,
            api.clone(),
            config.github.refresh,
            exporter_metrics.clone(),
            cancel.clone(),
        ));
    }

    enter(StartupState::Ready);
    info!(
        "launched metric families: {}",
        launched
            .iter()
            .map(MetricFamily::as_str)
            .collect::<Vec<_>>()
            .join(",")
    );

    Ok(Collectors {
        cancel,
        tasks,
        launched,
    })
}
