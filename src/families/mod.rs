//! Metric family registry and factory
//!
//! This module provides:
//! - One fetcher per metric family
//! - A factory resolving a configured family to its fetcher
//!
//! Family-specific logic (API calls, label mapping) must live in the
//! dedicated fetcher modules. The collector only talks to the
//! `MetricFetcher` trait.

pub mod billable;
pub mod fetcher;
pub mod runners;
pub mod workflow_runs;

use std::sync::Arc;

use crate::cache::WorkflowCache;
use crate::config::{GithubSettings, MetricFamily, WorkflowField};
use crate::error::ExporterError;
use crate::github::RunnerScope;

use billable::BillableFetcher;
use fetcher::MetricFetcher;
use runners::RunnersFetcher;
use workflow_runs::WorkflowRunsFetcher;

/// Builds the fetcher of one metric family.
///
/// CONTRACT:
/// - Gauge vectors are created here but NOT registered; the collector
///   registers them all before launching anything
/// - Families that need the workflow cache get `CacheUnavailable`
///   when `workflows` is missing or not populated yet
///
/// ERRORS:
/// - invalid metric or label names -> `Registration`
///
pub fn build_fetcher(
    family: MetricFamily,
    settings: &GithubSettings,
    export_fields: &[WorkflowField],
    workflows: Option<&WorkflowCache>,
) -> Result<Arc<dyn MetricFetcher>, ExporterError> {
    let fetcher: Arc<dyn MetricFetcher> = match family {
        MetricFamily::Runners => Arc::new(RunnersFetcher::new(
            RunnerScope::Repository,
            settings.repositories.iter().map(ToString::to_string).collect(),
        )?),
        MetricFamily::RunnersOrg => Arc::new(RunnersFetcher::new(
            RunnerScope::Organization,
            settings.organizations.clone(),
        )?),
        MetricFamily::RunnersEnterprise => Arc::new(RunnersFetcher::new(
            RunnerScope::Enterprise,
            settings.enterprises.clone(),
        )?),
        MetricFamily::BillableTime => {
            Arc::new(BillableFetcher::new(settings.repositories.clone())?)
        }
        MetricFamily::WorkflowRuns => {
            let Some(cache) = workflows.filter(|c| c.snapshot().is_some()) else {
                return Err(ExporterError::CacheUnavailable(format!(
                    "{family} needs a populated workflow cache"
                )));
            };
            Arc::new(WorkflowRunsFetcher::new(
                settings.repositories.clone(),
                settings.workflow_runs_per_repo,
                export_fields.to_vec(),
                cache.clone(),
            )?)
        }
    };

    Ok(fetcher)
}
