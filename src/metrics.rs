use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::warn;
use prometheus::core::Collector;
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};

use crate::config::MetricFamily;
use crate::util;

/// One labeled value produced by a fetcher.
///
/// `labels` is ordered like the label schema of the gauge it is
/// published into.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub labels: Vec<String>,
    pub value: f64,
}

impl Observation {
    pub fn new(labels: Vec<String>, value: f64) -> Self {
        Self { labels, value }
    }
}

/// A gauge vector plus the label tuples published per scope.
///
/// Purpose:
/// - Publish the complete result of one scope (a repository, an
///   organization, an enterprise) in one call
/// - Replace the value of every observed tuple
/// - Drop tuples the scope published last time but not this time
///   (removed runners, runs that fell off the first page)
///
/// Scopes that are not published in a cycle (failed fetch) keep
/// their previous series untouched.
///
/// The bookkeeping mutex is only taken inside `publish`, which never
/// awaits.
pub struct SeriesPublisher {
    gauge: GaugeVec,
    published: Mutex<HashMap<String, HashSet<Vec<String>>>>,
}

impl SeriesPublisher {
    pub fn new(name: &str, help: &str, labels: &[&str]) -> Result<Self, prometheus::Error> {
        Ok(Self {
            gauge: GaugeVec::new(Opts::new(name, help), labels)?,
            published: Mutex::new(HashMap::new()),
        })
    }

    pub fn gauge(&self) -> &GaugeVec {
        &self.gauge
    }

    pub fn publish(&self, scope: &str, observations: Vec<Observation>) {
        let mut published = self.published.lock().unwrap_or_else(|p| p.into_inner());

        let mut current = HashSet::with_capacity(observations.len());
        for obs in observations {
            let values: Vec<&str> = obs.labels.iter().map(String::as_str).collect();
            match self.gauge.get_metric_with_label_values(&values) {
                Ok(gauge) => gauge.set(obs.value),
                Err(e) => {
                    warn!("dropping observation for scope {scope}: {e}");
                    continue;
                }
            }
            current.insert(obs.labels);
        }

        if let Some(previous) = published.get(scope) {
            for stale in previous.difference(&current) {
                let shared = published
                    .iter()
                    .any(|(other, set)| other != scope && set.contains(stale));
                if !shared {
                    let values: Vec<&str> = stale.iter().map(String::as_str).collect();
                    let _ = self.gauge.remove_label_values(&values);
                }
            }
        }

        published.insert(scope.to_string(), current);
    }
}

// ------------------------------------------------------------
// Exporter self-metrics
// ------------------------------------------------------------
//
// Shared by all fetchers, keyed by the `family` label. The vectors
// are thread-safe, no extra locking needed.
//
#[derive(Clone)]
pub struct ExporterMetrics {
    fetch_cycles: IntCounterVec,
    fetch_errors: IntCounterVec,
    last_success: GaugeVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            fetch_cycles: IntCounterVec::new(
                Opts::new(
                    "github_exporter_fetch_cycles_total",
                    "Completed fetch cycles per metric family",
                ),
                &["family"],
            )?,
            fetch_errors: IntCounterVec::new(
                Opts::new(
                    "github_exporter_fetch_errors_total",
                    "Scopes whose fetch failed, per metric family",
                ),
                &["family"],
            )?,
            last_success: GaugeVec::new(
                Opts::new(
                    "github_exporter_last_success_timestamp_seconds",
                    "Unix time of the last fully successful cycle per metric family",
                ),
                &["family"],
            )?,
        })
    }

    /// Fresh handles on the self-metric vectors, for registration.
    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.fetch_cycles.clone()),
            Box::new(self.fetch_errors.clone()),
            Box::new(self.last_success.clone()),
        ]
    }

    pub fn record_cycle(&self, family: MetricFamily, failed_scopes: usize) {
        let label = [family.as_str()];
        self.fetch_cycles.with_label_values(&label).inc();
        if failed_scopes > 0 {
            self.fetch_errors
                .with_label_values(&label)
                .inc_by(failed_scopes as u64);
        } else {
            self.last_success
                .with_label_values(&label)
                .set(util::unix_now() as f64);
        }
    }

    #[cfg(test)]
    pub fn cycles(&self, family: MetricFamily) -> u64 {
        self.fetch_cycles.with_label_values(&[family.as_str()]).get()
    }

    #[cfg(test)]
    pub fn errors(&self, family: MetricFamily) -> u64 {
        self.fetch_errors.with_label_values(&[family.as_str()]).get()
    }
}

/// Registers every collector `collectors` yields, or none of them.
///
/// `collectors` is called a second time to unregister what was
/// already registered when one registration fails, so it must yield
/// the same collectors in the same order.
pub fn register_all<F>(registry: &Registry, collectors: F) -> Result<(), prometheus::Error>
where
    F: Fn() -> Vec<Box<dyn Collector>>,
{
    for (registered, collector) in collectors().into_iter().enumerate() {
        if let Err(e) = registry.register(collector) {
            for done in collectors().into_iter().take(registered) {
                let _ = registry.unregister(done);
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Reads a series without creating it.
///
/// Collected label pairs are sorted by name, so values are compared
/// as sorted lists.
#[cfg(test)]
pub(crate) fn series_value(gauge: &GaugeVec, labels: &[&str]) -> Option<f64> {
    let mut wanted: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
    wanted.sort();

    gauge
        .collect()
        .into_iter()
        .flat_map(|mf| mf.get_metric().to_vec())
        .find(|m| {
            let mut got: Vec<String> = m
                .get_label()
                .iter()
                .map(|l| l.get_value().to_string())
                .collect();
            got.sort();
            got == wanted
        })
        .map(|m| m.get_gauge().get_value())
}

#[cfg(test)]
pub(crate) fn series_count(gauge: &GaugeVec) -> usize {
    gauge
        .collect()
        .iter()
        .map(|mf| mf.get_metric().len())
        .sum()
}
