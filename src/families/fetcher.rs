use prometheus::GaugeVec;

use crate::config::MetricFamily;
use crate::github::GithubApi;

/// Maximum number of timing requests in flight per scope.
pub const TIMING_CONCURRENCY: usize = 4;

/// Outcome of one fetch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Scopes polled this cycle
    pub scopes: usize,

    /// Scopes whose fetch failed; their series were left untouched
    pub failed: usize,
}

impl CycleReport {
    pub fn record(&mut self, ok: bool) {
        self.scopes += 1;
        if !ok {
            self.failed += 1;
        }
    }
}

/// MetricFetcher is the contract between the generic fetch loop and
/// one metric family.
///
/// Each implementation:
/// - Owns its gauge vectors exclusively (nobody else writes them)
/// - Polls the API for every scope it is configured with
/// - Publishes each scope's complete result, or nothing for that
///   scope when one of its calls failed
///
/// MUST NOT:
/// - Hold a lock across an API call
/// - Return before every scope of the cycle was handled
///
/// Errors are never propagated: they are logged and counted in the
/// returned report, the loop simply runs the next cycle.
#[async_trait::async_trait]
pub trait MetricFetcher: Send + Sync {
    fn family(&self) -> MetricFamily;

    /// Gauge vectors to register before the fetcher starts.
    fn gauges(&self) -> Vec<GaugeVec>;

    async fn fetch_cycle(&self, api: &dyn GithubApi) -> CycleReport;
}
