mod cache;
mod clock;
mod probe;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::HealthSection;
use crate::metrics::{self, EngineMetrics, MetricsHandle};
use crate::source::{Candidate, SourceStatus};

pub use cache::{HealthCache, HealthEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use probe::{HttpProbe, Probe, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeThresholds {
    pub active_below: Duration,
    pub slow_below: Duration,
}

impl ProbeThresholds {
    pub fn classify(&self, elapsed: Duration) -> SourceStatus {
        if elapsed < self.active_below {
            SourceStatus::Active
        } else if elapsed < self.slow_below {
            SourceStatus::Slow
        } else {
            SourceStatus::Down
        }
    }
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            active_below: Duration::from_millis(2_000),
            slow_below: Duration::from_millis(5_000),
        }
    }
}

impl From<&HealthSection> for ProbeThresholds {
    fn from(section: &HealthSection) -> Self {
        Self {
            active_below: Duration::from_millis(section.active_threshold_ms),
            slow_below: Duration::from_millis(section.slow_threshold_ms),
        }
    }
}

/// Classifies candidate URLs as active/slow/down, consulting the shared
/// cache before touching the network.
#[derive(Clone)]
pub struct HealthProber {
    probe: Arc<dyn Probe>,
    cache: Arc<HealthCache>,
    thresholds: ProbeThresholds,
    metrics: MetricsHandle,
}

impl std::fmt::Debug for HealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProber")
            .field("thresholds", &self.thresholds)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl HealthProber {
    pub fn new(probe: Arc<dyn Probe>, cache: Arc<HealthCache>, thresholds: ProbeThresholds) -> Self {
        Self {
            probe,
            cache,
            thresholds,
            metrics: EngineMetrics::handle(),
        }
    }

    /// HTTP prober backed by a fresh cache on the system clock.
    pub fn from_config(client: Client, config: &HealthSection) -> Self {
        let cache = Arc::new(HealthCache::new(config.cache_ttl(), Arc::new(SystemClock)));
        let probe = Arc::new(HttpProbe::new(client, config.probe_timeout()));
        Self::new(probe, cache, ProbeThresholds::from(config))
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(&self) -> &Arc<HealthCache> {
        &self.cache
    }

    pub fn metrics(&self) -> EngineMetrics {
        metrics::lock(&self.metrics).clone()
    }

    pub(crate) fn metrics_handle(&self) -> MetricsHandle {
        Arc::clone(&self.metrics)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Never fails: probe errors degrade to `Down`.
    pub async fn probe(&self, url: &str) -> SourceStatus {
        if let Some(status) = self.cache.get(url) {
            metrics::lock(&self.metrics).record_cache_hit();
            debug!(url = %url, status = %status, "health cache hit");
            return status;
        }

        let status = match self.probe.check(url).await {
            Ok(elapsed) => {
                let status = self.thresholds.classify(elapsed);
                debug!(
                    url = %url,
                    elapsed_ms = elapsed.as_millis() as u64,
                    status = %status,
                    "source probed"
                );
                status
            }
            Err(err) => {
                warn!(url = %url, error = %err, "source probe failed");
                SourceStatus::Down
            }
        };
        metrics::lock(&self.metrics).record_probe(status == SourceStatus::Down);
        self.cache.insert(url, status);
        status
    }

    /// Probes in ascending priority order and returns the first candidate
    /// that is not confirmed down. When every candidate is down the
    /// highest-priority one is returned anyway.
    pub async fn select_best_source(&self, candidates: &[Candidate]) -> Option<Candidate> {
        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by_key(|candidate| candidate.priority());

        for candidate in &ordered {
            let status = self.probe(candidate.url()).await;
            if status.is_usable() {
                let mut chosen = (*candidate).clone();
                chosen.set_status(status);
                return Some(chosen);
            }
        }

        ordered.first().map(|candidate| {
            let mut fallback = (*candidate).clone();
            fallback.set_status(SourceStatus::Down);
            fallback
        })
    }

    /// Probes every candidate concurrently and writes the results back.
    pub async fn annotate(&self, candidates: &mut [Candidate]) {
        let statuses = join_all(
            candidates
                .iter()
                .map(|candidate| self.probe(candidate.url())),
        )
        .await;
        for (candidate, status) in candidates.iter_mut().zip(statuses) {
            candidate.set_status(status);
        }
    }
}
