use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

pub type MetricsHandle = Arc<Mutex<EngineMetrics>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub probes_issued: u64,
    pub probe_cache_hits: u64,
    pub probes_down: u64,
    pub resolutions: u64,
    pub empty_resolutions: u64,
    pub scraper_failures: u64,
    pub failover_advances: u64,
    pub manual_selections: u64,
    pub downloads_saved: u64,
    pub download_fallbacks: u64,
}

impl EngineMetrics {
    pub fn handle() -> MetricsHandle {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn record_probe(&mut self, down: bool) {
        self.probes_issued = self.probes_issued.saturating_add(1);
        if down {
            self.probes_down = self.probes_down.saturating_add(1);
        }
    }

    pub fn record_cache_hit(&mut self) {
        self.probe_cache_hits = self.probe_cache_hits.saturating_add(1);
    }

    pub fn record_resolution(&mut self, empty: bool) {
        self.resolutions = self.resolutions.saturating_add(1);
        if empty {
            self.empty_resolutions = self.empty_resolutions.saturating_add(1);
        }
    }

    pub fn record_scraper_failure(&mut self) {
        self.scraper_failures = self.scraper_failures.saturating_add(1);
    }

    pub fn record_failover_advance(&mut self) {
        self.failover_advances = self.failover_advances.saturating_add(1);
    }

    pub fn record_manual_selection(&mut self) {
        self.manual_selections = self.manual_selections.saturating_add(1);
    }

    pub fn record_download(&mut self, saved: bool) {
        if saved {
            self.downloads_saved = self.downloads_saved.saturating_add(1);
        } else {
            self.download_fallbacks = self.download_fallbacks.saturating_add(1);
        }
    }

    pub fn probe_hit_rate(&self) -> f64 {
        let lookups = self.probes_issued + self.probe_cache_hits;
        if lookups == 0 {
            0.0
        } else {
            (self.probe_cache_hits as f64 / lookups as f64) * 100.0
        }
    }
}

/// Poisoned counters are still usable; a panic elsewhere must not take the
/// metrics down with it.
pub(crate) fn lock(handle: &MetricsHandle) -> MutexGuard<'_, EngineMetrics> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_counts_cache_hits_against_lookups() {
        let mut metrics = EngineMetrics::default();
        assert_eq!(metrics.probe_hit_rate(), 0.0);
        metrics.record_probe(false);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_probe(true);
        assert_eq!(metrics.probes_issued, 2);
        assert_eq!(metrics.probes_down, 1);
        assert_eq!(metrics.probe_hit_rate(), 50.0);
    }
}
