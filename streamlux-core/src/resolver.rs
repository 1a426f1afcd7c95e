use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::ScraperClient;
use crate::catalog::ProviderCatalog;
use crate::config::ResolverSection;
use crate::health::HealthProber;
use crate::metrics::{self, MetricsHandle};
use crate::source::{Candidate, MediaRequest};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no sources available for {0}")]
    NoSources(String),
}

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub min_resolution_time: Duration,
    pub embed_priority_base: i64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&ResolverSection::default())
    }
}

impl From<&ResolverSection> for ResolverConfig {
    fn from(section: &ResolverSection) -> Self {
        Self {
            min_resolution_time: section.min_resolution_time(),
            embed_priority_base: section.embed_priority_base,
        }
    }
}

/// Merges scraper-direct and embed candidates into one ordered list with the
/// best probed source first.
pub struct Resolver {
    scraper: Arc<dyn ScraperClient>,
    catalog: Arc<ProviderCatalog>,
    prober: HealthProber,
    config: ResolverConfig,
    tracker: ResolutionTracker,
    metrics: MetricsHandle,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("providers", &self.catalog.len())
            .field("prober", &self.prober)
            .field("config", &self.config)
            .finish()
    }
}

impl Resolver {
    pub fn new(
        scraper: Arc<dyn ScraperClient>,
        catalog: Arc<ProviderCatalog>,
        prober: HealthProber,
        config: ResolverConfig,
    ) -> Self {
        let metrics = prober.metrics_handle();
        Self {
            scraper,
            catalog,
            prober,
            config,
            tracker: ResolutionTracker::default(),
            metrics,
        }
    }

    pub fn prober(&self) -> &HealthProber {
        &self.prober
    }

    pub fn tracker(&self) -> &ResolutionTracker {
        &self.tracker
    }

    pub async fn resolve(&self, request: &MediaRequest) -> ResolveResult<Vec<Candidate>> {
        let started = Instant::now();
        let pacing = tokio::time::sleep(self.config.min_resolution_time);
        let (direct, ()) = tokio::join!(self.direct_candidates(request), pacing);

        let mut merged = direct;
        let embeds = self.catalog.build(request);
        for (position, mut candidate) in embeds.into_iter().enumerate() {
            candidate.set_priority(self.config.embed_priority_base + position as i64);
            merged.push(candidate);
        }

        let mut ordered = dedupe_by_url(merged);
        if ordered.is_empty() {
            metrics::lock(&self.metrics).record_resolution(true);
            warn!(media = %request.media_key(), "resolution produced no candidates");
            return Err(ResolveError::NoSources(request.media_key()));
        }

        if let Some(best) = self.prober.select_best_source(&ordered).await {
            if let Some(position) = ordered
                .iter()
                .position(|candidate| candidate.url() == best.url())
            {
                ordered.remove(position);
            }
            ordered.insert(0, best);
        }
        for candidate in ordered.iter_mut().skip(1) {
            if let Some(status) = self.prober.cache().get(candidate.url()) {
                candidate.set_status(status);
            }
        }

        metrics::lock(&self.metrics).record_resolution(false);
        info!(
            media = %request.media_key(),
            candidates = ordered.len(),
            best = %ordered[0].name(),
            best_status = %ordered[0].status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sources resolved"
        );
        Ok(ordered)
    }

    /// Like [`Resolver::resolve`], but returns `Ok(None)` when another
    /// resolution began while this one was in flight.
    pub async fn resolve_tracked(
        &self,
        request: &MediaRequest,
    ) -> ResolveResult<Option<Vec<Candidate>>> {
        let ticket = self.tracker.begin(request);
        let result = self.resolve(request).await;
        if !self.tracker.is_current(&ticket) {
            info!(media = %ticket.media_key, "discarding stale resolution");
            return Ok(None);
        }
        result.map(Some)
    }

    /// Passthrough of the backend's generic resolve payload.
    pub async fn fetch_resolution(&self, request: &MediaRequest) -> Option<Value> {
        match self.scraper.generic_resolution(request).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(media = %request.media_key(), error = %err, "generic resolve failed");
                None
            }
        }
    }

    async fn direct_candidates(&self, request: &MediaRequest) -> Vec<Candidate> {
        match self.scraper.scraper_sources(request).await {
            Ok(payload) => payload.into_candidates(),
            Err(err) => {
                metrics::lock(&self.metrics).record_scraper_failure();
                warn!(
                    media = %request.media_key(),
                    error = %err,
                    "scraper backend unavailable, continuing with embeds"
                );
                Vec::new()
            }
        }
    }
}

/// Stable sort by priority, then keep the first occurrence of each URL.
fn dedupe_by_url(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|candidate| candidate.priority());
    let mut seen = HashSet::new();
    candidates.retain(|candidate| seen.insert(candidate.url().to_string()));
    candidates
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTicket {
    generation: u64,
    pub media_key: String,
}

/// Generation counter guarding against stale resolutions: only the ticket
/// from the most recent `begin` is current.
#[derive(Debug, Default)]
pub struct ResolutionTracker {
    generation: AtomicU64,
}

impl ResolutionTracker {
    pub fn begin(&self, request: &MediaRequest) -> ResolutionTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ResolutionTicket {
            generation,
            media_key: request.media_key(),
        }
    }

    pub fn is_current(&self, ticket: &ResolutionTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CandidateBase, EmbedCandidate, SourceStatus, SpeedHint};

    fn embed(url: &str, priority: i64) -> Candidate {
        Candidate::Embed(EmbedCandidate {
            base: CandidateBase {
                name: url.to_string(),
                url: url.to_string(),
                quality: "HD".into(),
                priority,
                status: SourceStatus::Checking,
                speed: SpeedHint::default(),
            },
            provider: "test".into(),
        })
    }

    #[test]
    fn dedupe_keeps_highest_priority_copy() {
        let deduped = dedupe_by_url(vec![
            embed("https://b.example", 1001),
            embed("https://a.example", 1000),
            embed("https://b.example", 100),
        ]);
        let summary: Vec<(&str, i64)> = deduped
            .iter()
            .map(|candidate| (candidate.url(), candidate.priority()))
            .collect();
        assert_eq!(
            summary,
            vec![("https://b.example", 100), ("https://a.example", 1000)]
        );
    }

    #[test]
    fn tracker_only_honours_latest_ticket() {
        let tracker = ResolutionTracker::default();
        let first = tracker.begin(&MediaRequest::episode("1399", 1, 1));
        assert!(tracker.is_current(&first));
        let second = tracker.begin(&MediaRequest::episode("1399", 1, 2));
        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&second));
        assert_eq!(second.media_key, "tv-1399-s1e2");
    }
}
