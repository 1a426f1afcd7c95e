//! Downloads a chosen source to disk, degrading to the backend passthrough
//! and finally to a partner search page.

mod fetch;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use futures::StreamExt;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::backend::{BackendEndpoints, BackendError};
use crate::config::DownloadSection;
use crate::metrics::{self, EngineMetrics, MetricsHandle};
use crate::source::{Candidate, MediaKind, MediaRequest, SourceKind};

pub use fetch::{FetchedBody, HttpFetcher, MediaFetcher};

/// Byte count at which the length-less estimate reaches one half.
const PULSE_HALF_BYTES: f64 = 50.0 * 1024.0 * 1024.0;
const PULSE_CAP: f64 = 0.95;
const STREAM_PROGRESS_START: f64 = 30.0;
const STREAM_PROGRESS_SPAN: f64 = 60.0;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("source returned an empty body")]
    Empty,
    #[error("source stalled for {0:?}")]
    Stalled(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub title: String,
    pub kind: MediaKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl DownloadRequest {
    pub fn movie(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: MediaKind::Movie,
            season: None,
            episode: None,
        }
    }

    pub fn episode(title: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            title: title.into(),
            kind: MediaKind::Tv,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Uses the request title when present, else the TMDB id.
    pub fn for_media(request: &MediaRequest) -> Self {
        Self {
            title: request
                .title
                .clone()
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| request.tmdb_id.clone()),
            kind: request.kind,
            season: request.season,
            episode: request.episode,
        }
    }

    pub fn filename(&self) -> String {
        static UNSAFE: OnceLock<Regex> = OnceLock::new();
        let unsafe_chars =
            UNSAFE.get_or_init(|| Regex::new(r"[^a-z0-9]").expect("filename pattern is valid"));
        let mut stem = unsafe_chars
            .replace_all(&self.title.to_lowercase(), "_")
            .into_owned();
        if stem.chars().all(|c| c == '_') {
            stem = "download".to_string();
        }
        match self.kind {
            MediaKind::Movie => format!("{stem}.mp4"),
            MediaKind::Tv => format!(
                "{stem}_S{}E{}.mp4",
                self.season.unwrap_or(1),
                self.episode.unwrap_or(1)
            ),
        }
    }

    pub fn download_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.kind,
            self.title,
            self.season.unwrap_or(0),
            self.episode.unwrap_or(0)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Idle,
    Downloading,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub id: String,
    pub status: DownloadStatus,
    pub progress: f64,
    pub message: String,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

impl DownloadProgress {
    fn new(id: &str, status: DownloadStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status,
            progress,
            message: message.into(),
            received_bytes: 0,
            total_bytes: None,
            speed: None,
            eta: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    ExternalPage { url: String, notice: String },
}

/// First direct source, else whatever ranks first.
pub fn pick_download_source(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .find(|candidate| candidate.kind() == SourceKind::Direct)
        .or_else(|| candidates.first())
}

pub struct DownloadService {
    fetcher: Arc<dyn MediaFetcher>,
    endpoints: BackendEndpoints,
    config: DownloadSection,
    registry: Mutex<HashMap<String, DownloadProgress>>,
    metrics: MetricsHandle,
}

impl std::fmt::Debug for DownloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadService")
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish()
    }
}

impl DownloadService {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        config: DownloadSection,
        endpoints: BackendEndpoints,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            config,
            registry: Mutex::new(HashMap::new()),
            metrics: EngineMetrics::handle(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> EngineMetrics {
        metrics::lock(&self.metrics).clone()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, DownloadProgress>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn progress(&self, id: &str) -> Option<DownloadProgress> {
        self.registry().get(id).cloned()
    }

    pub fn clear(&self, id: &str) {
        self.registry().remove(id);
    }

    /// Partner search page for a title, `{query}` replaced by the
    /// form-encoded title.
    pub fn fallback_page_url(&self, title: &str) -> String {
        let query: String = form_urlencoded::byte_serialize(title.as_bytes()).collect();
        self.config.fallback_search_url.replace("{query}", &query)
    }

    /// Never fails: every fetch or filesystem problem ends on the external
    /// page.
    pub async fn download<F>(
        &self,
        request: &DownloadRequest,
        source: Option<&Candidate>,
        mut on_progress: F,
    ) -> DownloadOutcome
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let id = request.download_id();
        let mut report = |progress: DownloadProgress| {
            on_progress(&progress);
            self.registry().insert(progress.id.clone(), progress);
        };

        let Some(source) = source else {
            info!(title = %request.title, "no downloadable source, opening partner page");
            return self.external_page(request, &id, &mut report);
        };

        report(DownloadProgress::new(
            &id,
            DownloadStatus::Idle,
            0.0,
            format!("Starting {} download...", source.quality()),
        ));
        let filename = request.filename();
        let target = self.config.download_dir.join(&filename);

        let direct = self
            .attempt(source.url(), source.name(), &target, &id, &mut report)
            .await;
        let result = match direct {
            Ok(bytes) => Ok(bytes),
            Err(err) if self.config.proxy_fallback => {
                warn!(url = %source.url(), error = %err, "direct download failed, retrying through backend");
                report(DownloadProgress::new(
                    &id,
                    DownloadStatus::Error,
                    STREAM_PROGRESS_START,
                    "Direct download blocked, retrying through the backend...",
                ));
                match self.endpoints.download_url(source.url(), Some(&filename)) {
                    Ok(passthrough) => {
                        self.attempt(passthrough.as_str(), "backend passthrough", &target, &id, &mut report)
                            .await
                    }
                    Err(err) => Err(DownloadError::from(err)),
                }
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(bytes) => {
                metrics::lock(&self.metrics).record_download(true);
                info!(path = %target.display(), bytes, "download saved");
                let mut done = DownloadProgress::new(
                    &id,
                    DownloadStatus::Completed,
                    100.0,
                    "Download complete!",
                );
                done.received_bytes = bytes;
                done.total_bytes = Some(bytes);
                report(done);
                DownloadOutcome::Saved {
                    path: target,
                    bytes,
                }
            }
            Err(err) => {
                warn!(title = %request.title, error = %err, "download failed, opening partner page");
                self.external_page(request, &id, &mut report)
            }
        }
    }

    fn external_page(
        &self,
        request: &DownloadRequest,
        id: &str,
        report: &mut impl FnMut(DownloadProgress),
    ) -> DownloadOutcome {
        metrics::lock(&self.metrics).record_download(false);
        report(DownloadProgress::new(
            id,
            DownloadStatus::Downloading,
            60.0,
            "Preparing secure download interface...",
        ));
        let url = self.fallback_page_url(&request.title);
        let notice = format!(
            "Direct download is not available for \"{}\". A partner page was opened to finish the download.",
            request.title
        );
        report(DownloadProgress::new(
            id,
            DownloadStatus::Completed,
            100.0,
            "Download interface opened!",
        ));
        DownloadOutcome::ExternalPage { url, notice }
    }

    async fn attempt(
        &self,
        url: &str,
        label: &str,
        target: &Path,
        id: &str,
        report: &mut impl FnMut(DownloadProgress),
    ) -> Result<u64, DownloadError> {
        report(DownloadProgress::new(
            id,
            DownloadStatus::Downloading,
            STREAM_PROGRESS_START,
            format!("Downloading from {label}..."),
        ));
        let body = self.fetcher.fetch(url).await?;
        let partial = target.with_extension("mp4.part");
        let result = self.stream_to(body, &partial, id, label, report).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&partial, target).await?;
                Ok(bytes)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    debug!(path = %partial.display(), error = %cleanup, "partial file not removed");
                }
                Err(err)
            }
        }
    }

    async fn stream_to(
        &self,
        body: FetchedBody,
        partial: &Path,
        id: &str,
        label: &str,
        report: &mut impl FnMut(DownloadProgress),
    ) -> Result<u64, DownloadError> {
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(partial).await?;
        let FetchedBody {
            content_length,
            mut chunks,
        } = body;

        let started = Instant::now();
        let interval = self.config.progress_interval();
        let mut last_report = started;
        let mut received: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            let now = Instant::now();
            if now.duration_since(last_report) < interval {
                continue;
            }
            last_report = now;
            let elapsed = now.duration_since(started).as_secs_f64();
            let speed = if elapsed > 0.0 {
                received as f64 / elapsed
            } else {
                0.0
            };
            let fraction = match content_length {
                Some(total) => (received as f64 / total as f64).min(1.0),
                None => pulse_estimate(received),
            };
            let mut update = DownloadProgress::new(
                id,
                DownloadStatus::Downloading,
                STREAM_PROGRESS_START + fraction * STREAM_PROGRESS_SPAN,
                format!("Downloading from {label}..."),
            );
            update.received_bytes = received;
            update.total_bytes = content_length;
            update.speed = Some(format_speed(speed));
            update.eta = content_length
                .filter(|_| speed > 0.0)
                .map(|total| format_eta(total.saturating_sub(received) as f64 / speed));
            report(update);
        }

        file.flush().await?;
        if received == 0 {
            return Err(DownloadError::Empty);
        }
        Ok(received)
    }
}

fn pulse_estimate(received: u64) -> f64 {
    let received = received as f64;
    (received / (received + PULSE_HALF_BYTES)).min(PULSE_CAP)
}

fn format_speed(bytes_per_second: f64) -> String {
    format!("{:.1} MB/s", bytes_per_second / (1024.0 * 1024.0))
}

fn format_eta(seconds: f64) -> String {
    let seconds = seconds.max(0.0).round() as u64;
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        CandidateBase, DirectCandidate, EmbedCandidate, ScraperSite, SourceStatus, SpeedHint,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CannedFetcher {
        bodies: HashMap<String, Vec<Vec<u8>>>,
        calls: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        fn serving(url: &str, chunks: Vec<Vec<u8>>) -> Self {
            let mut fetcher = Self::default();
            fetcher.bodies.insert(url.to_string(), chunks);
            fetcher
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaFetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedBody, DownloadError> {
            self.calls.lock().unwrap().push(url.to_string());
            let chunks = self.bodies.get(url).cloned().ok_or(DownloadError::Empty)?;
            let length = chunks.iter().map(|chunk| chunk.len() as u64).sum();
            Ok(FetchedBody {
                content_length: Some(length),
                chunks: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
            })
        }
    }

    fn direct(url: &str) -> Candidate {
        Candidate::Direct(DirectCandidate {
            base: CandidateBase {
                name: "FZMovies - 720p".into(),
                url: url.into(),
                quality: "720p".into(),
                priority: 100,
                status: SourceStatus::Checking,
                speed: SpeedHint::default(),
            },
            origin: ScraperSite::Fzmovies,
        })
    }

    fn embed(url: &str) -> Candidate {
        Candidate::Embed(EmbedCandidate {
            base: CandidateBase {
                name: "VidSrc.me".into(),
                url: url.into(),
                quality: "HD".into(),
                priority: 1000,
                status: SourceStatus::Checking,
                speed: SpeedHint::default(),
            },
            provider: "vidsrc_me".into(),
        })
    }

    fn service(fetcher: Arc<CannedFetcher>, dir: &Path, proxy_fallback: bool) -> DownloadService {
        let config = DownloadSection {
            download_dir: dir.to_path_buf(),
            proxy_fallback,
            progress_interval_ms: 0,
            ..DownloadSection::default()
        };
        DownloadService::new(
            fetcher,
            config,
            BackendEndpoints::new("http://localhost:3001/api"),
        )
    }

    #[test]
    fn filenames_are_sanitised() {
        assert_eq!(
            DownloadRequest::movie("Deadpool & Wolverine").filename(),
            "deadpool___wolverine.mp4"
        );
        assert_eq!(
            DownloadRequest::episode("Game of Thrones", 2, 5).filename(),
            "game_of_thrones_S2E5.mp4"
        );
        assert_eq!(
            DownloadRequest::episode("Game of Thrones", 2, 5).download_id(),
            "tv-Game of Thrones-2-5"
        );
    }

    #[test]
    fn blank_titles_still_get_a_visible_name() {
        assert_eq!(DownloadRequest::movie("").filename(), "download.mp4");
        assert_eq!(DownloadRequest::episode("!!", 1, 3).filename(), "download_S1E3.mp4");
        let blank = MediaRequest::movie("550").with_title("  ");
        assert_eq!(DownloadRequest::for_media(&blank).filename(), "550.mp4");
    }

    #[test]
    fn picks_direct_source_before_embeds() {
        let candidates = vec![embed("https://vidsrc.me/embed/movie?tmdb=550"), direct("https://cdn.example/a.mp4")];
        let picked = pick_download_source(&candidates).unwrap();
        assert_eq!(picked.url(), "https://cdn.example/a.mp4");
        assert!(pick_download_source(&[]).is_none());
    }

    #[test]
    fn eta_and_speed_formatting() {
        assert_eq!(format_eta(65.0), "1m 5s");
        assert_eq!(format_eta(42.4), "42s");
        assert_eq!(format_speed(1.5 * 1024.0 * 1024.0), "1.5 MB/s");
        assert!(pulse_estimate(u64::MAX) <= PULSE_CAP);
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_partner_page() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::default());
        let service = service(fetcher.clone(), dir.path(), true);
        let request = DownloadRequest::movie("Deadpool & Wolverine");

        let outcome = service
            .download(&request, Some(&direct("https://cdn.example/dead.mp4")), |_| {})
            .await;

        let DownloadOutcome::ExternalPage { url, notice } = outcome else {
            panic!("expected partner page, got {outcome:?}");
        };
        assert!(url.contains("Deadpool+%26+Wolverine"), "{url}");
        assert!(notice.contains("Deadpool & Wolverine"));
        let calls = fetcher.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("http://localhost:3001/api/download?url="));
        assert_eq!(service.metrics().download_fallbacks, 1);
        assert!(!dir.path().join("deadpool___wolverine.mp4.part").exists());
    }

    #[tokio::test]
    async fn missing_source_opens_partner_page_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::default());
        let service = service(fetcher.clone(), dir.path(), true);
        let request = DownloadRequest::movie("Fight Club");

        let outcome = service.download(&request, None, |_| {}).await;
        assert!(matches!(outcome, DownloadOutcome::ExternalPage { .. }));
        assert!(fetcher.calls().is_empty());
        let progress = service.progress(&request.download_id()).unwrap();
        assert_eq!(progress.status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn successful_stream_is_saved_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::serving(
            "https://cdn.example/fight.mp4",
            vec![b"abc".to_vec(), b"defg".to_vec()],
        ));
        let service = service(fetcher, dir.path(), false);
        let request = DownloadRequest::movie("Fight Club");
        let mut seen = Vec::new();

        let outcome = service
            .download(&request, Some(&direct("https://cdn.example/fight.mp4")), |progress| {
                seen.push(progress.progress)
            })
            .await;

        let expected = dir.path().join("fight_club.mp4");
        assert_eq!(
            outcome,
            DownloadOutcome::Saved {
                path: expected.clone(),
                bytes: 7
            }
        );
        assert_eq!(std::fs::read(expected).unwrap(), b"abcdefg");
        assert_eq!(seen.first().copied(), Some(0.0));
        assert_eq!(seen.last().copied(), Some(100.0));
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));

        let id = request.download_id();
        assert_eq!(service.progress(&id).unwrap().received_bytes, 7);
        service.clear(&id);
        assert!(service.progress(&id).is_none());
    }

    #[tokio::test]
    async fn backend_passthrough_recovers_blocked_source() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = BackendEndpoints::new("http://localhost:3001/api");
        let passthrough = endpoints
            .download_url("https://cdn.example/blocked.mp4", Some("fight_club.mp4"))
            .unwrap();
        let fetcher = Arc::new(CannedFetcher::serving(
            passthrough.as_str(),
            vec![b"video".to_vec()],
        ));
        let service = service(fetcher, dir.path(), true);

        let outcome = service
            .download(
                &DownloadRequest::movie("Fight Club"),
                Some(&direct("https://cdn.example/blocked.mp4")),
                |_| {},
            )
            .await;
        assert!(matches!(outcome, DownloadOutcome::Saved { bytes: 5, .. }));
        assert_eq!(service.metrics().downloads_saved, 1);
    }
}
