pub mod backend;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod failover;
pub mod health;
pub mod metrics;
pub mod resolver;
pub mod source;

pub use backend::{
    BackendEndpoints, BackendError, BackendResult, HttpBackendClient, ScrapedLink, ScraperClient,
    ScraperPayload,
};
pub use catalog::{ProviderCatalog, ProviderTemplate, UrlTemplate};
pub use config::{
    load_streamlux_config, BackendSection, ConfigBundle, DownloadSection, FailoverSection,
    HealthSection, ResolverSection, StreamluxConfig,
};
pub use download::{
    pick_download_source, DownloadError, DownloadOutcome, DownloadProgress, DownloadRequest,
    DownloadService, DownloadStatus, HttpFetcher, MediaFetcher,
};
pub use error::{CatalogError, ConfigError, Result};
pub use failover::{FailoverController, FailoverError, FailoverSnapshot, PlaybackState};
pub use health::{
    Clock, HealthCache, HealthProber, HttpProbe, ManualClock, Probe, ProbeError, ProbeThresholds,
    SystemClock,
};
pub use metrics::{EngineMetrics, MetricsHandle};
pub use resolver::{ResolutionTracker, ResolveError, Resolver, ResolverConfig};
pub use source::{
    Candidate, CandidateBase, DirectCandidate, EmbedCandidate, MediaKind, MediaRequest,
    ScraperSite, SourceKind, SourceStatus, SpeedHint,
};
