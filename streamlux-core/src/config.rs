use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::catalog::ProviderCatalog;
use crate::error::{ConfigError, Result};

pub const BACKEND_URL_ENV: &str = "STREAMLUX_BACKEND_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StreamluxConfig {
    pub backend: BackendSection,
    pub health: HealthSection,
    pub resolver: ResolverSection,
    pub failover: FailoverSection,
    pub download: DownloadSection,
}

impl StreamluxConfig {
    /// Applies `STREAMLUX_BACKEND_URL` on top of the file value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.backend.base_url = url.trim_end_matches('/').to_string();
            }
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub base_url: String,
    pub scraper_timeout_ms: u64,
    pub resolve_timeout_ms: u64,
}

impl BackendSection {
    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_millis(self.scraper_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001/api".to_string(),
            scraper_timeout_ms: 8_000,
            resolve_timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub probe_timeout_ms: u64,
    pub active_threshold_ms: u64,
    pub slow_threshold_ms: u64,
    pub cache_ttl_seconds: u64,
}

impl HealthSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            active_threshold_ms: 2_000,
            slow_threshold_ms: 5_000,
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    /// Lower bound on how long `resolve` takes, so the UI can show a
    /// resolving state. `0` disables it.
    pub min_resolution_time_ms: u64,
    pub embed_priority_base: i64,
    /// Relative paths are resolved against the config file's directory.
    pub providers_path: Option<PathBuf>,
}

impl ResolverSection {
    pub fn min_resolution_time(&self) -> Duration {
        Duration::from_millis(self.min_resolution_time_ms)
    }
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            min_resolution_time_ms: 800,
            embed_priority_base: 1_000,
            providers_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    pub countdown_seconds: u32,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            countdown_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub download_dir: PathBuf,
    pub proxy_fallback: bool,
    /// Partner search page opened when nothing can be fetched. `{query}` is
    /// replaced by the form-encoded title.
    pub fallback_search_url: String,
    pub progress_interval_ms: u64,
    /// A fetch that sends no bytes for this long is abandoned.
    pub idle_timeout_ms: u64,
}

impl DownloadSection {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            proxy_fallback: true,
            fallback_search_url: "https://www.justwatch.com/us/search?q={query}".to_string(),
            progress_interval_ms: 1_000,
            idle_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub streamlux: StreamluxConfig,
    pub catalog: ProviderCatalog,
}

impl ConfigBundle {
    /// Loads `streamlux.toml` from `dir` and the provider table it points at,
    /// falling back to `providers.toml` next to it, then to the built-in table.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_config_path(dir.join("streamlux.toml"))
    }

    pub fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let streamlux = load_streamlux_config(path)?.with_env_overrides();
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let providers_path = match &streamlux.resolver.providers_path {
            Some(candidate) if candidate.is_absolute() => Some(candidate.clone()),
            Some(candidate) => Some(config_dir.join(candidate)),
            None => {
                let sibling = config_dir.join("providers.toml");
                sibling.exists().then_some(sibling)
            }
        };
        let catalog = match providers_path {
            Some(providers) => ProviderCatalog::load(providers)?,
            None => ProviderCatalog::builtin()?,
        };
        Ok(Self { streamlux, catalog })
    }
}

pub fn load_streamlux_config<P: AsRef<Path>>(path: P) -> Result<StreamluxConfig> {
    load_toml(path)
}

pub(crate) fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
