//! Client for the StreamLux scraper backend and helpers for its byte
//! passthrough endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::BackendSection;
use crate::source::{
    Candidate, CandidateBase, DirectCandidate, MediaRequest, ScraperSite, SourceStatus, SpeedHint,
};

pub const FZMOVIES_PRIORITY_BASE: i64 = 100;
pub const NETNAIJA_PRIORITY_BASE: i64 = 200;
pub const O2TVSERIES_PRIORITY_BASE: i64 = 300;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// URL builders for the backend routes. The base already carries the `/api`
/// prefix, e.g. `http://localhost:3001/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoints {
    base: String,
}

impl BackendEndpoints {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn route(&self, path: &str) -> BackendResult<Url> {
        Ok(Url::parse(&format!("{}/{}", self.base, path))?)
    }

    pub fn scraper_resolve_url(&self, request: &MediaRequest) -> BackendResult<Url> {
        let mut url = self.route("scrapers/resolve")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("type", request.kind.as_str());
            query.append_pair("id", &request.tmdb_id);
            if let Some(season) = request.season {
                query.append_pair("season", &season.to_string());
            }
            if let Some(episode) = request.episode {
                query.append_pair("episode", &episode.to_string());
            }
            if let Some(title) = request.title.as_deref() {
                query.append_pair("title", title);
            }
        }
        Ok(url)
    }

    pub fn resolve_url(&self, request: &MediaRequest) -> BackendResult<Url> {
        let mut url = self.route("resolve")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("type", request.kind.as_str());
            query.append_pair("id", &request.tmdb_id);
            if let Some(season) = request.season {
                query.append_pair("s", &season.to_string());
            }
            if let Some(episode) = request.episode {
                query.append_pair("e", &episode.to_string());
            }
        }
        Ok(url)
    }

    pub fn proxy_url(&self, target: &str, referer: Option<&str>) -> BackendResult<Url> {
        let mut url = self.route("proxy")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", target);
            if let Some(referer) = referer {
                query.append_pair("referer", referer);
            }
        }
        Ok(url)
    }

    pub fn download_url(&self, target: &str, filename: Option<&str>) -> BackendResult<Url> {
        let mut url = self.route("download")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", target);
            if let Some(filename) = filename {
                query.append_pair("filename", filename);
            }
        }
        Ok(url)
    }
}

/// One scraped item. Fields are read loosely: numbers and booleans are
/// kept as text, any other shape counts as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapedLink {
    #[serde(rename = "downloadLink", default, deserialize_with = "loose_text")]
    pub download_link: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub quality: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub title: Option<String>,
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

/// A site entry only counts when it is an array; items that are not objects
/// are skipped one by one.
fn site_links<'de, D>(deserializer: D) -> Result<Option<Vec<ScrapedLink>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
        )),
        other => {
            if !other.is_null() {
                debug!(entry = %other, "ignoring malformed scraper site entry");
            }
            Ok(None)
        }
    }
}

impl ScrapedLink {
    fn link(&self) -> Option<&str> {
        self.download_link
            .as_deref()
            .or(self.url.as_deref())
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

/// Response of `/scrapers/resolve`. A site that is absent, null or not an
/// array contributes nothing without affecting the others.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScraperPayload {
    #[serde(default, deserialize_with = "site_links")]
    pub fzmovies: Option<Vec<ScrapedLink>>,
    #[serde(default, deserialize_with = "site_links")]
    pub netnaija: Option<Vec<ScrapedLink>>,
    #[serde(default, deserialize_with = "site_links")]
    pub o2tvseries: Option<Vec<ScrapedLink>>,
}

impl ScraperPayload {
    pub fn into_candidates(self) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (index, item) in self.fzmovies.unwrap_or_default().iter().enumerate() {
            if let Some(link) = item.link() {
                let quality = item.quality.clone();
                candidates.push(direct(
                    format!("FZMovies - {}", quality.as_deref().unwrap_or("HD")),
                    link,
                    quality.unwrap_or_else(|| "720p".to_string()),
                    FZMOVIES_PRIORITY_BASE + index as i64,
                    ScraperSite::Fzmovies,
                ));
            }
        }
        for (index, item) in self.netnaija.unwrap_or_default().iter().enumerate() {
            if let Some(link) = item.link() {
                candidates.push(direct(
                    format!("NetNaija - {}", item.category.as_deref().unwrap_or("Movie")),
                    link,
                    "720p".to_string(),
                    NETNAIJA_PRIORITY_BASE + index as i64,
                    ScraperSite::Netnaija,
                ));
            }
        }
        for (index, item) in self.o2tvseries.unwrap_or_default().iter().enumerate() {
            if let Some(link) = item.link() {
                candidates.push(direct(
                    format!("O2TVSeries - {}", item.title.as_deref().unwrap_or("Episode")),
                    link,
                    "720p".to_string(),
                    O2TVSERIES_PRIORITY_BASE + index as i64,
                    ScraperSite::O2tvseries,
                ));
            }
        }
        candidates
    }
}

fn direct(name: String, url: &str, quality: String, priority: i64, origin: ScraperSite) -> Candidate {
    let speed = match origin {
        ScraperSite::O2tvseries => SpeedHint::Slow,
        ScraperSite::Fzmovies | ScraperSite::Netnaija => SpeedHint::Medium,
    };
    Candidate::Direct(DirectCandidate {
        base: CandidateBase {
            name,
            url: url.to_string(),
            quality,
            speed,
            priority,
            status: SourceStatus::Checking,
        },
        origin,
    })
}

#[async_trait]
pub trait ScraperClient: Send + Sync {
    /// Direct-file links found by the backend scrapers.
    async fn scraper_sources(&self, request: &MediaRequest) -> BackendResult<ScraperPayload>;

    /// Raw payload of the generic resolve route, `None` on a non-2xx reply.
    async fn generic_resolution(&self, request: &MediaRequest) -> BackendResult<Option<Value>>;
}

#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: Client,
    endpoints: BackendEndpoints,
    scraper_timeout: Duration,
    resolve_timeout: Duration,
}

impl HttpBackendClient {
    pub fn new(client: Client, config: &BackendSection) -> Self {
        Self {
            client,
            endpoints: BackendEndpoints::new(&config.base_url),
            scraper_timeout: config.scraper_timeout(),
            resolve_timeout: config.resolve_timeout(),
        }
    }

    pub fn endpoints(&self) -> &BackendEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl ScraperClient for HttpBackendClient {
    async fn scraper_sources(&self, request: &MediaRequest) -> BackendResult<ScraperPayload> {
        let url = self.endpoints.scraper_resolve_url(request)?;
        debug!(url = %url, "querying scraper backend");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.scraper_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(response.json::<ScraperPayload>().await?)
    }

    async fn generic_resolution(&self, request: &MediaRequest) -> BackendResult<Option<Value>> {
        let url = self.endpoints.resolve_url(request)?;
        let response = self
            .client
            .get(url)
            .timeout(self.resolve_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(Some(response.json::<Value>().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraper_url_carries_media_identity() {
        let endpoints = BackendEndpoints::new("http://localhost:3001/api/");
        let request = MediaRequest::episode("1399", 1, 2).with_title("Game of Thrones");
        let url = endpoints.scraper_resolve_url(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3001/api/scrapers/resolve?type=tv&id=1399&season=1&episode=2&title=Game+of+Thrones"
        );
    }

    #[test]
    fn generic_resolve_url_uses_short_keys() {
        let endpoints = BackendEndpoints::new("http://localhost:3001/api");
        let url = endpoints
            .resolve_url(&MediaRequest::episode("1399", 4, 5))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3001/api/resolve?type=tv&id=1399&s=4&e=5"
        );
        let movie = endpoints.resolve_url(&MediaRequest::movie("550")).unwrap();
        assert_eq!(movie.query(), Some("type=movie&id=550"));
    }

    #[test]
    fn passthrough_urls_encode_target() {
        let endpoints = BackendEndpoints::new("http://localhost:3001/api");
        let proxy = endpoints
            .proxy_url("https://cdn.example/a b.mp4?x=1&y=2", Some("https://ref.example/"))
            .unwrap();
        let pairs: Vec<(String, String)> = proxy
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0].1, "https://cdn.example/a b.mp4?x=1&y=2");
        assert_eq!(pairs[1].0, "referer");
        let download = endpoints
            .download_url("https://cdn.example/f.mp4", Some("fight_club.mp4"))
            .unwrap();
        assert!(download.as_str().starts_with("http://localhost:3001/api/download?url="));
        assert!(download.as_str().ends_with("&filename=fight_club.mp4"));
    }

    #[test]
    fn payload_maps_sites_to_prioritized_candidates() {
        let payload: ScraperPayload = serde_json::from_str(
            r#"{
                "fzmovies": [
                    {"downloadLink": "https://fz.example/1080.mp4", "quality": "1080p"},
                    {"quality": "480p"},
                    {"url": "https://fz.example/720.mp4"}
                ],
                "netnaija": [{"url": "https://nn.example/movie.mkv", "category": "Movies"}],
                "o2tvseries": null
            }"#,
        )
        .unwrap();
        let candidates = payload.into_candidates();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].name(), "FZMovies - 1080p");
        assert_eq!(candidates[0].priority(), 100);
        assert_eq!(candidates[1].name(), "FZMovies - HD");
        assert_eq!(candidates[1].quality(), "720p");
        assert_eq!(candidates[1].priority(), 102);
        assert_eq!(candidates[2].name(), "NetNaija - Movies");
        assert_eq!(candidates[2].priority(), 200);
        assert!(candidates
            .iter()
            .all(|candidate| candidate.status() == SourceStatus::Checking));
    }

    #[test]
    fn malformed_site_only_drops_its_own_links() {
        let payload: ScraperPayload = serde_json::from_str(
            r#"{
                "fzmovies": {"error": "blocked"},
                "netnaija": [
                    "not-an-object",
                    {"url": "https://nn.example/movie.mkv", "category": 7, "quality": 1080}
                ],
                "o2tvseries": [{"url": ["https://o2.example/a.mp4"], "title": "S01E01"}]
            }"#,
        )
        .unwrap();
        assert!(payload.fzmovies.is_none());
        let candidates = payload.into_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url(), "https://nn.example/movie.mkv");
        assert_eq!(candidates[0].name(), "NetNaija - 7");
        assert_eq!(candidates[0].priority(), 200);
    }

    #[test]
    fn numeric_quality_is_kept_as_text() {
        let payload: ScraperPayload = serde_json::from_str(
            r#"{"fzmovies": [{"downloadLink": "https://fz.example/a.mp4", "quality": 1080}]}"#,
        )
        .unwrap();
        let candidates = payload.into_candidates();
        assert_eq!(candidates[0].name(), "FZMovies - 1080");
        assert_eq!(candidates[0].quality(), "1080");
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let payload: ScraperPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.into_candidates().is_empty());
    }
}
