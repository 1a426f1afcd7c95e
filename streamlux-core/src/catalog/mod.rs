//! Embed mirror catalog.
//!
//! The provider table is data, not code: mirrors go offline regularly and get
//! replaced by editing `configs/providers.toml`. The same file is compiled in
//! as a fallback for callers that have no config directory.

mod template;

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::config::load_toml;
use crate::error::{CatalogError, ConfigError, Result};
use crate::source::{
    Candidate, CandidateBase, EmbedCandidate, MediaKind, MediaRequest, SourceStatus, SpeedHint,
};

pub use template::UrlTemplate;

const BUILTIN_PROVIDERS: &str = include_str!("../../../configs/providers.toml");

#[derive(Debug, Clone, Deserialize)]
struct ProviderFile {
    #[serde(default, rename = "provider")]
    providers: Vec<ProviderEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderEntry {
    id: String,
    name: String,
    #[serde(default = "default_quality")]
    quality: String,
    #[serde(default)]
    speed: SpeedHint,
    movie: Option<String>,
    tv: Option<String>,
}

fn default_quality() -> String {
    "HD".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTemplate {
    pub id: String,
    pub name: String,
    pub quality: String,
    pub speed: SpeedHint,
    pub movie: Option<UrlTemplate>,
    pub tv: Option<UrlTemplate>,
}

impl ProviderTemplate {
    pub fn template_for(&self, kind: MediaKind) -> Option<&UrlTemplate> {
        match kind {
            MediaKind::Movie => self.movie.as_ref(),
            MediaKind::Tv => self.tv.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: Vec<ProviderTemplate>,
}

impl ProviderCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file: ProviderFile = load_toml(path)?;
        Self::from_entries(file.providers).map_err(|source| ConfigError::Catalog {
            source,
            path: path.to_path_buf(),
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_PROVIDERS)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let path = Path::new("<inline providers>");
        let file: ProviderFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })?;
        Self::from_entries(file.providers).map_err(|source| ConfigError::Catalog {
            source,
            path: path.to_path_buf(),
        })
    }

    fn from_entries(entries: Vec<ProviderEntry>) -> std::result::Result<Self, CatalogError> {
        let mut providers = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.movie.is_none() && entry.tv.is_none() {
                return Err(CatalogError::NoTemplates(entry.id));
            }
            let movie = entry
                .movie
                .as_deref()
                .map(UrlTemplate::parse)
                .transpose()?;
            let tv = entry
                .tv
                .as_deref()
                .map(UrlTemplate::parse)
                .transpose()?;
            providers.push(ProviderTemplate {
                id: entry.id,
                name: entry.name,
                quality: entry.quality,
                speed: entry.speed,
                movie,
                tv,
            });
        }
        if !providers.iter().any(|provider| provider.movie.is_some()) {
            return Err(CatalogError::MissingKind(MediaKind::Movie));
        }
        if !providers.iter().any(|provider| provider.tv.is_some()) {
            return Err(CatalogError::MissingKind(MediaKind::Tv));
        }
        Ok(Self { providers })
    }

    pub fn providers(&self) -> &[ProviderTemplate] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Embed candidates in table order. Priorities are left at zero; the
    /// resolver assigns them.
    pub fn build(&self, request: &MediaRequest) -> Vec<Candidate> {
        let candidates: Vec<Candidate> = self
            .providers
            .iter()
            .filter_map(|provider| {
                let template = provider.template_for(request.kind)?;
                Some(Candidate::Embed(EmbedCandidate {
                    base: CandidateBase {
                        name: provider.name.clone(),
                        url: template.render(request),
                        quality: provider.quality.clone(),
                        speed: provider.speed,
                        priority: 0,
                        status: SourceStatus::Checking,
                    },
                    provider: provider.id.clone(),
                }))
            })
            .collect();
        debug!(
            media = %request.media_key(),
            candidates = candidates.len(),
            "embed catalog built"
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_both_kinds() {
        let catalog = ProviderCatalog::builtin().unwrap();
        assert!(!catalog.build(&MediaRequest::movie("550")).is_empty());
        assert!(!catalog.build(&MediaRequest::episode("1399", 1, 1)).is_empty());
    }

    #[test]
    fn movie_urls_use_tmdb_and_imdb_ids() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let request = MediaRequest::movie("550").with_imdb_id("tt0137523");
        let urls: Vec<String> = catalog
            .build(&request)
            .iter()
            .map(|candidate| candidate.url().to_string())
            .collect();
        assert!(urls.iter().any(|url| url.contains("550")));
        assert!(urls.iter().any(|url| url.contains("tt0137523")));
        assert!(urls.iter().all(|url| url.starts_with("https://")));
        assert!(urls.iter().all(|url| !url.contains('{')));
    }

    #[test]
    fn build_is_deterministic_and_ordered() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let request = MediaRequest::episode("1399", 3, 9);
        let first = catalog.build(&request);
        let second = catalog.build(&request);
        assert_eq!(first, second);
        assert_eq!(first[0].name(), "VidSrc.me");
        assert_eq!(first[0].speed(), SpeedHint::Fast);
        assert_eq!(
            first[0].url(),
            "https://vidsrc.me/embed/tv?tmdb=1399&sea=3&epi=9"
        );
    }

    #[test]
    fn providers_without_template_for_kind_are_skipped() {
        let catalog = ProviderCatalog::from_toml_str(
            r#"
            [[provider]]
            id = "a"
            name = "A"
            movie = "https://a.example/{tmdb_id}"

            [[provider]]
            id = "b"
            name = "B"
            tv = "https://b.example/{tmdb_id}/{season}/{episode}"
            "#,
        )
        .unwrap();
        let movie = catalog.build(&MediaRequest::movie("1"));
        assert_eq!(movie.len(), 1);
        assert_eq!(movie[0].url(), "https://a.example/1");
        let tv = catalog.build(&MediaRequest::episode("2", 4, 7));
        assert_eq!(tv.len(), 1);
        assert_eq!(tv[0].url(), "https://b.example/2/4/7");
    }

    #[test]
    fn table_without_tv_templates_is_rejected() {
        let err = ProviderCatalog::from_toml_str(
            r#"
            [[provider]]
            id = "a"
            name = "A"
            movie = "https://a.example/{tmdb_id}"
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Catalog {
                source: CatalogError::MissingKind(MediaKind::Tv),
                ..
            }
        ));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = ProviderCatalog::from_toml_str(
            r#"
            [[provider]]
            id = "a"
            name = "A"
            movie = "https://a.example/{tmbd}"
            tv = "https://a.example/{tmdb_id}"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tmbd"));
    }
}
