use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::source::MediaKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid provider table {path}: {source}")]
    Catalog { source: CatalogError, path: PathBuf },
}

/// Problems with the provider template table, found at load time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("template is not an http(s) url: {0}")]
    NotHttp(String),
    #[error("unknown placeholder {{{placeholder}}} in {template} (expected tmdb_id, imdb_id, season or episode)")]
    UnknownPlaceholder {
        placeholder: String,
        template: String,
    },
    #[error("provider {0} has no movie or tv template")]
    NoTemplates(String),
    #[error("no {0} templates defined")]
    MissingKind(MediaKind),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
