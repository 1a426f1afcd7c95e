use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::CatalogError;
use crate::source::MediaRequest;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is valid"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    TmdbId,
    ImdbId,
    Season,
    Episode,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "tmdb_id" => Some(Placeholder::TmdbId),
            "imdb_id" => Some(Placeholder::ImdbId),
            "season" => Some(Placeholder::Season),
            "episode" => Some(Placeholder::Episode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value(Placeholder),
}

/// A mirror URL pattern with `{tmdb_id}`, `{imdb_id}`, `{season}` and
/// `{episode}` placeholders, validated once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        if !raw.starts_with("https://") && !raw.starts_with("http://") {
            return Err(CatalogError::NotHttp(raw.to_string()));
        }
        let mut segments = Vec::new();
        let mut cursor = 0;
        for captures in placeholder_pattern().captures_iter(raw) {
            let whole = captures.get(0).expect("capture group 0 always exists");
            let name = &captures[1];
            let placeholder =
                Placeholder::parse(name).ok_or_else(|| CatalogError::UnknownPlaceholder {
                    placeholder: name.to_string(),
                    template: raw.to_string(),
                })?;
            if whole.start() > cursor {
                segments.push(Segment::Literal(raw[cursor..whole.start()].to_string()));
            }
            segments.push(Segment::Value(placeholder));
            cursor = whole.end();
        }
        if cursor < raw.len() {
            segments.push(Segment::Literal(raw[cursor..].to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn render(&self, request: &MediaRequest) -> String {
        let mut url = String::with_capacity(self.raw.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Value(Placeholder::TmdbId) => url.push_str(&request.tmdb_id),
                Segment::Value(Placeholder::ImdbId) => url.push_str(request.imdb_or_tmdb()),
                Segment::Value(Placeholder::Season) => {
                    url.push_str(&request.season_or_default().to_string())
                }
                Segment::Value(Placeholder::Episode) => {
                    url.push_str(&request.episode_or_default().to_string())
                }
            }
        }
        url
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
