use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "tv" | "series" => Ok(MediaKind::Tv),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// Identifies one playable item: a movie, or one episode of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub tmdb_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub imdb_id: Option<String>,
    pub title: Option<String>,
}

impl MediaRequest {
    pub fn movie(tmdb_id: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Movie,
            tmdb_id: tmdb_id.into(),
            season: None,
            episode: None,
            imdb_id: None,
            title: None,
        }
    }

    pub fn episode(tmdb_id: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            kind: MediaKind::Tv,
            tmdb_id: tmdb_id.into(),
            season: Some(season),
            episode: Some(episode),
            imdb_id: None,
            title: None,
        }
    }

    pub fn with_imdb_id(mut self, imdb_id: impl Into<String>) -> Self {
        let imdb_id = imdb_id.into();
        self.imdb_id = (!imdb_id.trim().is_empty()).then_some(imdb_id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// IMDb id when known, otherwise the TMDB id. Templates that expect an
    /// IMDb id accept the numeric id on most mirrors.
    pub fn imdb_or_tmdb(&self) -> &str {
        self.imdb_id.as_deref().unwrap_or(&self.tmdb_id)
    }

    pub fn season_or_default(&self) -> u32 {
        self.season.unwrap_or(1)
    }

    pub fn episode_or_default(&self) -> u32 {
        self.episode.unwrap_or(1)
    }

    pub fn media_key(&self) -> String {
        match self.kind {
            MediaKind::Movie => format!("movie-{}", self.tmdb_id),
            MediaKind::Tv => format!(
                "tv-{}-s{}e{}",
                self.tmdb_id,
                self.season_or_default(),
                self.episode_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Embed,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Slow,
    Down,
    Checking,
}

impl SourceStatus {
    /// Active and slow sources are worth trying; down is confirmed dead and
    /// checking has not been probed yet.
    pub fn is_usable(&self) -> bool {
        matches!(self, SourceStatus::Active | SourceStatus::Slow)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceStatus::Active => "active",
            SourceStatus::Slow => "slow",
            SourceStatus::Down => "down",
            SourceStatus::Checking => "checking",
        };
        f.write_str(label)
    }
}

/// Advisory throughput hint carried from the provider data. Never used for
/// ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedHint {
    Fast,
    #[default]
    Medium,
    Slow,
}

impl fmt::Display for SpeedHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SpeedHint::Fast => "fast",
            SpeedHint::Medium => "medium",
            SpeedHint::Slow => "slow",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBase {
    pub name: String,
    pub url: String,
    pub quality: String,
    #[serde(default)]
    pub speed: SpeedHint,
    pub priority: i64,
    pub status: SourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedCandidate {
    #[serde(flatten)]
    pub base: CandidateBase,
    /// Template id from the provider table.
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperSite {
    Fzmovies,
    Netnaija,
    O2tvseries,
}

impl fmt::Display for ScraperSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScraperSite::Fzmovies => "FZMovies",
            ScraperSite::Netnaija => "NetNaija",
            ScraperSite::O2tvseries => "O2TVSeries",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectCandidate {
    #[serde(flatten)]
    pub base: CandidateBase,
    pub origin: ScraperSite,
}

/// One playable or downloadable reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Candidate {
    Embed(EmbedCandidate),
    Direct(DirectCandidate),
}

impl Candidate {
    pub fn base(&self) -> &CandidateBase {
        match self {
            Candidate::Embed(embed) => &embed.base,
            Candidate::Direct(direct) => &direct.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut CandidateBase {
        match self {
            Candidate::Embed(embed) => &mut embed.base,
            Candidate::Direct(direct) => &mut direct.base,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Candidate::Embed(_) => SourceKind::Embed,
            Candidate::Direct(_) => SourceKind::Direct,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn url(&self) -> &str {
        &self.base().url
    }

    pub fn quality(&self) -> &str {
        &self.base().quality
    }

    pub fn speed(&self) -> SpeedHint {
        self.base().speed
    }

    pub fn priority(&self) -> i64 {
        self.base().priority
    }

    pub fn status(&self) -> SourceStatus {
        self.base().status
    }

    pub fn set_status(&mut self, status: SourceStatus) {
        self.base_mut().status = status;
    }

    pub fn set_priority(&mut self, priority: i64) {
        self.base_mut().priority = priority;
    }
}
