use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use streamlux_core::{
    pick_download_source, BackendEndpoints, BackendError, Candidate, ConfigBundle, DownloadOutcome,
    DownloadProgress, DownloadRequest, DownloadService, EngineMetrics, HealthProber,
    HttpBackendClient, HttpFetcher, MediaKind, MediaRequest, MetricsHandle, ProviderCatalog,
    ResolveError, Resolver, ResolverConfig, SourceStatus, SpeedHint,
};
use thiserror::Error;
use tracing::info;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamlux_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "StreamLux source resolver control interface", long_about = None)]
pub struct Cli {
    /// Caminho do streamlux.toml principal
    #[arg(long, default_value = "configs/streamlux.toml")]
    pub config: PathBuf,
    /// Caminho alternativo para providers.toml
    #[arg(long)]
    pub providers: Option<PathBuf>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Ativa logs de depuração (RUST_LOG tem precedência)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lista os provedores de embed configurados
    Catalog(CatalogArgs),
    /// Resolve as fontes de um filme ou episódio
    Resolve(ResolveArgs),
    /// Verifica a saúde de URLs específicas
    Probe(ProbeArgs),
    /// Baixa a melhor fonte direta, com fallback para página externa
    Download(DownloadArgs),
    /// Mostra as URLs do backend para um título
    Endpoints(EndpointsArgs),
}

#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Filtrar por tipo de mídia (movie ou tv)
    #[arg(long = "type")]
    pub kind: Option<MediaKind>,
}

#[derive(Args, Debug, Clone)]
pub struct MediaArgs {
    /// Tipo de mídia (movie ou tv)
    #[arg(long = "type", default_value = "movie")]
    pub kind: MediaKind,
    /// Identificador TMDB
    #[arg(long)]
    pub id: String,
    /// Temporada (somente tv)
    #[arg(long)]
    pub season: Option<u32>,
    /// Episódio (somente tv)
    #[arg(long)]
    pub episode: Option<u32>,
    /// Identificador IMDb, ex.: tt0137523
    #[arg(long)]
    pub imdb: Option<String>,
    /// Título usado pelos scrapers e no nome do arquivo
    #[arg(long)]
    pub title: Option<String>,
}

impl MediaArgs {
    pub fn request(&self) -> Result<MediaRequest> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidArgument("--id must not be empty".to_string()));
        }
        let mut request = match self.kind {
            MediaKind::Movie => {
                if self.season.is_some() || self.episode.is_some() {
                    return Err(AppError::InvalidArgument(
                        "--season/--episode only apply to --type tv".to_string(),
                    ));
                }
                MediaRequest::movie(self.id.trim())
            }
            MediaKind::Tv => MediaRequest::episode(
                self.id.trim(),
                self.season.unwrap_or(1),
                self.episode.unwrap_or(1),
            ),
        };
        if let Some(imdb) = &self.imdb {
            request = request.with_imdb_id(imdb.trim());
        }
        if let Some(title) = &self.title {
            request = request.with_title(title.trim());
        }
        Ok(request)
    }
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub media: MediaArgs,
    /// Verifica a saúde de todas as fontes, não só da escolhida
    #[arg(long, default_value_t = false)]
    pub check_all: bool,
    /// Inclui a resposta bruta da rota /resolve do backend
    #[arg(long, default_value_t = false)]
    pub backend: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// URLs a verificar
    #[arg(required = true)]
    pub urls: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub media: MediaArgs,
    /// Baixa esta URL diretamente, sem resolver fontes
    #[arg(long)]
    pub url: Option<String>,
    /// Diretório de destino (substitui download.download_dir)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EndpointsArgs {
    #[command(flatten)]
    pub media: MediaArgs,
    /// URL de origem para as rotas de proxy e download
    #[arg(long)]
    pub target: Option<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Catalog(args) => {
            let report = context.catalog(args);
            render(&report, cli.format)?;
        }
        Commands::Resolve(args) => {
            let report = runtime.block_on(context.resolve(args))?;
            render(&report, cli.format)?;
        }
        Commands::Probe(args) => {
            let report = runtime.block_on(context.probe(args));
            render(&report, cli.format)?;
        }
        Commands::Download(args) => {
            let report = runtime.block_on(context.download(args))?;
            render(&report, cli.format)?;
        }
        Commands::Endpoints(args) => {
            let report = context.endpoints(args)?;
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    client: reqwest::Client,
    metrics: MetricsHandle,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut bundle = ConfigBundle::from_config_path(&cli.config)?;
        if let Some(providers) = &cli.providers {
            bundle.catalog = ProviderCatalog::load(providers)?;
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("streamluxctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            bundle,
            client,
            metrics: EngineMetrics::handle(),
        })
    }

    fn endpoints_base(&self) -> BackendEndpoints {
        BackendEndpoints::new(&self.bundle.streamlux.backend.base_url)
    }

    fn prober(&self) -> HealthProber {
        HealthProber::from_config(self.client.clone(), &self.bundle.streamlux.health)
            .with_metrics(Arc::clone(&self.metrics))
    }

    fn resolver(&self) -> Resolver {
        let config = &self.bundle.streamlux;
        Resolver::new(
            Arc::new(HttpBackendClient::new(self.client.clone(), &config.backend)),
            Arc::new(self.bundle.catalog.clone()),
            self.prober(),
            ResolverConfig::from(&config.resolver),
        )
    }

    fn metrics_snapshot(&self) -> EngineMetrics {
        self.metrics
            .lock()
            .map(|metrics| metrics.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn catalog(&self, args: &CatalogArgs) -> CatalogReport {
        let providers = self
            .bundle
            .catalog
            .providers()
            .iter()
            .filter(|provider| match args.kind {
                Some(kind) => provider.template_for(kind).is_some(),
                None => true,
            })
            .map(|provider| ProviderRow {
                id: provider.id.clone(),
                name: provider.name.clone(),
                quality: provider.quality.clone(),
                speed: provider.speed,
                movie: provider.movie.as_ref().map(ToString::to_string),
                tv: provider.tv.as_ref().map(ToString::to_string),
            })
            .collect();
        CatalogReport { providers }
    }

    async fn resolve(&self, args: &ResolveArgs) -> Result<ResolveReport> {
        let request = args.media.request()?;
        let resolver = self.resolver();
        let mut candidates = resolver.resolve(&request).await?;
        if args.check_all {
            resolver.prober().annotate(&mut candidates).await;
        }
        let backend = if args.backend {
            resolver.fetch_resolution(&request).await
        } else {
            None
        };
        Ok(ResolveReport {
            media: request.media_key(),
            candidates,
            backend,
            metrics: self.metrics_snapshot(),
        })
    }

    async fn probe(&self, args: &ProbeArgs) -> Vec<ProbeRow> {
        let prober = self.prober();
        let mut rows = Vec::with_capacity(args.urls.len());
        for url in &args.urls {
            let status = prober.probe(url).await;
            rows.push(ProbeRow {
                url: url.clone(),
                status,
            });
        }
        rows
    }

    async fn download(&self, args: &DownloadArgs) -> Result<DownloadReport> {
        let request = args.media.request()?;
        let candidates = match &args.url {
            Some(url) => vec![manual_candidate(url)],
            None => match self.resolver().resolve(&request).await {
                Ok(candidates) => candidates,
                Err(ResolveError::NoSources(media)) => {
                    info!(media = %media, "nothing resolved, continuing without a source");
                    Vec::new()
                }
            },
        };

        let mut section = self.bundle.streamlux.download.clone();
        if let Some(dir) = &args.dir {
            section.download_dir = dir.clone();
        }
        let fetcher = HttpFetcher::new(self.client.clone()).with_idle_timeout(section.idle_timeout());
        let service = DownloadService::new(
            Arc::new(fetcher),
            section,
            self.endpoints_base(),
        )
        .with_metrics(Arc::clone(&self.metrics));

        let download = DownloadRequest::for_media(&request);
        let source = pick_download_source(&candidates);
        let outcome = service
            .download(&download, source, |progress: &DownloadProgress| {
                info!(
                    progress = progress.progress,
                    speed = progress.speed.as_deref().unwrap_or("-"),
                    eta = progress.eta.as_deref().unwrap_or("-"),
                    "{}",
                    progress.message
                );
            })
            .await;
        Ok(DownloadReport {
            source: source.map(|candidate| candidate.name().to_string()),
            outcome,
        })
    }

    fn endpoints(&self, args: &EndpointsArgs) -> Result<EndpointReport> {
        let request = args.media.request()?;
        let endpoints = self.endpoints_base();
        let filename = DownloadRequest::for_media(&request).filename();
        let (proxy, download) = match &args.target {
            Some(target) => (
                Some(endpoints.proxy_url(target, None)?.to_string()),
                Some(endpoints.download_url(target, Some(&filename))?.to_string()),
            ),
            None => (None, None),
        };
        Ok(EndpointReport {
            scraper_resolve: endpoints.scraper_resolve_url(&request)?.to_string(),
            resolve: endpoints.resolve_url(&request)?.to_string(),
            proxy,
            download,
        })
    }
}

fn manual_candidate(url: &str) -> Candidate {
    Candidate::Embed(streamlux_core::EmbedCandidate {
        base: streamlux_core::CandidateBase {
            name: "manual".to_string(),
            url: url.to_string(),
            quality: "unknown".to_string(),
            priority: 0,
            status: SourceStatus::Checking,
            speed: SpeedHint::default(),
        },
        provider: "manual".to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct CatalogReport {
    pub providers: Vec<ProviderRow>,
}

#[derive(Debug, Serialize)]
pub struct ProviderRow {
    pub id: String,
    pub name: String,
    pub quality: String,
    pub speed: SpeedHint,
    pub movie: Option<String>,
    pub tv: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub media: String,
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<serde_json::Value>,
    pub metrics: EngineMetrics,
}

#[derive(Debug, Serialize)]
pub struct ProbeRow {
    pub url: String,
    pub status: SourceStatus,
}

#[derive(Debug, Serialize)]
pub struct DownloadReport {
    pub source: Option<String>,
    pub outcome: DownloadOutcome,
}

#[derive(Debug, Serialize)]
pub struct EndpointReport {
    pub scraper_resolve: String,
    pub resolve: String,
    pub proxy: Option<String>,
    pub download: Option<String>,
}

impl DisplayFallback for CatalogReport {
    fn display(&self) -> String {
        if self.providers.is_empty() {
            return "Nenhum provedor encontrado".to_string();
        }
        let mut lines = Vec::new();
        for provider in &self.providers {
            let kinds = match (&provider.movie, &provider.tv) {
                (Some(_), Some(_)) => "movie+tv",
                (Some(_), None) => "movie",
                (None, Some(_)) => "tv",
                (None, None) => "-",
            };
            lines.push(format!(
                "{} | {} | {} | {} | {}",
                provider.id, provider.name, provider.quality, provider.speed, kinds
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ResolveReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Fontes para {}:", self.media)];
        for (index, candidate) in self.candidates.iter().enumerate() {
            let kind = match candidate {
                Candidate::Embed(_) => "embed",
                Candidate::Direct(_) => "direct",
            };
            lines.push(format!(
                "{index:>2}. [{status}] {name} ({kind}, {quality}, prio={priority}) {url}",
                status = candidate.status(),
                name = candidate.name(),
                quality = candidate.quality(),
                priority = candidate.priority(),
                url = candidate.url(),
            ));
        }
        lines.push(format!(
            "Probes: {} (cache hits: {}, down: {})",
            self.metrics.probes_issued, self.metrics.probe_cache_hits, self.metrics.probes_down
        ));
        if let Some(backend) = &self.backend {
            lines.push(format!("Backend /resolve: {backend}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<ProbeRow> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for row in self {
            lines.push(format!("[{}] {}", row.status, row.url));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DownloadReport {
    fn display(&self) -> String {
        match &self.outcome {
            DownloadOutcome::Saved { path, bytes } => format!(
                "Arquivo salvo em {} ({} bytes) via {}",
                path.display(),
                bytes,
                self.source.as_deref().unwrap_or("-")
            ),
            DownloadOutcome::ExternalPage { url, notice } => format!("{notice}\n{url}"),
        }
    }
}

impl DisplayFallback for EndpointReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("scrapers/resolve: {}", self.scraper_resolve),
            format!("resolve:          {}", self.resolve),
        ];
        if let Some(proxy) = &self.proxy {
            lines.push(format!("proxy:            {proxy}"));
        }
        if let Some(download) = &self.download {
            lines.push(format!("download:         {download}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn prepare_test_context(command: Commands) -> Result<(TempDir, Cli, AppContext)> {
        let temp = TempDir::new()?;
        let configs_dir = temp.path().join("configs");
        fs::create_dir_all(&configs_dir)?;
        fs::copy("../configs/streamlux.toml", configs_dir.join("streamlux.toml"))?;
        fs::copy("../configs/providers.toml", configs_dir.join("providers.toml"))?;

        let cli = Cli {
            config: configs_dir.join("streamlux.toml"),
            providers: None,
            format: OutputFormat::Json,
            verbose: false,
            command,
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, cli, context))
    }

    fn media(kind: MediaKind, id: &str) -> MediaArgs {
        MediaArgs {
            kind,
            id: id.to_string(),
            season: None,
            episode: None,
            imdb: None,
            title: None,
        }
    }

    #[test]
    fn parses_resolve_arguments() {
        let cli = Cli::try_parse_from([
            "streamluxctl",
            "--format",
            "json",
            "resolve",
            "--type",
            "tv",
            "--id",
            "1399",
            "--season",
            "2",
            "--episode",
            "5",
            "--check-all",
            "--backend",
        ])
        .unwrap();
        let Commands::Resolve(args) = cli.command else {
            panic!("expected resolve command");
        };
        assert!(args.check_all);
        assert!(args.backend);
        assert_eq!(args.media.request().unwrap().media_key(), "tv-1399-s2e5");
    }

    #[test]
    fn movie_arguments_reject_episode_numbers() {
        let mut args = media(MediaKind::Movie, "550");
        args.season = Some(1);
        assert!(matches!(args.request(), Err(AppError::InvalidArgument(_))));
        assert!(matches!(
            media(MediaKind::Movie, "  ").request(),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn catalog_filters_by_kind() {
        let (_temp, _cli, context) =
            prepare_test_context(Commands::Catalog(CatalogArgs { kind: None })).unwrap();
        let all = context.catalog(&CatalogArgs { kind: None });
        let tv = context.catalog(&CatalogArgs {
            kind: Some(MediaKind::Tv),
        });
        assert_eq!(all.providers[0].name, "VidSrc.me");
        assert!(tv.providers.len() < all.providers.len());
        assert!(tv.providers.iter().all(|provider| provider.tv.is_some()));
    }

    #[test]
    fn providers_override_replaces_catalog() {
        let temp = TempDir::new().unwrap();
        let configs_dir = temp.path().join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/streamlux.toml", configs_dir.join("streamlux.toml")).unwrap();
        fs::copy("../configs/providers.toml", configs_dir.join("providers.toml")).unwrap();
        let providers = temp.path().join("mirrors.toml");
        fs::write(
            &providers,
            "[[provider]]\nid = \"only\"\nname = \"Only\"\nmovie = \"https://only.example/{tmdb_id}\"\ntv = \"https://only.example/{tmdb_id}/{season}/{episode}\"\n",
        )
        .unwrap();
        let cli = Cli {
            config: configs_dir.join("streamlux.toml"),
            providers: Some(providers),
            format: OutputFormat::Text,
            verbose: false,
            command: Commands::Catalog(CatalogArgs { kind: None }),
        };
        let context = AppContext::new(&cli).unwrap();
        let report = context.catalog(&CatalogArgs { kind: None });
        assert_eq!(report.providers.len(), 1);
        assert_eq!(report.display(), "only | Only | HD | medium | movie+tv");
    }

    #[test]
    fn endpoints_encode_title_and_target() {
        let (_temp, _cli, context) =
            prepare_test_context(Commands::Catalog(CatalogArgs { kind: None })).unwrap();
        let mut args = media(MediaKind::Movie, "533535");
        args.title = Some("Deadpool & Wolverine".to_string());
        let report = context
            .endpoints(&EndpointsArgs {
                media: args,
                target: Some("https://cdn.example/a b.mp4".to_string()),
            })
            .unwrap();
        assert!(report
            .scraper_resolve
            .ends_with("scrapers/resolve?type=movie&id=533535&title=Deadpool+%26+Wolverine"));
        let download = report.download.unwrap();
        assert!(download.contains("url=https%3A%2F%2Fcdn.example%2Fa+b.mp4"));
        assert!(download.ends_with("filename=deadpool___wolverine.mp4"));
    }

    #[test]
    fn json_report_serializes_candidate_kind() {
        let report = ResolveReport {
            media: "movie-550".to_string(),
            candidates: vec![manual_candidate("https://cdn.example/a.mp4")],
            backend: None,
            metrics: EngineMetrics::default(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["candidates"][0]["kind"], "embed");
        assert_eq!(value["candidates"][0]["provider"], "manual");
        assert!(value.get("backend").is_none());
    }
}
