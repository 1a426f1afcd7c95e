use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// One reachability check against a URL, returning how long it took.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, url: &str) -> Result<Duration, ProbeError>;
}

/// `HEAD` request with a hard timeout. Any HTTP reply counts as reachable;
/// embed hosts routinely answer 403/405 to `HEAD` while still serving the
/// player page.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, url: &str) -> Result<Duration, ProbeError> {
        let parsed = Url::parse(url).map_err(|source| ProbeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.client.head(parsed).send()).await {
            Ok(Ok(_response)) => Ok(started.elapsed()),
            Ok(Err(err)) => Err(ProbeError::Network(err)),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_rejected_before_any_request() {
        let probe = HttpProbe::new(Client::new(), Duration::from_secs(1));
        let err = probe.check("not a url").await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl { .. }));
    }
}
