use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;

use super::DownloadError;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FetchedBody {
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Vec<u8>, DownloadError>>,
}

impl std::fmt::Debug for FetchedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens a streamed GET of a media file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBody, DownloadError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    idle_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Bounds the wait for response headers and for every following chunk.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody, DownloadError> {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "video/*")
            .send();
        let response = tokio::time::timeout(self.idle_timeout, request)
            .await
            .map_err(|_| DownloadError::Stalled(self.idle_timeout))??
            .error_for_status()?;
        let content_length = response.content_length().filter(|length| *length > 0);
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(DownloadError::from))
            .boxed();
        Ok(FetchedBody {
            content_length,
            chunks: until_idle(chunks, self.idle_timeout),
        })
    }
}

/// Ends the stream with [`DownloadError::Stalled`] once no chunk arrives
/// within `idle`.
pub(crate) fn until_idle(
    chunks: BoxStream<'static, Result<Vec<u8>, DownloadError>>,
    idle: Duration,
) -> BoxStream<'static, Result<Vec<u8>, DownloadError>> {
    stream::unfold(Some(chunks), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(idle, chunks.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(chunks))),
            Ok(None) => None,
            Err(_) => Some((Err(DownloadError::Stalled(idle)), None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn silent_body_ends_with_stall() {
        let chunks = stream::iter(vec![Ok(vec![1u8, 2, 3])])
            .chain(stream::pending())
            .boxed();
        let mut guarded = until_idle(chunks, Duration::from_secs(5));

        assert_eq!(guarded.next().await.unwrap().unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            guarded.next().await,
            Some(Err(DownloadError::Stalled(idle))) if idle == Duration::from_secs(5)
        ));
        assert!(guarded.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_body_is_not_a_stall() {
        let chunks = stream::iter(vec![Ok(vec![7u8])]).boxed();
        let collected: Vec<_> = until_idle(chunks, Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(collected.len(), 1);
        assert!(collected[0].is_ok());
    }
}
