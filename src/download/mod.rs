//! Image fetcher: downloads raw image bytes for a resolved URL.
//!
//! A fetch is a pure function of its URL. There is no cache and no dedup;
//! the sync controller issues at most one request per resolved photo. The
//! HTTP client is the only shared piece and `reqwest::Client` is already
//! safe to clone across tasks, so any number of downloads may run at once.

pub mod error;

pub use error::DownloadError;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;

/// Upper bound on a single image body. Second-smallest Flickr renditions are
/// a few kilobytes; anything past this is not a thumbnail.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// [`ImageFetcher`] that streams the response body into memory.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http {
                source: e,
                url: url.to_string(),
                bytes_read: 0,
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(DownloadError::TooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        let mut data: Vec<u8> = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Http {
                source: e,
                url: url.to_string(),
                bytes_read: data.len() as u64,
            })?;
            if data.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    url: url.to_string(),
                    limit: self.max_bytes,
                });
            }
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(DownloadError::EmptyBody(url.to_string()));
        }

        tracing::debug!(url, bytes = data.len(), "Downloaded image");
        Ok(data)
    }
}
