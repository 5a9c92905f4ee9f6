//! Remote photo service: turns a coordinate into a page of photo stubs, then
//! resolves each stub into a concrete image URL with a second call.

pub mod endpoints;
pub mod error;
pub mod responses;

pub use endpoints::{Endpoints, DEFAULT_API_BASE, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use error::FlickrError;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::types::Coordinate;
use responses::{SearchResponse, Size, SizesResponse};

/// Index into the size list (smallest first) used for downloads: the
/// second-smallest rendition.
pub const DOWNLOAD_SIZE_INDEX: usize = 1;

/// A remote photo reference before URL resolution. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoStub {
    pub id: String,
}

/// A photo identifier paired with the URL its bytes can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPhoto {
    pub id: String,
    pub url: String,
}

/// Source of photos for a location.
///
/// Object-safe so the sync controller can hold `Arc<dyn PhotoSource>` and
/// tests can substitute a scripted source.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    /// One fixed-size page of photos near `coordinate`. Zero results is an
    /// empty vector, not an error.
    async fn search_photos(&self, coordinate: Coordinate) -> Result<Vec<PhotoStub>, FlickrError>;

    /// Pick the download URL for one stub.
    async fn resolve_download_url(&self, stub: &PhotoStub) -> Result<ResolvedPhoto, FlickrError>;
}

/// Deterministically choose the rendition at [`DOWNLOAD_SIZE_INDEX`].
pub fn select_download_url(photo_id: &str, sizes: &[Size]) -> Result<ResolvedPhoto, FlickrError> {
    match sizes.get(DOWNLOAD_SIZE_INDEX) {
        Some(size) => Ok(ResolvedPhoto {
            id: photo_id.to_string(),
            url: size.source.clone(),
        }),
        None => Err(FlickrError::NoUsableSize {
            photo_id: photo_id.to_string(),
            offered: sizes.len(),
        }),
    }
}

/// Static credentials and request shape for the Flickr client.
#[derive(Clone)]
pub struct FlickrConfig {
    pub api_key: String,
    pub api_base: String,
    pub page_size: u32,
}

impl std::fmt::Debug for FlickrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlickrConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// [`PhotoSource`] backed by the Flickr REST API.
pub struct FlickrClient {
    client: Client,
    endpoints: Endpoints,
    api_key: String,
    page_size: u32,
}

impl std::fmt::Debug for FlickrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlickrClient")
            .field("endpoints", &self.endpoints)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl FlickrClient {
    pub fn new(client: Client, config: &FlickrConfig) -> anyhow::Result<Self> {
        let endpoints = Endpoints::new(&config.api_base)
            .with_context(|| format!("Invalid API base URL '{}'", config.api_base))?;
        Ok(Self {
            client,
            endpoints,
            api_key: config.api_key.clone(),
            page_size: config.page_size,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: Url,
    ) -> Result<T, FlickrError> {
        // The query string carries the API key, so only the path is logged.
        debug!(method, path = url.path(), "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FlickrError::Network { method, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlickrError::HttpStatus {
                method,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| FlickrError::Network { method, source })?;
        responses::decode(method, &body)
    }
}

#[async_trait]
impl PhotoSource for FlickrClient {
    async fn search_photos(&self, coordinate: Coordinate) -> Result<Vec<PhotoStub>, FlickrError> {
        let url = self
            .endpoints
            .search(&self.api_key, coordinate, self.page_size);
        let response: SearchResponse = self.get_json(endpoints::SEARCH_METHOD, url).await?;

        debug!(
            lat = coordinate.latitude(),
            lon = coordinate.longitude(),
            returned = response.photos.photo.len(),
            total = ?response.photos.total,
            "Photo search complete"
        );

        Ok(response
            .photos
            .photo
            .into_iter()
            .map(|entry| PhotoStub { id: entry.id })
            .collect())
    }

    async fn resolve_download_url(&self, stub: &PhotoStub) -> Result<ResolvedPhoto, FlickrError> {
        let url = self.endpoints.sizes(&self.api_key, &stub.id);
        let response: SizesResponse = self.get_json(endpoints::SIZES_METHOD, url).await?;
        select_download_url(&stub.id, &response.sizes.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(label: &str, source: &str) -> Size {
        Size {
            label: label.to_string(),
            width: None,
            height: None,
            source: source.to_string(),
            url: None,
            media: Some("photo".to_string()),
        }
    }

    #[test]
    fn test_select_second_smallest() {
        let sizes = vec![
            size("Square", "https://img/s.jpg"),
            size("Large Square", "https://img/q.jpg"),
            size("Thumbnail", "https://img/t.jpg"),
        ];
        let resolved = select_download_url("99", &sizes).unwrap();
        assert_eq!(
            resolved,
            ResolvedPhoto {
                id: "99".into(),
                url: "https://img/q.jpg".into()
            }
        );
    }

    #[test]
    fn test_single_size_is_unusable() {
        let sizes = vec![size("Square", "https://img/s.jpg")];
        let err = select_download_url("99", &sizes).unwrap_err();
        assert!(matches!(
            err,
            FlickrError::NoUsableSize { ref photo_id, offered: 1 } if photo_id == "99"
        ));
    }

    #[test]
    fn test_no_sizes_is_unusable() {
        let err = select_download_url("7", &[]).unwrap_err();
        assert!(matches!(err, FlickrError::NoUsableSize { offered: 0, .. }));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = FlickrConfig {
            api_key: "super-secret".into(),
            api_base: DEFAULT_API_BASE.into(),
            page_size: DEFAULT_PAGE_SIZE,
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_client_rejects_bad_base() {
        let config = FlickrConfig {
            api_key: "k".into(),
            api_base: "::nope::".into(),
            page_size: DEFAULT_PAGE_SIZE,
        };
        assert!(FlickrClient::new(Client::new(), &config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let config = FlickrConfig {
            api_key: "k".into(),
            api_base: "http://127.0.0.1:1/services/rest".into(),
            page_size: DEFAULT_PAGE_SIZE,
        };
        let client = FlickrClient::new(Client::new(), &config).unwrap();
        let coord = Coordinate::new(37.0, -122.0).unwrap();

        let err = client.search_photos(coord).await.unwrap_err();
        assert!(err.is_network(), "expected network error, got {err:?}");

        let stub = PhotoStub { id: "1".into() };
        let err = client.resolve_download_url(&stub).await.unwrap_err();
        assert!(err.is_network(), "expected network error, got {err:?}");
    }
}
