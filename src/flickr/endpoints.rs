//! Request URLs for the Flickr REST endpoint.

use url::Url;

use crate::types::Coordinate;

pub const DEFAULT_API_BASE: &str = "https://api.flickr.com/services/rest";
pub const SEARCH_METHOD: &str = "flickr.photos.search";
pub const SIZES_METHOD: &str = "flickr.photos.getSizes";

/// Photos requested per location. Only the first page is ever fetched.
pub const DEFAULT_PAGE_SIZE: u32 = 21;

/// Flickr rejects `per_page` above this.
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
        })
    }

    /// `flickr.photos.search` for a single page of photos near `coordinate`.
    pub fn search(&self, api_key: &str, coordinate: Coordinate, page_size: u32) -> Url {
        self.method_url(
            api_key,
            SEARCH_METHOD,
            &[
                ("lat", coordinate.latitude().to_string()),
                ("lon", coordinate.longitude().to_string()),
                ("per_page", page_size.to_string()),
                ("page", "1".to_string()),
            ],
        )
    }

    /// `flickr.photos.getSizes` for one photo.
    pub fn sizes(&self, api_key: &str, photo_id: &str) -> Url {
        self.method_url(api_key, SIZES_METHOD, &[("photo_id", photo_id.to_string())])
    }

    fn method_url(&self, api_key: &str, method: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", api_key);
            query.append_pair("method", method);
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("format", "json");
            query.append_pair("nojsoncallback", "1");
        }
        url
    }
}
