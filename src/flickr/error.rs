use thiserror::Error;

/// Failures talking to the photo-search API.
///
/// Every variant is terminal for the call that produced it. Callers decide
/// whether that means one photo is skipped or a whole album fails to load.
#[derive(Debug, Error)]
pub enum FlickrError {
    #[error("Network error calling {method}: {source}")]
    Network {
        method: &'static str,
        source: reqwest::Error,
    },

    #[error("HTTP error {status} calling {method}")]
    HttpStatus { method: &'static str, status: u16 },

    #[error("Malformed {method} response: {source}")]
    Decode {
        method: &'static str,
        source: serde_json::Error,
    },

    #[error("Flickr API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Photo {photo_id} offers {offered} size(s), need at least two")]
    NoUsableSize { photo_id: String, offered: usize },
}

impl FlickrError {
    /// Transport, timeout or non-2xx failures.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::HttpStatus { .. })
    }

    /// The server answered, but not with something we can use.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Api { .. })
    }
}
