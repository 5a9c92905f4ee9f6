use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::error::FlickrError;

/// Response from `flickr.photos.search`.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub photos: PhotoPage,
}

#[derive(Debug, Deserialize)]
pub struct PhotoPage {
    #[serde(default)]
    pub photo: Vec<PhotoEntry>,
    /// Flickr sends this as a number or a numeric string depending on the endpoint version.
    #[serde(default, deserialize_with = "flexible_u32")]
    pub total: Option<u32>,
}

#[allow(dead_code)] // Wire format; only `id` is consumed
#[derive(Debug, Deserialize)]
pub struct PhotoEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Response from `flickr.photos.getSizes`.
#[derive(Debug, Deserialize)]
pub struct SizesResponse {
    pub sizes: SizeList,
}

#[derive(Debug, Deserialize)]
pub struct SizeList {
    #[serde(default)]
    pub size: Vec<Size>,
}

/// One candidate rendition of a photo, smallest first.
#[allow(dead_code)] // Wire format; only `source` is consumed
#[derive(Debug, Clone, Deserialize)]
pub struct Size {
    pub label: String,
    #[serde(default, deserialize_with = "flexible_u32")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "flexible_u32")]
    pub height: Option<u32>,
    /// Direct image URL.
    pub source: String,
    /// Flickr page for this size, not the image itself.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
}

fn flexible_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// Decode a Flickr JSON body, turning the `{"stat":"fail"}` envelope into
/// [`FlickrError::Api`] before attempting the typed decode.
pub(crate) fn decode<T: DeserializeOwned>(method: &'static str, body: &str) -> Result<T, FlickrError> {
    let value: Value =
        serde_json::from_str(body).map_err(|source| FlickrError::Decode { method, source })?;

    if value.get("stat").and_then(Value::as_str) == Some("fail") {
        return Err(FlickrError::Api {
            code: value.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    serde_json::from_value(value).map_err(|source| FlickrError::Decode { method, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_deserialize() {
        let body = r#"{
            "photos": {
                "page": 1, "pages": 480, "perpage": 21, "total": "10066",
                "photo": [
                    {"id": "48861425827", "owner": "1@N00", "secret": "a", "server": "65535",
                     "farm": 66, "title": "Golden Gate", "ispublic": 1},
                    {"id": "48861425828", "owner": "1@N00", "secret": "b", "server": "65535",
                     "farm": 66, "title": "", "ispublic": 1}
                ]
            },
            "stat": "ok"
        }"#;
        let resp: SearchResponse = decode("flickr.photos.search", body).unwrap();
        assert_eq!(resp.photos.photo.len(), 2);
        assert_eq!(resp.photos.photo[0].id, "48861425827");
        assert_eq!(resp.photos.photo[0].title.as_deref(), Some("Golden Gate"));
        assert_eq!(resp.photos.total, Some(10066));
    }

    #[test]
    fn test_search_response_zero_results() {
        let body = r#"{"photos":{"page":1,"pages":0,"perpage":21,"total":0,"photo":[]},"stat":"ok"}"#;
        let resp: SearchResponse = decode("flickr.photos.search", body).unwrap();
        assert!(resp.photos.photo.is_empty());
        assert_eq!(resp.photos.total, Some(0));
    }

    #[test]
    fn test_sizes_response_deserialize() {
        let body = r#"{
            "sizes": {
                "canblog": 0, "canprint": 0, "candownload": 1,
                "size": [
                    {"label": "Square", "width": 75, "height": 75,
                     "source": "https://live.staticflickr.com/1/1_s.jpg",
                     "url": "https://www.flickr.com/photos/x/1/sizes/sq/", "media": "photo"},
                    {"label": "Large Square", "width": "150", "height": "150",
                     "source": "https://live.staticflickr.com/1/1_q.jpg",
                     "url": "https://www.flickr.com/photos/x/1/sizes/q/", "media": "photo"}
                ]
            },
            "stat": "ok"
        }"#;
        let resp: SizesResponse = decode("flickr.photos.getSizes", body).unwrap();
        let sizes = resp.sizes.size;
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].width, Some(75));
        assert_eq!(sizes[1].width, Some(150));
        assert_eq!(sizes[1].label, "Large Square");
        assert_eq!(sizes[1].source, "https://live.staticflickr.com/1/1_q.jpg");
    }

    #[test]
    fn test_fail_envelope_becomes_api_error() {
        let body = r#"{"stat":"fail","code":100,"message":"Invalid API Key (Key has invalid format)"}"#;
        let err = decode::<SearchResponse>("flickr.photos.search", body).unwrap_err();
        match err {
            FlickrError::Api { code, message } => {
                assert_eq!(code, 100);
                assert!(message.starts_with("Invalid API Key"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let err = decode::<SearchResponse>("flickr.photos.search", "jsonFlickrApi({").unwrap_err();
        assert!(matches!(err, FlickrError::Decode { .. }));

        let err = decode::<SizesResponse>("flickr.photos.getSizes", r#"{"stat":"ok"}"#).unwrap_err();
        assert!(err.is_decode());
    }
}
