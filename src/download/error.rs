use thiserror::Error;

/// Typed download errors. All of them are network-class failures: the
/// fetcher never touches disk, and a failed photo is simply skipped.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_read}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_read: u64,
    },

    #[error("Empty body downloading {0}")]
    EmptyBody(String),

    #[error("Body for {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

impl DownloadError {
    /// HTTP status of the failed response, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            DownloadError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            DownloadError::EmptyBody(_) | DownloadError::TooLarge { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_reports_status() {
        let e = DownloadError::HttpStatus {
            status: 404,
            url: "x".into(),
        };
        assert_eq!(e.status(), Some(404));
        assert_eq!(e.to_string(), "HTTP error 404 downloading x");
    }

    #[test]
    fn test_empty_body_has_no_status() {
        let e = DownloadError::EmptyBody("x".into());
        assert_eq!(e.status(), None);
    }

    #[test]
    fn test_connection_error_has_no_status() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(reqwest::Client::new().get("http://127.0.0.1:1").send())
            .unwrap_err();
        let e = DownloadError::Http {
            source: err,
            url: "x".into(),
            bytes_read: 0,
        };
        assert_eq!(e.status(), None);
    }
}
