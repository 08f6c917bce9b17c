use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {reference}")]
    Status { reference: String, status: u16 },

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolves image references to raw bytes. References with an http(s)
/// scheme go over the wire; anything else is read as a filesystem path.
/// Every fetch is a read-only, idempotent operation with no caching.
pub struct ImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// A fetch that exceeds `timeout` fails with a recoverable error
    /// instead of stalling the whole scan.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        tokio::time::timeout(self.timeout, self.fetch_inner(reference))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    async fn fetch_inner(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self.client.get(reference).send().await?;
            if !response.status().is_success() {
                return Err(FetchError::Status {
                    reference: reference.to_string(),
                    status: response.status().as_u16(),
                });
            }
            Ok(response.bytes().await?.to_vec())
        } else {
            Ok(tokio::fs::read(reference).await?)
        }
    }
}

impl Default for ImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}
