//! Raw HTTP access for the resolver.

use std::future::Future;
use std::time::Duration;

use crate::error::{OperatorError, Result};

/// Fetches a document by URL.
///
/// The resolver only ever needs bodies as text: job records are JSON and
/// artifact indexes are HTML listings.
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, failing on transport errors and non-success statuses.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dowser/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OperatorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OperatorError::fetch(url, e))?
            .error_for_status()
            .map_err(|e| OperatorError::fetch(url, e))?;

        response.text().await.map_err(|e| OperatorError::fetch(url, e))
    }
}
