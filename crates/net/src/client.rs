//! Thin HTTP client wrapper

use apkforge_errors::{NetworkError, Result};
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600), // large archives on slow links
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("apkforge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Shared HTTP client for package and payload transfers
#[derive(Debug, Clone)]
pub struct NetClient {
    client: reqwest::Client,
}

impl NetClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &NetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| NetworkError::DownloadFailed(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&NetConfig::default())
    }

    /// Issue a GET request.
    ///
    /// # Errors
    ///
    /// Returns a network error on connection failure.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::DownloadFailed(e.to_string()).into())
    }
}
