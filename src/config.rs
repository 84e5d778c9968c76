use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const API_URL_ENV: &str = "CROPSCAN_API_URL";
pub const DEFAULT_API_URL: &str = "http://192.168.1.100:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_url: String,
}

impl ClientConfig {
    /// Creates a config for the given base URL, validating it and trimming a trailing slash
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let mut api_url = api_url.into().trim().to_string();

        url::Url::parse(&api_url).map_err(|e| anyhow!("Invalid API URL '{}': {}", api_url, e))?;

        while api_url.ends_with('/') {
            api_url.pop();
        }

        Ok(Self { api_url })
    }

    /// Creates a config from environment variables, falling back to the default service address
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| {
            tracing::debug!(
                "{} not set, using default {}",
                API_URL_ENV,
                DEFAULT_API_URL
            );
            DEFAULT_API_URL.to_string()
        });

        Self::new(api_url)
    }

    /// Gets the base URL every endpoint path is appended to
    pub fn get_api_url(&self) -> &str {
        &self.api_url
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}
