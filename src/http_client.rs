use std::time::Duration;

use reqwest::{Client, IntoUrl, RequestBuilder};

/// Engine-wide HTTP client configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
    pub default_max_concurrent_segments: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            default_max_concurrent_segments: 4,
        }
    }
}

/// Thin wrapper around `reqwest::Client`, the engine's sole HTTP
/// collaborator. Shared across all downloads and safe for concurrent use.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &EngineConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn get<T: IntoUrl>(&self, url: T) -> RequestBuilder {
        self.client.get(url)
    }
}
