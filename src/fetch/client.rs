//! reqwest-backed fetch client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};

use crate::error::{Error, FragmentError, Result};
use crate::fetch::types::{FetchClient, FetchRequest, FetchResponse};

/// Default browser-like user agent for segment requests.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// HTTP fetch client used for playlists, keys and segments.
#[derive(Debug, Clone)]
pub struct HttpFetchClient {
    client: Client,
}

impl HttpFetchClient {
    /// Create a new client with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, FragmentError> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.headers.is_empty() {
            builder = builder.header(header::CACHE_CONTROL, "no-cache");
        }

        tracing::debug!("GET {}", request.url);
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FragmentError::from))
            .boxed();

        Ok(FetchResponse {
            status,
            content_length,
            content_type,
            body,
        })
    }
}
