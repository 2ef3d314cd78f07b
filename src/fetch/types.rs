//! Fetch capability consumed by the engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{Error, FragmentError, Result};

/// Per-request header overrides (name → value).
pub type Headers = BTreeMap<String, String>;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, FragmentError>>;

/// A GET request for one URL.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Headers,
}

impl FetchRequest {
    /// Plain GET with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
        }
    }

    /// Attach header overrides.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Response headers plus a readable byte stream.
pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: BodyStream,
}

impl FetchResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Cancellable HTTP GET.
///
/// Cancellation is expressed by dropping the returned future or the body
/// stream; implementations must abort the underlying transfer when that
/// happens.
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<FetchResponse, FragmentError>;
}

/// Fetch a URL and collect its whole body, failing on non-2xx.
pub async fn fetch_bytes(client: &dyn FetchClient, url: &str) -> Result<Bytes> {
    let response = client.fetch(FetchRequest::get(url)).await?;
    if !response.is_success() {
        return Err(Error::Http {
            status: response.status,
            url: url.to_string(),
        });
    }

    let mut body = response.body;
    let mut data = BytesMut::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data.freeze())
}

/// Fetch a URL as UTF-8 text.
pub async fn fetch_text(client: &dyn FetchClient, url: &str) -> Result<String> {
    let bytes = fetch_bytes(client, url).await?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::M3U8(format!("Response from {} is not UTF-8: {}", url, e)))
}
