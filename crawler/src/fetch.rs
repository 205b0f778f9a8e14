use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest body the HTTP fetcher accepts.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} is not html ({content_type})")]
    NotHtml { url: String, content_type: String },

    #[error("{url} body exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("fetching {url} failed: {reason}")]
    Other { url: String, reason: String },
}

/// Retrieves the raw bytes of a page. Implementations do not retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let request_err = |source| FetchError::Request { url: url.to_string(), source };
        let resp = self.client.get(url.clone()).send().await.map_err(request_err)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: resp.status().as_u16() });
        }
        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            if !ct.starts_with("text/html") {
                return Err(FetchError::NotHtml { url: url.to_string(), content_type: ct.to_string() });
            }
        }
        let bytes = resp.bytes().await.map_err(request_err)?;
        if bytes.len() > MAX_BODY_BYTES {
            return Err(FetchError::TooLarge { url: url.to_string(), limit: MAX_BODY_BYTES });
        }
        Ok(bytes.to_vec())
    }
}
