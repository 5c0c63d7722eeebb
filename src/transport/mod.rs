//! HTTP transport abstraction used by the fetch loop.
//!
//! The scraper only needs one capability: send a single GET through an
//! optional proxy with an optional user agent, and report failures in a small
//! set of categories it knows how to react to.

pub mod reqwest_client;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::modules::proxy::Proxy;
use crate::modules::user_agents::UserAgent;

pub use reqwest_client::ReqwestTransport;

/// One GET attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub proxy: Option<Proxy>,
    pub user_agent: Option<UserAgent>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Response returned by the transport. Any HTTP status counts as a response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl FetchResponse {
    pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url,
        }
    }
}

/// Categorised transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect timeout: {0}")]
    ConnectTimeout(String),
    #[error("read timeout: {0}")]
    ReadTimeout(String),
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("response body interrupted: {0}")]
    ChunkedEncoding(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Contract for the HTTP layer behind [`crate::StealthScraper`].
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;

    /// Drop any per-proxy state once `proxy` has left the pool.
    async fn forget(&self, _proxy: &Proxy) {}
}
