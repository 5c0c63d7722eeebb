//! Reqwest-based implementation of the `FetchTransport` trait.
//!
//! Keeps one `reqwest::Client` per (proxy, timeouts) combination and maps
//! reqwest's error predicates onto [`TransportError`] categories.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use reqwest::Client;
use tokio::sync::Mutex;

use super::{FetchRequest, FetchResponse, FetchTransport, TransportError};
use crate::modules::proxy::{Protocol, Proxy};
use crate::modules::user_agents::browser_headers;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<(Protocol, String)>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ClientKey {
    fn for_request(request: &FetchRequest) -> Self {
        Self {
            proxy: request
                .proxy
                .as_ref()
                .map(|proxy| (proxy.protocol(), proxy.address().to_string())),
            connect_timeout: request.connect_timeout,
            read_timeout: request.read_timeout,
        }
    }
}

/// Reqwest-backed transport with a client per proxy endpoint.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients currently cached.
    pub async fn cached_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    async fn client(&self, request: &FetchRequest) -> Result<Client, TransportError> {
        let key = ClientKey::for_request(request);
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .cookie_store(true)
            .connect_timeout(request.connect_timeout)
            .read_timeout(request.read_timeout);

        if let Some(proxy) = &request.proxy {
            let scoped = match proxy.protocol() {
                Protocol::Http => reqwest::Proxy::http(proxy.url()),
                Protocol::Https => reqwest::Proxy::https(proxy.url()),
            }
            .map_err(|err| TransportError::Proxy(err.to_string()))?;
            builder = builder.proxy(scoped);
        } else {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Other(error_chain(&err)))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl FetchTransport for ReqwestTransport {
    async fn get(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let client = self.client(request).await?;
        let proxied = request.proxy.is_some();

        let mut builder = client.get(request.url.clone());
        if let Some(agent) = &request.user_agent {
            let headers = browser_headers(agent)
                .map_err(|err| TransportError::InvalidHeader(err.to_string()))?;
            builder = builder.headers(headers);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| classify(&err, proxied))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify(&err, proxied))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
            url,
        })
    }

    async fn forget(&self, proxy: &Proxy) {
        let endpoint = Some((proxy.protocol(), proxy.address().to_string()));
        let mut guard = self.clients.lock().await;
        let before = guard.len();
        guard.retain(|key, _| key.proxy != endpoint);
        if guard.len() < before {
            log::debug!("dropped cached client for {proxy}");
        }
    }
}

static TLS_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(tls|ssl|certificate|handshake)\b")
        .case_insensitive(true)
        .build()
        .expect("valid tls error regex")
});

/// Map a reqwest failure onto the categories the fetch loop reacts to.
fn classify(err: &reqwest::Error, proxied: bool) -> TransportError {
    let detail = error_chain(err);

    if err.is_timeout() {
        if err.is_connect() {
            TransportError::ConnectTimeout(detail)
        } else {
            TransportError::ReadTimeout(detail)
        }
    } else if err.is_builder() {
        TransportError::InvalidHeader(detail)
    } else if TLS_ERROR_RE.is_match(&detail) {
        TransportError::Tls(detail)
    } else if err.is_connect() {
        if proxied {
            TransportError::Proxy(detail)
        } else {
            TransportError::Connection(detail)
        }
    } else if err.is_body() || err.is_decode() {
        TransportError::ChunkedEncoding(detail)
    } else if err.is_request() {
        TransportError::Connection(detail)
    } else {
        TransportError::Other(detail)
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
