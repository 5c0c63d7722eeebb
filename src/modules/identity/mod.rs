//! Identity pool manager.
//!
//! Owns the proxy pool (filtered by protocol on every draw) and the
//! user-agent pool, evicts identities that fail, and raises lack/exhaustion
//! signals on the shared event bus.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::events::{
    EventBus, InvalidProxyEntriesEvent, LackOfProxyEvent, ProxyExhaustedEvent, ScraperEvent,
};
use super::pool::IdentityPool;
use super::proxy::{LoadedProxies, Protocol, Proxy, ProxySource, read_proxy_file};
use super::user_agents::{UserAgent, UserAgentError, read_user_agent_file};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no {0} proxy available")]
    LackOfProxy(Protocol),
    #[error("no user agent available")]
    LackOfUserAgent,
    #[error("user-agent source missing: {path:?}")]
    UserAgentSourceMissing { path: PathBuf },
    #[error("user agent cannot be sent as a header: {0:?}")]
    InvalidUserAgent(String),
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<UserAgentError> for IdentityError {
    fn from(err: UserAgentError) -> Self {
        match err {
            UserAgentError::FileMissing { path } => IdentityError::UserAgentSourceMissing { path },
            UserAgentError::Io { path, source } => IdentityError::Io { path, source },
            UserAgentError::InvalidHeader(agent) => IdentityError::InvalidUserAgent(agent),
        }
    }
}

/// Proxy and user-agent pools scoped to one scraper.
#[derive(Debug)]
pub struct IdentityManager {
    proxies: IdentityPool<Proxy>,
    user_agents: IdentityPool<UserAgent>,
    events: Arc<EventBus>,
    exhausted_protocols: HashSet<Protocol>,
    user_agents_exhausted: bool,
}

impl IdentityManager {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            proxies: IdentityPool::new(),
            user_agents: IdentityPool::new(),
            events,
            exhausted_protocols: HashSet::new(),
            user_agents_exhausted: false,
        }
    }

    pub fn proxies(&self) -> &IdentityPool<Proxy> {
        &self.proxies
    }

    pub fn user_agents(&self) -> &IdentityPool<UserAgent> {
        &self.user_agents
    }

    /// Replace the proxy pool. Clears the selection and re-arms exhaustion
    /// signals.
    pub fn set_proxies(&mut self, proxies: Vec<Proxy>) {
        self.proxies.replace(proxies);
        self.exhausted_protocols.clear();
    }

    pub fn set_user_agents(&mut self, user_agents: Vec<UserAgent>) {
        self.user_agents.replace(user_agents);
        self.user_agents_exhausted = false;
    }

    /// Install a loaded batch, reporting rejected entries.
    pub fn install_proxies(&mut self, loaded: LoadedProxies, source: ProxySource) -> usize {
        if loaded.dropped > 0 {
            self.events
                .emit(ScraperEvent::InvalidProxyEntries(InvalidProxyEntriesEvent {
                    source,
                    dropped: loaded.dropped,
                }));
        }
        let count = loaded.proxies.len();
        log::info!("loaded {count} proxies from {source}");
        self.set_proxies(loaded.proxies);
        count
    }

    /// Load proxies from `path`. Returns `Ok(false)` when the file does not
    /// exist so the caller can fall back to the live page.
    pub fn provide_proxies_from_file(&mut self, path: &Path) -> Result<bool, IdentityError> {
        let loaded = read_proxy_file(path).map_err(|source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match loaded {
            Some(loaded) => {
                self.install_proxies(loaded, ProxySource::File);
                Ok(true)
            }
            None => {
                log::debug!("proxy file {path:?} not found");
                Ok(false)
            }
        }
    }

    /// Load user agents from `path`. A missing file is fatal.
    pub fn provide_user_agents_from_file(&mut self, path: &Path) -> Result<usize, IdentityError> {
        let user_agents = read_user_agent_file(path)?;
        let count = user_agents.len();
        log::info!("loaded {count} user agents from {path:?}");
        self.set_user_agents(user_agents);
        Ok(count)
    }

    /// Select a proxy for `protocol`, never the same one twice in a row when
    /// an alternative exists.
    pub fn draw_proxy(&mut self, protocol: Protocol) -> Result<&Proxy, IdentityError> {
        match self.proxies.draw_where(|proxy| proxy.protocol() == protocol) {
            Some(index) => {
                let proxy = &self.proxies.entries()[index];
                log::debug!("drew proxy {proxy}");
                Ok(proxy)
            }
            None => {
                self.events
                    .emit(ScraperEvent::LackOfProxy(LackOfProxyEvent { protocol }));
                Err(IdentityError::LackOfProxy(protocol))
            }
        }
    }

    pub fn draw_user_agent(&mut self) -> Result<&UserAgent, IdentityError> {
        match self.user_agents.draw() {
            Some(index) => Ok(&self.user_agents.entries()[index]),
            None => {
                self.events.emit(ScraperEvent::LackOfUserAgent);
                Err(IdentityError::LackOfUserAgent)
            }
        }
    }

    pub fn current_proxy(&self) -> Option<&Proxy> {
        self.proxies.selected()
    }

    pub fn current_user_agent(&self) -> Option<&UserAgent> {
        self.user_agents.selected()
    }

    /// Count a connect timeout against the selected proxy. Returns a snapshot
    /// of the proxy after the increment.
    pub fn record_proxy_timeout(&mut self) -> Option<Proxy> {
        let proxy = self.proxies.selected_mut()?;
        proxy.record_timeout();
        Some(proxy.clone())
    }

    pub fn remove_proxy(&mut self, index: usize) -> Option<Proxy> {
        let removed = self.proxies.remove(index)?;
        let protocol = removed.protocol();
        log::warn!("evicted proxy {removed}");

        if self.proxies.count_where(|proxy| proxy.protocol() == protocol) == 0
            && self.exhausted_protocols.insert(protocol)
        {
            self.events
                .emit(ScraperEvent::ProxyExhausted(ProxyExhaustedEvent { protocol }));
        }

        Some(removed)
    }

    pub fn remove_user_agent(&mut self, index: usize) -> Option<UserAgent> {
        let removed = self.user_agents.remove(index)?;
        log::warn!("evicted user agent {removed}");

        if self.user_agents.is_empty() && !self.user_agents_exhausted {
            self.user_agents_exhausted = true;
            self.events.emit(ScraperEvent::UserAgentsExhausted);
        }

        Some(removed)
    }

    pub fn evict_current_proxy(&mut self) -> Option<Proxy> {
        let index = self.proxies.selected_index()?;
        self.remove_proxy(index)
    }

    pub fn evict_current_user_agent(&mut self) -> Option<UserAgent> {
        let index = self.user_agents.selected_index()?;
        self.remove_user_agent(index)
    }
}
