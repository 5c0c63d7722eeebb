//! Event bus for fetch and identity-pool transitions.
//!
//! Every signal carries one fixed-shape payload, and handlers implement one
//! method per event kind, so subscribers never have to agree with producers on
//! argument lists. Dispatch is synchronous and happens on the caller's thread
//! in registration order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use url::Url;

use super::proxy::{Protocol, Proxy, ProxySource};

/// Closed set of signals the scraper can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ConnectTimeout,
    ReadTimeout,
    ConnectionError,
    ChunkedEncodingError,
    SslError,
    ProxyError,
    InvalidUserAgent,
    ProxyExhausted,
    UserAgentsExhausted,
    LackOfProxy,
    LackOfUserAgent,
    StealthModeChanged,
    InvalidProxyEntries,
}

impl Signal {
    pub const ALL: [Signal; 13] = [
        Signal::ConnectTimeout,
        Signal::ReadTimeout,
        Signal::ConnectionError,
        Signal::ChunkedEncodingError,
        Signal::SslError,
        Signal::ProxyError,
        Signal::InvalidUserAgent,
        Signal::ProxyExhausted,
        Signal::UserAgentsExhausted,
        Signal::LackOfProxy,
        Signal::LackOfUserAgent,
        Signal::StealthModeChanged,
        Signal::InvalidProxyEntries,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::ConnectTimeout => "connect_timeout",
            Signal::ReadTimeout => "read_timeout",
            Signal::ConnectionError => "connection_error",
            Signal::ChunkedEncodingError => "chunked_encoding_error",
            Signal::SslError => "ssl_error",
            Signal::ProxyError => "proxy_error",
            Signal::InvalidUserAgent => "invalid_user_agent",
            Signal::ProxyExhausted => "proxy_exhausted",
            Signal::UserAgentsExhausted => "user_agents_exhausted",
            Signal::LackOfProxy => "lack_of_proxy",
            Signal::LackOfUserAgent => "lack_of_user_agent",
            Signal::StealthModeChanged => "stealth_mode_changed",
            Signal::InvalidProxyEntries => "invalid_proxy_entries",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry progress against a ceiling, rendered as `current/max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: u32,
    pub max: u32,
}

impl Progress {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current, max }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.max)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectTimeoutEvent {
    /// `None` when the request went out without a proxy.
    pub proxy: Option<Proxy>,
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct ReadTimeoutEvent {
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct ConnectionErrorEvent {
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct ChunkedEncodingErrorEvent {
    pub progress: Progress,
}

#[derive(Debug, Clone)]
pub struct SslErrorEvent {
    pub proxy: Proxy,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct ProxyErrorEvent {
    pub proxy: Proxy,
}

#[derive(Debug, Clone)]
pub struct InvalidUserAgentEvent {
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ProxyExhaustedEvent {
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct LackOfProxyEvent {
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct StealthModeChangedEvent {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct InvalidProxyEntriesEvent {
    pub source: ProxySource,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub enum ScraperEvent {
    ConnectTimeout(ConnectTimeoutEvent),
    ReadTimeout(ReadTimeoutEvent),
    ConnectionError(ConnectionErrorEvent),
    ChunkedEncodingError(ChunkedEncodingErrorEvent),
    SslError(SslErrorEvent),
    ProxyError(ProxyErrorEvent),
    InvalidUserAgent(InvalidUserAgentEvent),
    ProxyExhausted(ProxyExhaustedEvent),
    UserAgentsExhausted,
    LackOfProxy(LackOfProxyEvent),
    LackOfUserAgent,
    StealthModeChanged(StealthModeChangedEvent),
    InvalidProxyEntries(InvalidProxyEntriesEvent),
}

impl ScraperEvent {
    pub fn signal(&self) -> Signal {
        match self {
            ScraperEvent::ConnectTimeout(_) => Signal::ConnectTimeout,
            ScraperEvent::ReadTimeout(_) => Signal::ReadTimeout,
            ScraperEvent::ConnectionError(_) => Signal::ConnectionError,
            ScraperEvent::ChunkedEncodingError(_) => Signal::ChunkedEncodingError,
            ScraperEvent::SslError(_) => Signal::SslError,
            ScraperEvent::ProxyError(_) => Signal::ProxyError,
            ScraperEvent::InvalidUserAgent(_) => Signal::InvalidUserAgent,
            ScraperEvent::ProxyExhausted(_) => Signal::ProxyExhausted,
            ScraperEvent::UserAgentsExhausted => Signal::UserAgentsExhausted,
            ScraperEvent::LackOfProxy(_) => Signal::LackOfProxy,
            ScraperEvent::LackOfUserAgent => Signal::LackOfUserAgent,
            ScraperEvent::StealthModeChanged(_) => Signal::StealthModeChanged,
            ScraperEvent::InvalidProxyEntries(_) => Signal::InvalidProxyEntries,
        }
    }

    fn deliver(&self, handler: &dyn EventHandler) {
        match self {
            ScraperEvent::ConnectTimeout(event) => handler.on_connect_timeout(event),
            ScraperEvent::ReadTimeout(event) => handler.on_read_timeout(event),
            ScraperEvent::ConnectionError(event) => handler.on_connection_error(event),
            ScraperEvent::ChunkedEncodingError(event) => handler.on_chunked_encoding_error(event),
            ScraperEvent::SslError(event) => handler.on_ssl_error(event),
            ScraperEvent::ProxyError(event) => handler.on_proxy_error(event),
            ScraperEvent::InvalidUserAgent(event) => handler.on_invalid_user_agent(event),
            ScraperEvent::ProxyExhausted(event) => handler.on_proxy_exhausted(event),
            ScraperEvent::UserAgentsExhausted => handler.on_user_agents_exhausted(),
            ScraperEvent::LackOfProxy(event) => handler.on_lack_of_proxy(event),
            ScraperEvent::LackOfUserAgent => handler.on_lack_of_user_agent(),
            ScraperEvent::StealthModeChanged(event) => handler.on_stealth_mode_changed(event),
            ScraperEvent::InvalidProxyEntries(event) => handler.on_invalid_proxy_entries(event),
        }
    }
}

/// Observer of scraper events. Only the methods of subscribed signals are
/// ever invoked.
pub trait EventHandler: Send + Sync {
    fn on_connect_timeout(&self, _event: &ConnectTimeoutEvent) {}
    fn on_read_timeout(&self, _event: &ReadTimeoutEvent) {}
    fn on_connection_error(&self, _event: &ConnectionErrorEvent) {}
    fn on_chunked_encoding_error(&self, _event: &ChunkedEncodingErrorEvent) {}
    fn on_ssl_error(&self, _event: &SslErrorEvent) {}
    fn on_proxy_error(&self, _event: &ProxyErrorEvent) {}
    fn on_invalid_user_agent(&self, _event: &InvalidUserAgentEvent) {}
    fn on_proxy_exhausted(&self, _event: &ProxyExhaustedEvent) {}
    fn on_user_agents_exhausted(&self) {}
    fn on_lack_of_proxy(&self, _event: &LackOfProxyEvent) {}
    fn on_lack_of_user_agent(&self) {}
    fn on_stealth_mode_changed(&self, _event: &StealthModeChangedEvent) {}
    fn on_invalid_proxy_entries(&self, _event: &InvalidProxyEntriesEvent) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("observer already registered for signal '{0}'")]
    DuplicateObserver(Signal),
}

/// Handle returned by [`EventBus::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    signal: Signal,
    id: u64,
}

impl Subscription {
    pub fn signal(&self) -> Signal {
        self.signal
    }
}

struct ObserverSlot {
    id: u64,
    /// `None` once removed; pruned on the next dispatch.
    handler: Option<Arc<dyn EventHandler>>,
}

struct SignalSlot {
    signal: Signal,
    observers: Vec<ObserverSlot>,
}

impl SignalSlot {
    fn prune(&mut self) {
        self.observers.retain(|slot| slot.handler.is_some());
    }

    fn contains(&self, handler: &Arc<dyn EventHandler>) -> bool {
        self.observers.iter().any(|slot| {
            slot.handler
                .as_ref()
                .is_some_and(|existing| same_handler(existing, handler))
        })
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registry of observers keyed by signal.
#[derive(Default)]
pub struct EventBus {
    slots: Mutex<Vec<SignalSlot>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `signal`. Registering the same handler twice on
    /// one signal is an error.
    pub fn subscribe(
        &self,
        signal: Signal,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, EventError> {
        let mut slots = self.slots.lock().expect("event bus lock poisoned");
        if slots
            .iter()
            .any(|slot| slot.signal == signal && slot.contains(&handler))
        {
            return Err(EventError::DuplicateObserver(signal));
        }
        Ok(self.insert(&mut slots, signal, handler))
    }

    /// Register `handler` for every signal. Nothing is registered if the
    /// handler already observes any of them.
    pub fn subscribe_all(
        &self,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Vec<Subscription>, EventError> {
        let mut slots = self.slots.lock().expect("event bus lock poisoned");
        if let Some(signal) = Signal::ALL.iter().copied().find(|signal| {
            slots
                .iter()
                .any(|slot| slot.signal == *signal && slot.contains(&handler))
        }) {
            return Err(EventError::DuplicateObserver(signal));
        }

        Ok(Signal::ALL
            .iter()
            .map(|signal| self.insert(&mut slots, *signal, handler.clone()))
            .collect())
    }

    fn insert(
        &self,
        slots: &mut Vec<SignalSlot>,
        signal: Signal,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let observer = ObserverSlot {
            id,
            handler: Some(handler),
        };

        match slots.iter_mut().find(|slot| slot.signal == signal) {
            Some(slot) => slot.observers.push(observer),
            None => slots.push(SignalSlot {
                signal,
                observers: vec![observer],
            }),
        }

        Subscription { signal, id }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut slots = self.slots.lock().expect("event bus lock poisoned");
        slots
            .iter_mut()
            .filter(|slot| slot.signal == subscription.signal)
            .flat_map(|slot| slot.observers.iter_mut())
            .find(|observer| observer.id == subscription.id && observer.handler.is_some())
            .map(|observer| observer.handler = None)
            .is_some()
    }

    /// Remove `handler` from `signal`. Returns `false` if it was not registered.
    pub fn disconnect(&self, signal: Signal, handler: &Arc<dyn EventHandler>) -> bool {
        let mut slots = self.slots.lock().expect("event bus lock poisoned");
        slots
            .iter_mut()
            .filter(|slot| slot.signal == signal)
            .flat_map(|slot| slot.observers.iter_mut())
            .find(|observer| {
                observer
                    .handler
                    .as_ref()
                    .is_some_and(|existing| same_handler(existing, handler))
            })
            .map(|observer| observer.handler = None)
            .is_some()
    }

    /// Drop every observer of `signal`.
    pub fn clear(&self, signal: Signal) {
        let mut slots = self.slots.lock().expect("event bus lock poisoned");
        slots.retain(|slot| slot.signal != signal);
    }

    /// Number of live observers registered for `signal`.
    pub fn observer_count(&self, signal: Signal) -> usize {
        let slots = self.slots.lock().expect("event bus lock poisoned");
        slots
            .iter()
            .filter(|slot| slot.signal == signal)
            .flat_map(|slot| slot.observers.iter())
            .filter(|observer| observer.handler.is_some())
            .count()
    }

    /// Deliver `event` to the observers of its signal.
    ///
    /// The observer list is snapshotted before delivery, so handlers may
    /// subscribe or unsubscribe from inside a callback; the change applies to
    /// the next emit.
    pub fn emit(&self, event: ScraperEvent) {
        let signal = event.signal();
        let observers: Vec<Arc<dyn EventHandler>> = {
            let mut slots = self.slots.lock().expect("event bus lock poisoned");
            for slot in slots.iter_mut() {
                slot.prune();
            }
            slots.retain(|slot| !slot.observers.is_empty());

            slots
                .iter()
                .filter(|slot| slot.signal == signal)
                .flat_map(|slot| slot.observers.iter())
                .filter_map(|observer| observer.handler.clone())
                .collect()
        };

        for handler in observers {
            event.deliver(handler.as_ref());
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock().expect("event bus lock poisoned");
        let mut map = f.debug_map();
        for slot in slots.iter() {
            map.entry(&slot.signal, &slot.observers.len());
        }
        map.finish()
    }
}

/// Logs every event using the `log` crate.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_connect_timeout(&self, event: &ConnectTimeoutEvent) {
        match &event.proxy {
            Some(proxy) => log::warn!("proxy connect timeout: {proxy} {}", event.progress),
            None => log::warn!("connect timeout: {}", event.progress),
        }
    }

    fn on_read_timeout(&self, event: &ReadTimeoutEvent) {
        log::warn!("read timeout: {}", event.progress);
    }

    fn on_connection_error(&self, event: &ConnectionErrorEvent) {
        log::warn!("connection error: {}", event.progress);
    }

    fn on_chunked_encoding_error(&self, event: &ChunkedEncodingErrorEvent) {
        log::warn!("chunked encoding error: {}", event.progress);
    }

    fn on_ssl_error(&self, event: &SslErrorEvent) {
        log::warn!("proxy ssl error: {}, url: {}", event.proxy, event.url);
    }

    fn on_proxy_error(&self, event: &ProxyErrorEvent) {
        log::warn!("proxy error: {}", event.proxy);
    }

    fn on_invalid_user_agent(&self, event: &InvalidUserAgentEvent) {
        log::warn!("invalid user agent: {}", event.user_agent);
    }

    fn on_proxy_exhausted(&self, event: &ProxyExhaustedEvent) {
        log::warn!("{} proxies exhausted", event.protocol);
    }

    fn on_user_agents_exhausted(&self) {
        log::warn!("user agents exhausted");
    }

    fn on_lack_of_proxy(&self, event: &LackOfProxyEvent) {
        log::warn!("no {} proxy available", event.protocol);
    }

    fn on_lack_of_user_agent(&self) {
        log::warn!("no user agent available");
    }

    fn on_stealth_mode_changed(&self, event: &StealthModeChangedEvent) {
        log::info!("stealth mode {}", if event.enabled { "enabled" } else { "disabled" });
    }

    fn on_invalid_proxy_entries(&self, event: &InvalidProxyEntriesEvent) {
        log::info!("dropped {} invalid proxy entries from {}", event.dropped, event.source);
    }
}
