//! High level fetch orchestration.
//!
//! Wires together the rate limiter, the identity pools, the failure counters
//! and the event bus behind a single `fetch` call. In stealth mode every
//! request goes out through a drawn (proxy, user agent) pair that is rotated
//! or evicted according to how the request failed.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, ScraperConfig};
use crate::document::Document;
use crate::modules::events::{
	ChunkedEncodingErrorEvent, ConnectTimeoutEvent, ConnectionErrorEvent, EventBus, EventError,
	InvalidUserAgentEvent, LoggingHandler, Progress, ProxyErrorEvent, ReadTimeoutEvent,
	ScraperEvent, SslErrorEvent, StealthModeChangedEvent,
};
use crate::modules::failures::{FailureCounters, FailureKind};
use crate::modules::identity::{IdentityError, IdentityManager};
use crate::modules::proxy::{Protocol, Proxy, ProxySource, extract_proxies};
use crate::modules::throttle::{RateLimiter, millis};
use crate::transport::{
	FetchRequest, FetchResponse, FetchTransport, ReqwestTransport, TransportError,
};

/// Result alias used across the orchestration layer.
pub type ScraperResult<T> = Result<T, ScraperError>;

/// Whether a fetch goes out directly or through a drawn identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMode {
	Plain,
	Stealth,
}

impl fmt::Display for FetchMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FetchMode::Plain => f.write_str("plain"),
			FetchMode::Stealth => f.write_str("stealth"),
		}
	}
}

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ScraperError {
	#[error("url parse error: {0}")]
	Url(#[from] url::ParseError),
	#[error("unsupported url scheme '{0}'")]
	UnsupportedScheme(String),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Identity(#[from] IdentityError),
	#[error("event registration failed: {0}")]
	Event(#[from] EventError),
	#[error("connect timeout limit reached ({mode} mode)")]
	ConnectTimeout { mode: FetchMode },
	#[error("read timeout limit reached ({mode} mode)")]
	ReadTimeout { mode: FetchMode },
	#[error("connection error limit reached ({mode} mode)")]
	ConnectionError { mode: FetchMode },
	#[error("chunked encoding error limit reached ({mode} mode)")]
	ChunkedEncoding { mode: FetchMode },
	#[error("tls error fetching {url}: {detail}")]
	Tls { url: Url, detail: String },
	#[error("proxy error: {0}")]
	Proxy(String),
	#[error("invalid header: {0}")]
	InvalidHeader(String),
	#[error("unclassified transport error: {0}")]
	Transport(String),
	#[error("giving up after {attempts} attempts")]
	AttemptsExhausted { attempts: u32 },
	#[error("proxy list unavailable from {0}")]
	ProxyListUnavailable(String),
}

impl ScraperError {
	fn limit_reached(kind: FailureKind, mode: FetchMode) -> Self {
		match kind {
			FailureKind::ConnectTimeout => ScraperError::ConnectTimeout { mode },
			FailureKind::ReadTimeout => ScraperError::ReadTimeout { mode },
			FailureKind::ConnectionError => ScraperError::ConnectionError { mode },
			FailureKind::ChunkedEncoding => ScraperError::ChunkedEncoding { mode },
		}
	}
}

/// Per-call overrides for [`StealthScraper::fetch_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
	/// Overrides the scraper's stealth mode for this call only.
	pub stealth: Option<bool>,
	/// Draw a fresh (proxy, user agent) pair before the first attempt.
	pub redraw_identity: bool,
}

impl FetchOptions {
	pub fn stealth() -> Self {
		Self {
			stealth: Some(true),
			..Self::default()
		}
	}

	pub fn plain() -> Self {
		Self {
			stealth: Some(false),
			..Self::default()
		}
	}

	pub fn with_redraw(mut self) -> Self {
		self.redraw_identity = true;
		self
	}
}

/// Fluent builder for [`StealthScraper`].
pub struct StealthScraperBuilder {
	config: ScraperConfig,
	transport: Option<Arc<dyn FetchTransport>>,
	events: Option<Arc<EventBus>>,
	log_events: bool,
}

impl StealthScraperBuilder {
	pub fn new() -> Self {
		Self {
			config: ScraperConfig::default(),
			transport: None,
			events: None,
			log_events: false,
		}
	}

	pub fn with_config(mut self, config: ScraperConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
		self.config.min_delay_ms = millis(min);
		self.config.max_delay_ms = millis(max);
		self
	}

	pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
		self.config.connect_timeout_ms = millis(connect);
		self.config.read_timeout_ms = millis(read);
		self
	}

	pub fn with_max_proxy_timeouts(mut self, max: u32) -> Self {
		self.config.max_proxy_timeouts = max;
		self
	}

	pub fn with_max_connect_timeouts(mut self, max: u32) -> Self {
		self.config.max_connect_timeouts = max;
		self
	}

	pub fn with_max_read_timeouts(mut self, max: u32) -> Self {
		self.config.max_read_timeouts = max;
		self
	}

	pub fn with_max_connection_errors(mut self, max: u32) -> Self {
		self.config.max_connection_errors = max;
		self
	}

	pub fn with_max_chunked_encoding_errors(mut self, max: u32) -> Self {
		self.config.max_chunked_encoding_errors = max;
		self
	}

	pub fn with_max_attempts(mut self, max: u32) -> Self {
		self.config.max_attempts = max;
		self
	}

	pub fn evict_proxy_on_read_timeout(mut self, enabled: bool) -> Self {
		self.config.evict_proxy_on_read_timeout = enabled;
		self
	}

	pub fn with_stealth_mode(mut self, enabled: bool) -> Self {
		self.config.stealth_mode = enabled;
		self
	}

	pub fn with_proxy_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.proxy_file = path.into();
		self
	}

	pub fn with_user_agent_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.user_agent_file = path.into();
		self
	}

	pub fn with_proxy_provider_url(mut self, url: impl Into<String>) -> Self {
		self.config.proxy_provider_url = url.into();
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn FetchTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Share an existing bus, e.g. one several scrapers report to.
	pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
		self.events = Some(events);
		self
	}

	/// Subscribe a [`LoggingHandler`] to every signal.
	pub fn with_event_logging(mut self) -> Self {
		self.log_events = true;
		self
	}

	pub fn build(self) -> ScraperResult<StealthScraper> {
		let config = self.config.normalized();
		let events = self.events.unwrap_or_else(|| Arc::new(EventBus::new()));
		if self.log_events {
			events.subscribe_all(Arc::new(LoggingHandler))?;
		}
		let transport = self
			.transport
			.unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
		Ok(StealthScraper::assemble(config, transport, events))
	}
}

impl Default for StealthScraperBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Main scraper orchestrator.
pub struct StealthScraper {
	config: ScraperConfig,
	transport: Arc<dyn FetchTransport>,
	limiter: RateLimiter,
	identities: IdentityManager,
	counters: FailureCounters,
	events: Arc<EventBus>,
	stealth_mode: bool,
}

impl StealthScraper {
	/// Construct a scraper with default configuration.
	pub fn new() -> ScraperResult<Self> {
		StealthScraperBuilder::new().build()
	}

	/// Obtain a builder to customise the scraper instance.
	pub fn builder() -> StealthScraperBuilder {
		StealthScraperBuilder::new()
	}

	/// Construct a scraper from a JSON configuration file.
	pub fn from_config_file(path: impl AsRef<Path>) -> ScraperResult<Self> {
		let config = ScraperConfig::from_json_file(path)?;
		StealthScraperBuilder::new().with_config(config).build()
	}

	fn assemble(
		config: ScraperConfig,
		transport: Arc<dyn FetchTransport>,
		events: Arc<EventBus>,
	) -> Self {
		Self {
			limiter: RateLimiter::new(config.min_delay(), config.max_delay()),
			identities: IdentityManager::new(events.clone()),
			counters: FailureCounters::from_config(&config),
			stealth_mode: config.stealth_mode,
			transport,
			events,
			config,
		}
	}

	pub fn config(&self) -> &ScraperConfig {
		&self.config
	}

	/// Shared event bus; subscribe here to observe rotation and failures.
	pub fn events(&self) -> &Arc<EventBus> {
		&self.events
	}

	pub fn identities(&self) -> &IdentityManager {
		&self.identities
	}

	/// Mutable access to the pools, e.g. to seed them programmatically.
	pub fn identities_mut(&mut self) -> &mut IdentityManager {
		&mut self.identities
	}

	pub fn counters(&self) -> &FailureCounters {
		&self.counters
	}

	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	pub fn is_stealth_mode(&self) -> bool {
		self.stealth_mode
	}

	/// Switch to stealth mode, optionally reloading both pools first.
	pub async fn enable_stealth_mode(&mut self, refresh: bool) -> ScraperResult<()> {
		if refresh {
			self.refresh_stealth().await?;
		}
		self.set_stealth_mode(true);
		Ok(())
	}

	pub fn disable_stealth_mode(&mut self) {
		self.set_stealth_mode(false);
	}

	fn set_stealth_mode(&mut self, enabled: bool) {
		if self.stealth_mode == enabled {
			return;
		}
		self.stealth_mode = enabled;
		log::info!("stealth mode {}", if enabled { "enabled" } else { "disabled" });
		self.events
			.emit(ScraperEvent::StealthModeChanged(StealthModeChangedEvent { enabled }));
	}

	/// Reload the proxy and user-agent pools.
	pub async fn refresh_stealth(&mut self) -> ScraperResult<()> {
		self.refresh_proxies().await?;
		self.refresh_user_agents()?;
		Ok(())
	}

	/// Reload proxies from the proxy file, falling back to the live provider
	/// page fetched in plain mode. Returns the number of proxies installed.
	pub async fn refresh_proxies(&mut self) -> ScraperResult<usize> {
		let previous = self.identities.proxies().entries().to_vec();
		let path = self.config.proxy_file.clone();
		if self.identities.provide_proxies_from_file(&path)? {
			self.forget_departed(previous).await;
			return Ok(self.identities.proxies().len());
		}

		let provider = Url::parse(&self.config.proxy_provider_url)?;
		log::info!("fetching proxy list from {provider}");
		let response = self.execute(&provider, FetchMode::Plain, false).await?;
		let document = Document::parse(response.url, response.status, &response.body);
		let loaded = extract_proxies(&document);
		if loaded.proxies.is_empty() {
			return Err(ScraperError::ProxyListUnavailable(provider.to_string()));
		}
		let installed = self.identities.install_proxies(loaded, ProxySource::LivePage);
		self.forget_departed(previous).await;
		Ok(installed)
	}

	/// Reload user agents from the user-agent file. A missing file is fatal.
	pub fn refresh_user_agents(&mut self) -> ScraperResult<usize> {
		let path = self.config.user_agent_file.clone();
		Ok(self.identities.provide_user_agents_from_file(&path)?)
	}

	/// Fetch `url` using the scraper's current mode.
	pub async fn fetch(&mut self, url: &str) -> ScraperResult<Document> {
		self.fetch_with(url, FetchOptions::default()).await
	}

	/// Fetch `url` with per-call overrides.
	pub async fn fetch_with(&mut self, url: &str, options: FetchOptions) -> ScraperResult<Document> {
		let url = Url::parse(url)?;
		protocol_of(&url)?;

		let mode = if options.stealth.unwrap_or(self.stealth_mode) {
			FetchMode::Stealth
		} else {
			FetchMode::Plain
		};

		if mode == FetchMode::Stealth {
			self.ensure_identities().await?;
		}

		let response = self.execute(&url, mode, options.redraw_identity).await?;
		Ok(Document::parse(response.url, response.status, &response.body))
	}

	async fn ensure_identities(&mut self) -> ScraperResult<()> {
		if self.identities.proxies().is_empty() {
			self.refresh_proxies().await?;
		}
		if self.identities.user_agents().is_empty() {
			self.refresh_user_agents()?;
		}
		Ok(())
	}

	/// Throttle, then run the attempt loop. The limiter window is re-drawn
	/// whatever the outcome.
	async fn execute(
		&mut self,
		url: &Url,
		mode: FetchMode,
		redraw: bool,
	) -> ScraperResult<FetchResponse> {
		self.limiter.wait().await;
		let result = self.attempt_loop(url, mode, redraw).await;
		self.limiter.advance();
		if result.is_err() {
			self.counters.reset_all();
		}
		result
	}

	async fn attempt_loop(
		&mut self,
		url: &Url,
		mode: FetchMode,
		redraw: bool,
	) -> ScraperResult<FetchResponse> {
		let protocol = protocol_of(url)?;

		if mode == FetchMode::Stealth {
			let stale_proxy = self
				.identities
				.current_proxy()
				.is_none_or(|proxy| proxy.protocol() != protocol);
			if redraw || stale_proxy {
				self.identities.draw_proxy(protocol)?;
			}
			if redraw || self.identities.current_user_agent().is_none() {
				self.identities.draw_user_agent()?;
			}
		}

		let max_attempts = self.config.max_attempts;
		for attempt in 1..=max_attempts {
			let request = self.request_for(url, mode);
			match &request.proxy {
				Some(proxy) => log::debug!("GET {url} via {proxy} (attempt {attempt})"),
				None => log::debug!("GET {url} (attempt {attempt}, {mode})"),
			}

			match self.transport.get(&request).await {
				Ok(response) => {
					self.counters.reset_all();
					return Ok(response);
				}
				Err(err) => self.recover(err, url, protocol, mode).await?,
			}
		}

		log::warn!("giving up on {url} after {max_attempts} attempts");
		Err(ScraperError::AttemptsExhausted {
			attempts: max_attempts,
		})
	}

	fn request_for(&self, url: &Url, mode: FetchMode) -> FetchRequest {
		let (proxy, user_agent) = match mode {
			FetchMode::Stealth => (
				self.identities.current_proxy().cloned(),
				self.identities.current_user_agent().cloned(),
			),
			FetchMode::Plain => (None, None),
		};
		FetchRequest {
			url: url.clone(),
			proxy,
			user_agent,
			connect_timeout: self.config.connect_timeout(),
			read_timeout: self.config.read_timeout(),
		}
	}

	/// React to one failed attempt. `Ok` means try again; `Err` is terminal.
	async fn recover(
		&mut self,
		err: TransportError,
		url: &Url,
		protocol: Protocol,
		mode: FetchMode,
	) -> ScraperResult<()> {
		let stealth = mode == FetchMode::Stealth;
		match err {
			TransportError::ConnectTimeout(_) if stealth => {
				if let Some(proxy) = self.identities.record_proxy_timeout() {
					let progress = Progress::new(proxy.timeouts(), self.config.max_proxy_timeouts);
					self.events
						.emit(ScraperEvent::ConnectTimeout(ConnectTimeoutEvent {
							proxy: Some(proxy),
							progress,
						}));
					if progress.is_exhausted() {
						self.evict_proxy().await;
					}
				}
				self.identities.draw_proxy(protocol)?;
			}
			TransportError::ConnectTimeout(_) => {
				let progress = self.tally(FailureKind::ConnectTimeout, mode)?;
				self.events
					.emit(ScraperEvent::ConnectTimeout(ConnectTimeoutEvent {
						proxy: None,
						progress,
					}));
			}
			TransportError::ReadTimeout(_) => {
				let progress = self.tally(FailureKind::ReadTimeout, mode)?;
				self.events
					.emit(ScraperEvent::ReadTimeout(ReadTimeoutEvent { progress }));
				if stealth && self.config.evict_proxy_on_read_timeout {
					self.evict_proxy().await;
					self.identities.draw_proxy(protocol)?;
				}
			}
			TransportError::Connection(_) => {
				let progress = self.tally(FailureKind::ConnectionError, mode)?;
				self.events
					.emit(ScraperEvent::ConnectionError(ConnectionErrorEvent { progress }));
				if stealth {
					self.evict_proxy().await;
					self.identities.draw_proxy(protocol)?;
				}
			}
			TransportError::ChunkedEncoding(_) => {
				let progress = self.tally(FailureKind::ChunkedEncoding, mode)?;
				self.events
					.emit(ScraperEvent::ChunkedEncodingError(ChunkedEncodingErrorEvent {
						progress,
					}));
				if stealth {
					self.identities.draw_proxy(protocol)?;
				}
			}
			TransportError::Proxy(_) if stealth => {
				if let Some(proxy) = self.identities.current_proxy().cloned() {
					self.events
						.emit(ScraperEvent::ProxyError(ProxyErrorEvent { proxy }));
					self.evict_proxy().await;
				}
				self.identities.draw_proxy(protocol)?;
			}
			TransportError::Proxy(detail) => return Err(ScraperError::Proxy(detail)),
			TransportError::Tls(_) if stealth => {
				if let Some(proxy) = self.identities.current_proxy().cloned() {
					self.events.emit(ScraperEvent::SslError(SslErrorEvent {
						proxy,
						url: url.clone(),
					}));
					self.evict_proxy().await;
				}
				self.identities.draw_proxy(protocol)?;
			}
			TransportError::Tls(detail) => {
				return Err(ScraperError::Tls {
					url: url.clone(),
					detail,
				});
			}
			TransportError::InvalidHeader(_) if stealth => {
				if let Some(agent) = self.identities.current_user_agent().cloned() {
					self.events
						.emit(ScraperEvent::InvalidUserAgent(InvalidUserAgentEvent {
							user_agent: agent.as_str().to_string(),
						}));
					self.identities.evict_current_user_agent();
				}
				self.identities.draw_user_agent()?;
			}
			TransportError::InvalidHeader(detail) => return Err(ScraperError::InvalidHeader(detail)),
			TransportError::Other(detail) => {
				log::error!("unclassified failure fetching {url}: {detail}");
				return Err(ScraperError::Transport(detail));
			}
		}
		Ok(())
	}

	/// Evict the selected proxy and drop whatever the transport keeps for it.
	async fn evict_proxy(&mut self) -> Option<Proxy> {
		let proxy = self.identities.evict_current_proxy()?;
		self.transport.forget(&proxy).await;
		Some(proxy)
	}

	/// Release transport state of proxies that did not survive a reload.
	async fn forget_departed(&self, previous: Vec<Proxy>) {
		let current: HashSet<&Proxy> = self.identities.proxies().entries().iter().collect();
		for proxy in previous.iter().filter(|proxy| !current.contains(proxy)) {
			self.transport.forget(proxy).await;
		}
	}

	/// Count a session-wide failure. Reaching the ceiling is terminal.
	fn tally(&mut self, kind: FailureKind, mode: FetchMode) -> ScraperResult<Progress> {
		let progress = self.counters.record(kind);
		if progress.is_exhausted() {
			log::warn!("{kind} limit reached ({progress})");
			return Err(ScraperError::limit_reached(kind, mode));
		}
		Ok(progress)
	}
}

fn protocol_of(url: &Url) -> ScraperResult<Protocol> {
	url.scheme()
		.parse()
		.map_err(|_| ScraperError::UnsupportedScheme(url.scheme().to_string()))
}
