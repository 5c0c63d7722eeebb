//! # stealthscraper-rs
//!
//! Rate-limited page fetching with rotating proxy and user-agent identities.
//!
//! Requests are spaced by a randomised delay. In stealth mode each request
//! goes out through a (proxy, user agent) pair drawn from pools loaded from
//! disk or from a public proxy list; identities that fail are evicted or
//! rotated depending on the failure, and every decision is reported on a
//! typed event bus.
//!
//! ## Features
//!
//! - Async fetching on top of reqwest and tokio
//! - Randomised politeness delay between requests
//! - Proxy rotation per protocol with per-proxy timeout budgets
//! - User-agent rotation with browser-like headers
//! - Per-failure-class retry ceilings
//! - Typed observer bus for rotation and failure signals
//!
//! ## Example
//!
//! ```no_run
//! use stealthscraper_rs::StealthScraper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scraper = StealthScraper::builder().with_event_logging().build()?;
//!     scraper.enable_stealth_mode(true).await?;
//!     let document = scraper.fetch("https://example.com").await?;
//!     println!("Fetched {} ({})", document.url(), document.status());
//!     Ok(())
//! }
//! ```

mod stealthscraper;

pub mod config;
pub mod document;
pub mod modules;
pub mod transport;

pub use crate::stealthscraper::{
    FetchMode,
    FetchOptions,
    ScraperError,
    ScraperResult,
    StealthScraper,
    StealthScraperBuilder,
};

pub use crate::config::{ConfigError, DEFAULT_PROXY_PROVIDER_URL, ScraperConfig};
pub use crate::document::Document;

pub use crate::transport::{
    FetchRequest,
    FetchResponse,
    FetchTransport,
    ReqwestTransport,
    TransportError,
};

pub use crate::modules::{
    EventBus,
    EventError,
    EventHandler,
    FailureCounters,
    FailureKind,
    IdentityError,
    IdentityManager,
    IdentityPool,
    LoggingHandler,
    Progress,
    Protocol,
    Proxy,
    ProxyParseError,
    ProxySource,
    RateLimiter,
    ScraperEvent,
    Signal,
    Subscription,
    UserAgent,
    UserAgentError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
