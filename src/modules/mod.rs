//! Building blocks of the scraper
//!
//! Identity pools, failure budgets, throttling and the event bus the
//! orchestrator composes.

pub mod events;
pub mod failures;
pub mod identity;
pub mod pool;
pub mod proxy;
pub mod throttle;
pub mod user_agents;

// Re-export commonly used types
pub use events::{
    ChunkedEncodingErrorEvent, ConnectTimeoutEvent, ConnectionErrorEvent, EventBus, EventError,
    EventHandler, InvalidProxyEntriesEvent, InvalidUserAgentEvent, LackOfProxyEvent,
    LoggingHandler, Progress, ProxyErrorEvent, ProxyExhaustedEvent, ReadTimeoutEvent,
    ScraperEvent, Signal, SslErrorEvent, StealthModeChangedEvent, Subscription,
};
pub use failures::{FailureCounters, FailureKind};
pub use identity::{IdentityError, IdentityManager};
pub use pool::IdentityPool;
pub use proxy::{
    LoadedProxies, Protocol, Proxy, ProxyParseError, ProxySource, extract_proxies,
    parse_proxy_list, read_proxy_file, write_proxy_file,
};
pub use throttle::RateLimiter;
pub use user_agents::{
    UserAgent, UserAgentError, browser_headers, parse_user_agents, read_user_agent_file,
};
