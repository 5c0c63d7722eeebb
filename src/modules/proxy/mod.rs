//! Proxy identities and their sources.
//!
//! Parses `protocol;ip;port` (or `protocol;host:port`) seed files, extracts
//! proxies from the live provider table, and validates every entry before it
//! reaches the pool.

use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use scraper::Selector;
use thiserror::Error;

use crate::document::Document;

/// Scheme a proxy is able to relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ProxyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ProxyParseError::Protocol(other.to_string())),
        }
    }
}

/// Why a proxy entry was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyParseError {
    #[error("unsupported proxy protocol '{0}'")]
    Protocol(String),
    #[error("invalid proxy ip '{0}'")]
    Ip(String),
    #[error("invalid proxy port '{0}'")]
    Port(String),
    #[error("malformed proxy entry '{0}'")]
    Malformed(String),
}

/// A proxy endpoint together with its connect-timeout tally.
///
/// Two proxies are equal when protocol and address match; the timeout counter
/// is bookkeeping and does not take part in comparisons.
#[derive(Debug, Clone)]
pub struct Proxy {
    protocol: Protocol,
    address: String,
    timeouts: u32,
}

impl Proxy {
    /// Validate and build a proxy from its raw parts.
    pub fn new(protocol: &str, ip: &str, port: &str) -> Result<Self, ProxyParseError> {
        let protocol = protocol.parse::<Protocol>()?;
        let ip = ip.trim();
        let ip_addr = ip
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| ProxyParseError::Ip(ip.to_string()))?;
        let port = parse_port(port)?;

        let address = match ip_addr {
            IpAddr::V4(v4) => format!("{v4}:{port}"),
            IpAddr::V6(v6) => format!("[{v6}]:{port}"),
        };

        Ok(Self {
            protocol,
            address,
            timeouts: 0,
        })
    }

    /// Parse one seed-file line.
    pub fn parse_line(line: &str) -> Result<Self, ProxyParseError> {
        let fields: Vec<&str> = line.trim().split(';').collect();
        match fields.as_slice() {
            [protocol, ip, port] => Self::new(protocol, ip, port),
            [protocol, host_port] => {
                let (host, port) = host_port
                    .trim()
                    .rsplit_once(':')
                    .ok_or_else(|| ProxyParseError::Malformed(line.to_string()))?;
                Self::new(protocol, host, port)
            }
            _ => Err(ProxyParseError::Malformed(line.to_string())),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// `ip:port` of the endpoint.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// URL handed to the HTTP client.
    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    /// Bump the connect-timeout tally and return the new value.
    pub fn record_timeout(&mut self) -> u32 {
        self.timeouts = self.timeouts.saturating_add(1);
        self.timeouts
    }

    /// Seed-file representation, `protocol;ip;port`.
    pub fn to_line(&self) -> String {
        match self.address.rsplit_once(':') {
            Some((ip, port)) => format!(
                "{};{};{}",
                self.protocol,
                ip.trim_start_matches('[').trim_end_matches(']'),
                port
            ),
            None => format!("{};{}", self.protocol, self.address),
        }
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol && self.address == other.address
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

fn parse_port(port: &str) -> Result<u16, ProxyParseError> {
    let trimmed = port.trim();
    trimmed
        .parse::<u32>()
        .ok()
        .and_then(|value| u16::try_from(value).ok())
        .ok_or_else(|| ProxyParseError::Port(trimmed.to_string()))
}

/// Where a batch of proxies came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySource {
    File,
    LivePage,
}

impl fmt::Display for ProxySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySource::File => f.write_str("file"),
            ProxySource::LivePage => f.write_str("live page"),
        }
    }
}

/// Valid proxies plus the number of rejected entries.
#[derive(Debug, Clone, Default)]
pub struct LoadedProxies {
    pub proxies: Vec<Proxy>,
    pub dropped: usize,
}

impl LoadedProxies {
    fn push(&mut self, parsed: Result<Proxy, ProxyParseError>) {
        match parsed {
            Ok(proxy) => self.proxies.push(proxy),
            Err(err) => {
                log::debug!("dropping proxy entry: {err}");
                self.dropped += 1;
            }
        }
    }
}

/// Parse seed-file contents, skipping blank lines.
pub fn parse_proxy_list(contents: &str) -> LoadedProxies {
    let mut loaded = LoadedProxies::default();
    for line in contents.lines().filter(|line| !line.trim().is_empty()) {
        loaded.push(Proxy::parse_line(line));
    }
    loaded
}

/// Read a proxy seed file. A missing file yields `Ok(None)`.
pub fn read_proxy_file(path: &Path) -> io::Result<Option<LoadedProxies>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(parse_proxy_list(&contents))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Persist proxies in the seed-file format.
pub fn write_proxy_file<'a, I>(path: &Path, proxies: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a Proxy>,
{
    let mut file = fs::File::create(path)?;
    for proxy in proxies {
        writeln!(file, "{}", proxy.to_line())?;
    }
    file.flush()
}

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody tr").expect("valid row selector"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("valid cell selector"));

const IP_CELL: usize = 0;
const PORT_CELL: usize = 1;
const HTTPS_CELL: usize = 6;

/// Extract proxies from the provider's table layout.
///
/// Rows need more than six cells: ip, port, and an `https` column reading
/// `yes`/`no`.
pub fn extract_proxies(document: &Document) -> LoadedProxies {
    let mut loaded = LoadedProxies::default();

    for row in document.html().select(&ROW_SELECTOR) {
        let cells: Vec<String> = row
            .select(&CELL_SELECTOR)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        if cells.len() <= HTTPS_CELL {
            continue;
        }

        let protocol = if cells[HTTPS_CELL] == "no" {
            Protocol::Http
        } else {
            Protocol::Https
        };
        loaded.push(Proxy::new(protocol.as_str(), &cells[IP_CELL], &cells[PORT_CELL]));
    }

    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn parses_both_line_formats() {
        let a = Proxy::parse_line("http;10.0.0.1;8080").unwrap();
        let b = Proxy::parse_line("http;10.0.0.1:8080").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.address(), "10.0.0.1:8080");
        assert_eq!(a.url(), "http://10.0.0.1:8080");
    }

    #[test]
    fn rejects_invalid_entries() {
        assert!(matches!(
            Proxy::parse_line("socks5;10.0.0.1;1080"),
            Err(ProxyParseError::Protocol(_))
        ));
        assert!(matches!(
            Proxy::parse_line("http;not-an-ip;8080"),
            Err(ProxyParseError::Ip(_))
        ));
        assert!(matches!(
            Proxy::parse_line("https;10.0.0.1;99999"),
            Err(ProxyParseError::Port(_))
        ));
        assert!(matches!(
            Proxy::parse_line("http"),
            Err(ProxyParseError::Malformed(_))
        ));
    }

    #[test]
    fn port_bounds_are_inclusive() {
        assert!(Proxy::parse_line("http;10.0.0.1;0").is_ok());
        assert!(Proxy::parse_line("http;10.0.0.1;65535").is_ok());
        assert!(Proxy::parse_line("http;10.0.0.1;65536").is_err());
    }

    #[test]
    fn ipv6_round_trips_through_line_format() {
        let proxy = Proxy::parse_line("https;::1;3128").unwrap();
        assert_eq!(proxy.address(), "[::1]:3128");
        assert_eq!(Proxy::parse_line(&proxy.to_line()).unwrap(), proxy);
    }

    #[test]
    fn equality_ignores_timeout_counter() {
        let mut a = Proxy::parse_line("http;10.0.0.1;8080").unwrap();
        let b = a.clone();
        a.record_timeout();
        assert_eq!(a, b);
        assert_ne!(a.timeouts(), b.timeouts());
    }

    #[test]
    fn drops_invalid_lines_and_counts_them() {
        let loaded = parse_proxy_list(
            "http;10.0.0.1;8080\nhttps;10.0.0.2;443\n\nhttp;10.0.0.3;3128\nhttp;10.0.0.4;99999\n",
        );
        assert_eq!(loaded.proxies.len(), 3);
        assert_eq!(loaded.dropped, 1);
    }

    #[test]
    fn extracts_rows_from_provider_table() {
        let html = r#"
            <table><tbody>
              <tr><td>1.2.3.4</td><td>80</td><td>US</td><td>x</td><td>x</td><td>x</td><td>no</td><td>x</td></tr>
              <tr><td>5.6.7.8</td><td>8443</td><td>DE</td><td>x</td><td>x</td><td>x</td><td>yes</td><td>x</td></tr>
              <tr><td>bogus</td><td>80</td><td>DE</td><td>x</td><td>x</td><td>x</td><td>yes</td><td>x</td></tr>
              <tr><td>9.9.9.9</td><td>80</td></tr>
            </tbody></table>
        "#;
        let url = Url::parse("https://provider.test/").unwrap();
        let document = Document::parse(url, 200, html.as_bytes());
        let loaded = extract_proxies(&document);

        assert_eq!(loaded.proxies.len(), 2);
        assert_eq!(loaded.proxies[0].protocol(), Protocol::Http);
        assert_eq!(loaded.proxies[1].protocol(), Protocol::Https);
        assert_eq!(loaded.proxies[1].address(), "5.6.7.8:8443");
        assert_eq!(loaded.dropped, 1);
    }
}
