mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{Recorder, ScriptedTransport};
use scraper::Selector;
use stealthscraper_rs::modules::{Proxy, read_proxy_file, write_proxy_file};
use stealthscraper_rs::{
    FetchOptions, FetchResponse, IdentityError, Protocol, ScraperError, StealthScraper,
    TransportError,
};
use url::Url;

const USER_AGENTS: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/120.0\n\
Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0\n";

fn quick_builder(dir: &tempfile::TempDir) -> stealthscraper_rs::StealthScraperBuilder {
    StealthScraper::builder()
        .with_delay_range(Duration::from_millis(1), Duration::from_millis(2))
        .with_proxy_file(dir.path().join("proxy.txt"))
        .with_user_agent_file(dir.path().join("user_agents.txt"))
        .with_proxy_provider_url("http://proxies.test/")
}

#[test]
fn proxy_file_skips_out_of_range_port() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.txt");
    fs::write(
        &path,
        "http;10.0.0.1;8080\nhttps;10.0.0.2;443\nhttp;10.0.0.3;3128\nhttp;10.0.0.4;99999\n",
    )
    .unwrap();

    let loaded = read_proxy_file(&path).unwrap().unwrap();
    assert_eq!(loaded.proxies.len(), 3);
    assert_eq!(loaded.dropped, 1);
}

#[test]
fn written_proxy_list_reloads_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.txt");
    let proxies: Vec<Proxy> = (1..=5)
        .map(|n| Proxy::new("http", &format!("192.168.1.{n}"), "8080").unwrap())
        .chain(std::iter::once(Proxy::new("https", "::1", "443").unwrap()))
        .collect();

    write_proxy_file(&path, proxies.iter()).unwrap();
    let loaded = read_proxy_file(&path).unwrap().unwrap();
    assert_eq!(loaded.proxies, proxies);
    assert_eq!(loaded.dropped, 0);
}

#[tokio::test]
async fn stealth_fetch_uses_identities_from_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("proxy.txt"),
        "http;10.0.0.1;8080\nhttp;10.0.0.2;8080\nbogus line\n",
    )
    .unwrap();
    fs::write(dir.path().join("user_agents.txt"), USER_AGENTS).unwrap();

    let transport = ScriptedTransport::new(vec![Err(TransportError::ConnectTimeout(
        "timed out".into(),
    ))]);
    let mut scraper = quick_builder(&dir)
        .with_transport(transport.clone())
        .build()
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    scraper.events().subscribe_all(recorder.clone()).unwrap();

    scraper.enable_stealth_mode(true).await.unwrap();
    let document = scraper.fetch("http://example.com/page").await.unwrap();

    let title = Selector::parse("title").unwrap();
    let text: String = document.html().select(&title).flat_map(|el| el.text()).collect();
    assert_eq!(text, "ok");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|request| request.proxy.is_some()));
    assert!(requests.iter().all(|request| request.user_agent.is_some()));
    assert_ne!(requests[0].proxy, requests[1].proxy);

    assert_eq!(
        recorder.events(),
        vec!["invalid_entries:file:1", "connect_timeout:1/3"]
    );
    assert_eq!(scraper.identities().proxies().len(), 2);
    assert_eq!(scraper.identities().user_agents().len(), 2);
}

#[tokio::test]
async fn missing_proxy_file_falls_back_to_live_page() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("user_agents.txt"), USER_AGENTS).unwrap();

    let listing = r#"<table><tbody>
        <tr><td>10.1.1.1</td><td>8080</td><td>US</td><td>x</td><td>y</td><td>z</td><td>no</td><td>-</td></tr>
        <tr><td>10.1.1.2</td><td>443</td><td>US</td><td>x</td><td>y</td><td>z</td><td>yes</td><td>-</td></tr>
        <tr><td>not-an-ip</td><td>80</td><td>US</td><td>x</td><td>y</td><td>z</td><td>no</td><td>-</td></tr>
    </tbody></table>"#;
    let provider = Url::parse("http://proxies.test/").unwrap();
    let transport = ScriptedTransport::new(vec![Ok(FetchResponse::new(200, provider, listing))]);
    let mut scraper = quick_builder(&dir)
        .with_transport(transport.clone())
        .build()
        .unwrap();

    scraper
        .fetch_with("https://example.com/", FetchOptions::stealth())
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url.as_str(), "http://proxies.test/");
    assert!(requests[0].proxy.is_none());

    let proxy = requests[1].proxy.as_ref().unwrap();
    assert_eq!(proxy.protocol(), Protocol::Https);
    assert_eq!(proxy.address(), "10.1.1.2:443");
    assert_eq!(scraper.identities().proxies().len(), 2);
}

#[tokio::test]
async fn empty_live_page_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("user_agents.txt"), USER_AGENTS).unwrap();

    let transport = ScriptedTransport::new(vec![]);
    let mut scraper = quick_builder(&dir).with_transport(transport).build().unwrap();

    assert!(matches!(
        scraper.refresh_proxies().await,
        Err(ScraperError::ProxyListUnavailable(_))
    ));
}

#[tokio::test]
async fn missing_user_agent_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("proxy.txt"), "http;10.0.0.1;8080\n").unwrap();

    let transport = ScriptedTransport::new(vec![]);
    let mut scraper = quick_builder(&dir)
        .with_transport(transport.clone())
        .build()
        .unwrap();

    let err = scraper.enable_stealth_mode(true).await.unwrap_err();
    assert!(matches!(
        err,
        ScraperError::Identity(IdentityError::UserAgentSourceMissing { .. })
    ));
    assert!(!scraper.is_stealth_mode());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn exhausting_a_protocol_is_signalled() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("proxy.txt"),
        "http;10.0.0.1;8080\nhttps;10.0.0.2;443\n",
    )
    .unwrap();
    fs::write(dir.path().join("user_agents.txt"), USER_AGENTS).unwrap();

    let timeout = || Err(TransportError::ConnectTimeout("timed out".into()));
    let transport = ScriptedTransport::new(vec![timeout(), timeout()]);
    let mut scraper = quick_builder(&dir)
        .with_max_proxy_timeouts(2)
        .with_transport(transport)
        .build()
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    scraper.events().subscribe_all(recorder.clone()).unwrap();

    let err = scraper
        .fetch_with("http://example.com/", FetchOptions::stealth())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScraperError::Identity(IdentityError::LackOfProxy(Protocol::Http))
    ));
    assert_eq!(
        recorder.events(),
        vec!["connect_timeout:1/2", "connect_timeout:2/2", "proxy_exhausted:http"]
    );
    assert_eq!(scraper.identities().proxies().len(), 1);
}
