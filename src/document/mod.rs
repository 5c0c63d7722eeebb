//! Parsed page handed back to callers.
//!
//! Wraps `scraper::Html`; querying is left to the caller.

use scraper::Html;
use url::Url;

/// A fetched and parsed HTML document.
#[derive(Debug, Clone)]
pub struct Document {
    url: Url,
    status: u16,
    html: Html,
}

impl Document {
    /// Parse raw response bytes. Invalid UTF-8 is replaced rather than rejected.
    pub fn parse(url: Url, status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        Self {
            url,
            status,
            html: Html::parse_document(&text),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn html(&self) -> &Html {
        &self.html
    }
}
