//! User-agent strings and their seed file.
//!
//! Responsibilities:
//! - Load newline-delimited user agents from the configured file.
//! - Build the browser-like header set sent alongside a user agent.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use http::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};

/// Opaque user-agent string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgent(String);

impl UserAgent {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserAgent {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserAgent {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UserAgentError {
    #[error("user-agent file missing: {path:?}")]
    FileMissing { path: PathBuf },
    #[error("I/O error reading {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("user agent cannot be sent as a header: {0:?}")]
    InvalidHeader(String),
}

/// Parse newline-delimited user agents, skipping blank lines.
pub fn parse_user_agents(contents: &str) -> Vec<UserAgent> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(UserAgent::from)
        .collect()
}

/// Read the user-agent seed file. There is no fallback source, so a missing
/// file is an error.
pub fn read_user_agent_file(path: &Path) -> Result<Vec<UserAgent>, UserAgentError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_user_agents(&contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(UserAgentError::FileMissing {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(UserAgentError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

/// Headers a browser carrying `user_agent` would send.
pub fn browser_headers(user_agent: &UserAgent) -> Result<HeaderMap, UserAgentError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent.as_str())
            .map_err(|_| UserAgentError::InvalidHeader(user_agent.to_string()))?,
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
    Ok(headers)
}
