//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). [`ClientConfig::from_lookup`] holds the
//! parsing logic so it can be exercised without touching the process
//! environment.

use std::time::Duration;

use url::Url;

use crate::error::ClientError;
use crate::ws::reconnect::ReconnectPolicy;

const DEFAULT_PAGE_URL: &str = "http://localhost:8080/";

/// Top-level client configuration.
///
/// Loaded once at startup via [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the hosting page. Its scheme decides between `ws` and
    /// `wss`, and its fragment carries the inbox capability.
    pub page_url: Url,

    /// Backend base URL, e.g. `https://mail.example.com`.
    pub backend_url: String,

    /// Reconnect attempt ceiling and backoff cap.
    pub reconnect: ReconnectPolicy,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Generate a key pair when the fragment carries no key.
    pub generate_keypair: bool,
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `PAGE_URL` is set but cannot be
    /// parsed as an absolute URL.
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Missing or unparsable numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `PAGE_URL` is not a valid URL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_page = lookup("PAGE_URL").unwrap_or_else(|| DEFAULT_PAGE_URL.to_string());
        let page_url = Url::parse(&raw_page)
            .map_err(|e| ClientError::Config(format!("PAGE_URL {raw_page:?}: {e}")))?;

        let backend_url = lookup("BACKEND_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| page_url.origin().ascii_serialization());

        let defaults = ReconnectPolicy::default();
        let max_attempts = parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", defaults.max_attempts);
        let max_backoff_secs = parse_or(
            &lookup,
            "RECONNECT_MAX_BACKOFF_SECS",
            defaults.max_backoff.as_secs(),
        );

        let json_logs = lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json"));
        let generate_keypair = lookup("GENERATE_KEYPAIR")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        Ok(Self {
            page_url,
            backend_url,
            reconnect: ReconnectPolicy::new(max_attempts, Duration::from_secs(max_backoff_secs)),
            json_logs,
            generate_keypair,
        })
    }

    /// Returns `true` if the hosting page was loaded over a secure scheme.
    #[must_use]
    pub fn page_is_secure(&self) -> bool {
        self.page_url.scheme() == "https"
    }

    /// Derives the socket endpoint: `wss://<host>/ws` for a secure page,
    /// `ws://<host>/ws` otherwise.
    #[must_use]
    pub fn ws_endpoint(&self) -> String {
        ws_endpoint(&self.backend_url, self.page_is_secure())
    }
}

/// Builds the socket endpoint from a backend URL, stripping any
/// `http://` / `https://` prefix.
#[must_use]
pub fn ws_endpoint(backend_url: &str, secure: bool) -> String {
    let host = backend_url
        .strip_prefix("https://")
        .or_else(|| backend_url.strip_prefix("http://"))
        .unwrap_or(backend_url)
        .trim_end_matches('/');
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}/ws")
}

/// Parses a lookup value as `T`, returning `default` on missing or
/// invalid values.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
