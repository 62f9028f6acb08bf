use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use crate::BASE_URL;
use crate::config::Config;

/// Browser-like user agent; the marketplace refuses obvious bot agents.
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:101.0) Gecko/20100101 Firefox/101.0";

/// Connection attempts before giving up for the current cycle.
const MAX_CONNECT_RETRIES: u32 = 5;

/// Base delay between connection attempts (doubles each retry).
const CONNECT_BASE_DELAY: Duration = Duration::from_secs(60);

/// Per-request timeout; bounds every login and poll round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One session against the marketplace: an open HTTP client (cookie jar
/// included, which is what actually carries the authenticated state) plus the
/// token from the last successful login. `client == None` means
/// "not connected".
pub struct Session {
    client: Option<Client>,
    token: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            client: None,
            token: None,
        }
    }

    /// Handle to the open connection, if any.
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Token from the last successful login, if any.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Drop the connection; the next `ensure_connection` reopens it.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("closed connection to {BASE_URL}");
        }
    }

    /// Ensure the connection is open, reconnecting if necessary.
    ///
    /// Retries with pure exponential delay. Exhausting the retries logs an
    /// error and leaves the session disconnected; callers treat that as a
    /// transient failure for the current cycle.
    pub async fn ensure_connection(&mut self) {
        if self.client.is_some() {
            return;
        }
        for retry in 0..MAX_CONNECT_RETRIES {
            debug!("attempting connection to {BASE_URL}");
            match connect().await {
                Ok(client) => {
                    debug!("connection successful");
                    self.client = Some(client);
                    return;
                }
                Err(err) => {
                    let delay = CONNECT_BASE_DELAY * 2u32.saturating_pow(retry);
                    warn!(
                        "connection failed: {err:#}; retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        error!("max retries reached; could not establish a connection");
    }

    /// Log in to the marketplace.
    ///
    /// Returns the session token on success and `None` when the service
    /// refuses the login (non-200 status or an incomplete response
    /// envelope). Only transport failures are errors; the caller decides
    /// whether a missing token is fatal.
    pub async fn authenticate(&mut self, config: &Config) -> Result<Option<String>> {
        self.ensure_connection().await;
        let Some(client) = self.client.clone() else {
            bail!("no open connection for login");
        };

        let url = format!("{BASE_URL}/services/auth/login?api_key={}", config.api_key);
        let body = serde_json::json!({
            "login": config.email,
            "password": config.password,
            "accountType": "U",
        });
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("login request failed")?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("authentication error status {status}");
            return Ok(None);
        }
        let payload: serde_json::Value =
            response.json().await.context("malformed login response")?;
        let token = validate_auth_response(&payload);
        if token.is_some() {
            debug!("authenticated successfully");
        }
        self.token = token.clone();
        Ok(token)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a client and probe the host once, so DNS and TCP failures surface
/// here rather than mid-poll. Any response, even an error status, means the
/// host is reachable.
async fn connect() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .cookie_store(true)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    client.head(BASE_URL).send().await.context("host unreachable")?;
    Ok(client)
}

/// A login response is accepted only when all four top-level envelope fields
/// are present; anything else yields "no token".
fn validate_auth_response(response: &serde_json::Value) -> Option<String> {
    const REQUIRED_KEYS: [&str; 4] = ["responseData", "responseCode", "description", "clock"];
    if !REQUIRED_KEYS.iter().all(|key| response.get(key).is_some()) {
        return None;
    }
    response.get("responseData")?.as_str().map(str::to_owned)
}
