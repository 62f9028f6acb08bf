use std::env;

use anyhow::{Result, bail};
use tracing::error;

/// Immutable runtime configuration, loaded once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub email: String,
    pub password: String,
    /// Issued alongside the API key; not sent on any request today.
    pub client_id: String,
    pub event_id: String,
    pub prowl_api_key: String,
}

impl Config {
    /// Load config from the process environment.
    ///
    /// Every missing (or empty) variable is logged individually and the
    /// returned error enumerates all of them, so a misconfigured deployment
    /// fails with the full list rather than one name at a time.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut missing = Vec::new();
        let mut get = |name: &'static str| match lookup(name) {
            Some(value) if !value.is_empty() => value,
            _ => {
                error!("environment variable {name} is not set");
                missing.push(name);
                String::new()
            }
        };

        let config = Self {
            api_key: get("TWICKETS_API_KEY"),
            email: get("TWICKETS_EMAIL"),
            password: get("TWICKETS_PASSWORD"),
            client_id: get("TWICKETS_CLIENT_ID"),
            event_id: get("TWICKETS_EVENT_ID"),
            prowl_api_key: get("PROWL_API_KEY"),
        };

        if !missing.is_empty() {
            bail!("missing required environment variables: {}", missing.join(", "));
        }
        Ok(config)
    }
}
