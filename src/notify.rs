use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::PROWL_ADD_URL;

/// Application name shown on the user's devices.
const APPLICATION: &str = "twickets-watch";

/// Anything that can deliver a short text notification to the user.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn push(&self, message: &str) -> Result<()>;
}

/// Prowl client. One POST per notification; delivery to the user's devices
/// happens out-of-band.
pub struct ProwlClient {
    client: Client,
    api_key: String,
}

impl ProwlClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build notification client")?;
        Ok(Self {
            client,
            api_key: api_key.to_owned(),
        })
    }
}

#[async_trait]
impl PushService for ProwlClient {
    async fn push(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(PROWL_ADD_URL)
            .form(&[
                ("apikey", self.api_key.as_str()),
                ("application", APPLICATION),
                ("event", "ticket alert"),
                ("description", message),
            ])
            .send()
            .await
            .context("push request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("push rejected with status {status}");
        }
        debug!("push delivered: {message}");
        Ok(())
    }
}
