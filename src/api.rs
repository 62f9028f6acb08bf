use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::BASE_URL;
use crate::auth::Session;
use crate::config::Config;

/// Why a poll cycle produced no listings. The control loop matches on this
/// to pick the recovery path.
#[derive(Debug, Error)]
pub enum PollError {
    /// Non-200 from the inventory endpoint — the service's way of flagging
    /// an expired or invalid session (typically 403).
    #[error("availability check returned status {0}")]
    AuthRequired(u16),

    /// No data this cycle; the next cycle retries as normal.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A 200 response whose body cannot be decoded. Propagates to the
    /// outermost handler.
    #[error("malformed inventory response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Envelope wrapping the inventory listing response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEnvelope {
    #[serde(default)]
    pub response_data: Option<Vec<Listing>>,
    pub response_code: Option<i64>,
    pub clock: Option<serde_json::Value>,
}

/// A single ticket listing. Only the compound id matters; `amount` is kept
/// for logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
}

/// Fetch the current listings for the configured event.
///
/// Returns within one HTTP round trip (bounded by the client timeout).
/// Timeouts keep the connection; other transport errors close it so the
/// next cycle reconnects.
pub async fn check_event_availability(
    session: &mut Session,
    config: &Config,
) -> Result<Vec<Listing>, PollError> {
    session.ensure_connection().await;
    let Some(client) = session.client().cloned() else {
        return Err(PollError::Transient("no open connection".into()));
    };

    let url = format!(
        "{BASE_URL}/services/g2/inventory/listings/{}?api_key={}",
        config.event_id, config.api_key
    );
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            return Err(PollError::Transient(format!("response not ready: {err}")));
        }
        Err(err) => {
            session.close();
            return Err(PollError::Transient(format!("transport error: {err}")));
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        return Err(PollError::AuthRequired(status.as_u16()));
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            session.close();
            return Err(PollError::Transient(format!("failed to read response: {err}")));
        }
    };
    let envelope: InventoryEnvelope = serde_json::from_str(&body)?;
    let listings = envelope.response_data.unwrap_or_default();
    debug!(
        "response code {:?}, clock {:?}, {} listing(s)",
        envelope.response_code,
        envelope.clock,
        listings.len()
    );
    Ok(listings)
}
