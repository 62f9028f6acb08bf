pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod notify;
pub mod state;

/// Twickets site root — API endpoints and listing deep links hang off this.
pub const BASE_URL: &str = "https://www.twickets.live";

/// Prowl push gateway endpoint (public API, keyed per user)
pub const PROWL_ADD_URL: &str = "https://api.prowlapp.com/publicapi/add";

/// Default path of the persisted ledger of already-notified listing ids.
pub const NOTIFIED_IDS_FILE: &str = "notified_ids.json";
