use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, TimeZone, Timelike};
use tracing::{debug, warn};

use crate::BASE_URL;
use crate::api::Listing;
use crate::notify::PushService;
use crate::state::NotifiedIds;

/// Normal inter-poll pause bounds, seconds.
pub const MIN_POLL_DELAY_SECS: u64 = 15;
pub const MAX_POLL_DELAY_SECS: u64 = 30;

/// Bounds for the auth-failure backoff base, seconds. A fresh base is drawn
/// each cycle so repeated 403s don't land on a fixed schedule.
pub const MIN_AUTH_DELAY_SECS: u64 = 180;
pub const MAX_AUTH_DELAY_SECS: u64 = 360;

/// Consecutive authentication failures tolerated before giving up.
pub const MAX_AUTH_RETRIES: u32 = 5;

/// Polling stops at this hour...
const QUIET_START_HOUR: u32 = 22;
/// ...and resumes at this one.
pub const WAKE_HOUR: u32 = 8;

/// True when `now` falls inside the overnight no-polling window.
pub fn in_quiet_window<Tz: TimeZone>(now: &DateTime<Tz>) -> bool {
    now.hour() >= QUIET_START_HOUR || now.hour() < WAKE_HOUR
}

/// How long to sleep from `now` until the next 08:00 wake-up.
///
/// Before 08:00 that is later the same day; at or after 22:00 it is the
/// following morning.
pub fn quiet_window_sleep<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let local = now.naive_local();
    let wake_day = if local.hour() >= QUIET_START_HOUR {
        local.date() + chrono::Days::new(1)
    } else {
        local.date()
    };
    let wake_time = NaiveTime::from_hms_opt(WAKE_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    let seconds = (wake_day.and_time(wake_time) - local).num_seconds().max(0);
    Duration::from_secs(seconds as u64)
}

/// Backoff before the n-th re-authentication: `base * 2^attempts`.
pub fn auth_backoff(base_secs: u64, attempts: u32) -> Duration {
    Duration::from_secs(base_secs.saturating_mul(2u64.saturating_pow(attempts)))
}

/// The notifiable id is the suffix after the first `@` of the compound
/// listing id. An id without a separator is used whole.
pub fn extract_listing_id(raw: &str) -> &str {
    match raw.split_once('@') {
        Some((_, suffix)) => suffix,
        None => {
            warn!("listing id {raw:?} has no '@' separator");
            raw
        }
    }
}

/// Deep link into the marketplace app for a listing.
pub fn block_url(id: &str) -> String {
    format!("{BASE_URL}/app/block/{id},1")
}

/// Notify every listing not yet in the ledger, in the order the service
/// returned them, persisting the ledger after each addition.
///
/// A failed push leaves the id out of the ledger so the listing is retried
/// next cycle. Returns the number of notifications sent; ledger write
/// failures propagate.
pub async fn process_listings(
    listings: &[Listing],
    ledger: &mut NotifiedIds,
    notifier: &dyn PushService,
    state_path: &Path,
) -> Result<usize> {
    let mut sent = 0;
    for listing in listings {
        let id = extract_listing_id(&listing.id);
        if ledger.contains(id) {
            continue;
        }
        debug!("new listing {id} (amount {:?})", listing.amount);
        match notifier.push(&format!("Check {}", block_url(id))).await {
            Ok(()) => {
                ledger.insert(id.to_owned());
                ledger.save(state_path)?;
                sent += 1;
            }
            Err(err) => {
                warn!("failed to notify listing {id}: {err:#}");
            }
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    fn at_hour(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, minute, 0)
            .single()
            .expect("valid test time")
    }

    fn listing(id: &str) -> Listing {
        Listing {
            id: id.to_owned(),
            amount: None,
        }
    }

    fn temp_ledger(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "twickets-watch-engine-{name}-{}.json",
            std::process::id()
        ))
    }

    struct RecordingPush {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingPush {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn messages(&self) -> Vec<String> {
            self.sent.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl PushService for RecordingPush {
        async fn push(&self, message: &str) -> Result<()> {
            if self.fail {
                bail!("push unavailable");
            }
            self.sent.lock().expect("lock poisoned").push(message.to_owned());
            Ok(())
        }
    }

    // ── quiet window ───────────────────────────────────────────────

    #[test]
    fn late_evening_is_quiet() {
        assert!(in_quiet_window(&at_hour(22, 0)));
        assert!(in_quiet_window(&at_hour(23, 0)));
    }

    #[test]
    fn early_morning_is_quiet() {
        assert!(in_quiet_window(&at_hour(0, 30)));
        assert!(in_quiet_window(&at_hour(7, 59)));
    }

    #[test]
    fn daytime_is_not_quiet() {
        assert!(!in_quiet_window(&at_hour(8, 0)));
        assert!(!in_quiet_window(&at_hour(12, 0)));
        assert!(!in_quiet_window(&at_hour(21, 59)));
    }

    #[test]
    fn sleep_from_23_runs_until_8_next_day() {
        assert_eq!(
            quiet_window_sleep(&at_hour(23, 0)),
            Duration::from_secs(9 * 3600)
        );
    }

    #[test]
    fn sleep_from_22_runs_until_8_next_day() {
        assert_eq!(
            quiet_window_sleep(&at_hour(22, 0)),
            Duration::from_secs(10 * 3600)
        );
    }

    #[test]
    fn sleep_before_dawn_ends_same_morning() {
        assert_eq!(
            quiet_window_sleep(&at_hour(1, 30)),
            Duration::from_secs(6 * 3600 + 30 * 60)
        );
    }

    // ── backoff ────────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(auth_backoff(180, 0), Duration::from_secs(180));
        assert_eq!(auth_backoff(180, 1), Duration::from_secs(360));
        assert_eq!(auth_backoff(180, 3), Duration::from_secs(1440));
        assert_eq!(auth_backoff(360, 5), Duration::from_secs(11520));
    }

    #[test]
    fn backoff_grows_monotonically() {
        let mut previous = Duration::ZERO;
        for attempts in 0..=MAX_AUTH_RETRIES {
            let current = auth_backoff(200, attempts);
            assert!(current > previous);
            previous = current;
        }
    }

    // ── id extraction ──────────────────────────────────────────────

    #[test]
    fn id_is_suffix_after_first_separator() {
        assert_eq!(extract_listing_id("catalog@123456"), "123456");
        assert_eq!(extract_listing_id("a@b@c"), "b@c");
    }

    #[test]
    fn id_without_separator_is_used_whole() {
        assert_eq!(extract_listing_id("123456"), "123456");
    }

    #[test]
    fn block_url_points_at_listing() {
        assert_eq!(
            block_url("123456"),
            "https://www.twickets.live/app/block/123456,1"
        );
    }

    // ── listing processing ─────────────────────────────────────────

    #[tokio::test]
    async fn new_listings_notify_in_order_and_persist() {
        let path = temp_ledger("in-order");
        let mut ledger = NotifiedIds::default();
        let push = RecordingPush::new();
        let listings = [listing("catalog@AAA"), listing("catalog@BBB")];

        let sent = process_listings(&listings, &mut ledger, &push, &path)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(
            push.messages(),
            vec![
                "Check https://www.twickets.live/app/block/AAA,1".to_owned(),
                "Check https://www.twickets.live/app/block/BBB,1".to_owned(),
            ]
        );
        assert!(ledger.contains("AAA"));
        assert!(ledger.contains("BBB"));

        let reloaded = NotifiedIds::load(&path);
        assert!(reloaded.contains("AAA"));
        assert!(reloaded.contains("BBB"));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn already_notified_listing_is_silent() {
        let path = temp_ledger("dedup");
        let mut ledger = NotifiedIds::default();
        ledger.insert("AAA".to_owned());
        let push = RecordingPush::new();

        let sent = process_listings(&[listing("catalog@AAA")], &mut ledger, &push, &path)
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert!(push.messages().is_empty());
        assert_eq!(ledger.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn failed_push_leaves_id_unrecorded() {
        let path = temp_ledger("push-fail");
        let mut ledger = NotifiedIds::default();
        let push = RecordingPush::failing();

        let sent = process_listings(&[listing("catalog@AAA")], &mut ledger, &push, &path)
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert!(ledger.is_empty());
        std::fs::remove_file(&path).ok();
    }
}
