use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Local;
use clap::Parser;
use tracing::{debug, error, info, warn};

use twickets_watch::NOTIFIED_IDS_FILE;
use twickets_watch::api::{self, PollError};
use twickets_watch::auth::Session;
use twickets_watch::config::Config;
use twickets_watch::engine;
use twickets_watch::notify::{ProwlClient, PushService};
use twickets_watch::state::NotifiedIds;

#[derive(Parser)]
#[command(name = "twickets-watch", about = "Twickets new-listing monitor")]
struct Args {
    /// Path of the notified-listings ledger
    #[arg(long, default_value = NOTIFIED_IDS_FILE)]
    state_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    // A config error aborts before any network activity; the notifier does
    // not exist yet, so nothing is pushed for it.
    let config = Config::from_env()?;
    info!("all required environment variables are set");

    let notifier = ProwlClient::new(&config.prowl_api_key)?;
    let mut ledger = NotifiedIds::load(&args.state_file);
    info!(
        "loaded {} previously notified listing(s) from {}",
        ledger.len(),
        args.state_file.display()
    );
    let mut session = Session::new();

    match run(&config, &mut session, &mut ledger, &notifier, &args.state_file).await {
        Ok(()) => {
            // User interrupt: flush and leave cleanly.
            session.close();
            if let Err(err) = ledger.save(&args.state_file) {
                warn!("failed to save ledger on shutdown: {err:#}");
            }
            info!("stopped");
            Ok(())
        }
        Err(err) => {
            if let Err(save_err) = ledger.save(&args.state_file) {
                warn!("failed to save ledger on failure exit: {save_err:#}");
            }
            error!("monitor stopped: {err:#}");
            if let Err(push_err) = notifier
                .push(&format!("twickets-watch stopped: {err:#}"))
                .await
            {
                warn!("failed to send failure notification: {push_err:#}");
            }
            Err(err)
        }
    }
}

/// Authenticate, then poll until interrupted.
///
/// `Ok(())` means the user interrupted; any `Err` is a fatal condition the
/// caller reports and exits non-zero on.
async fn run(
    config: &Config,
    session: &mut Session,
    ledger: &mut NotifiedIds,
    notifier: &dyn PushService,
    state_path: &Path,
) -> Result<()> {
    info!("authenticating");
    if session.authenticate(config).await?.is_none() {
        bail!("authentication failed at startup");
    }
    info!("starting ticket check for event {}", config.event_id);

    let mut count: u64 = 1;
    let mut attempts: u32 = 0;

    loop {
        let now = Local::now();
        if engine::in_quiet_window(&now) {
            let pause = engine::quiet_window_sleep(&now);
            info!(
                "quiet window; sleeping {}s until {:02}:00",
                pause.as_secs(),
                engine::WAKE_HOUR
            );
            if !wait_or_interrupt(pause).await {
                return Ok(());
            }
            count = 1;
            attempts = 0;
            continue;
        }

        let (cycle_delay_secs, auth_base_secs) = {
            use rand::Rng;
            let mut rng = rand::rng();
            (
                rng.random_range(engine::MIN_POLL_DELAY_SECS..=engine::MAX_POLL_DELAY_SECS),
                rng.random_range(engine::MIN_AUTH_DELAY_SECS..=engine::MAX_AUTH_DELAY_SECS),
            )
        };
        debug!(
            "check cycle {count} at {} with {cycle_delay_secs}s delay",
            now.format("%H:%M:%S")
        );

        match api::check_event_availability(session, config).await {
            Ok(listings) => {
                attempts = 0;
                count += 1;
                let sent = engine::process_listings(&listings, ledger, notifier, state_path).await?;
                if sent > 0 {
                    info!("notified {sent} new listing(s)");
                }
                if !wait_or_interrupt(Duration::from_secs(cycle_delay_secs)).await {
                    return Ok(());
                }
            }
            Err(PollError::Transient(reason)) => {
                debug!("no data this cycle: {reason}");
                attempts = 0;
                count += 1;
                if !wait_or_interrupt(Duration::from_secs(cycle_delay_secs)).await {
                    return Ok(());
                }
            }
            Err(PollError::AuthRequired(status)) => {
                warn!(
                    "availability check returned status {status}; \
                     assuming expired session (attempt {attempts})"
                );
                if attempts > engine::MAX_AUTH_RETRIES {
                    bail!("exiting after {attempts} failed authentication recoveries");
                }
                let backoff = engine::auth_backoff(auth_base_secs, attempts);
                info!("pausing {}s before re-authenticating", backoff.as_secs());
                session.close();
                if !wait_or_interrupt(backoff).await {
                    return Ok(());
                }
                attempts += 1;
                if session.authenticate(config).await?.is_none() {
                    bail!("re-authentication failed after status {status}");
                }
                info!("re-authenticated");
            }
            Err(err @ PollError::Malformed(_)) => return Err(err.into()),
        }
    }
}

/// Sleep for `duration`, returning `false` if ctrl-c arrived first.
async fn wait_or_interrupt(duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            false
        }
        _ = tokio::time::sleep(duration) => true,
    }
}
