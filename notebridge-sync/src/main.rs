//! notebridge-sync - Mirror a Misskey account's notes to Mastodon
//!
//! Polls the Misskey user's notes and crossposts every eligible one, either
//! once (`--once`) or until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::stream::{Stream, StreamExt};
use libnotebridge::config::Config;
use libnotebridge::logging::{LogFormat, LoggingConfig};
use libnotebridge::platforms::mastodon::MastodonClient;
use libnotebridge::platforms::misskey::MisskeyClient;
use libnotebridge::platforms::SourceFeed;
use libnotebridge::{
    starting_cursor, BridgeError, CrosspostTiming, Crossposter, CursorStore, EngineSettings,
    FileCursorStore, NoteId, StopHandle, SyncEngine,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "notebridge-sync")]
#[command(version)]
#[command(about = "Mirror a Misskey account's notes to Mastodon")]
#[command(long_about = "\
notebridge-sync - Mirror a Misskey account's notes to Mastodon

DESCRIPTION:
    notebridge-sync watches one Misskey user's notes and reposts each new
    original note to a Mastodon account, attachments and content warning
    included. Replies, renotes and notes that mention anyone are skipped.

    The id of the last note seen is saved after every note, so restarting
    never posts a note twice.

USAGE:
    # Run until interrupted
    notebridge-sync

    # Process one batch and exit (for cron)
    notebridge-sync --once

    # Start after a specific note
    notebridge-sync --since-id 9kq2a1b0c0

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current note)
                      A second signal exits immediately

CONFIGURATION:
    Configuration file: ~/.config/notebridge/config.toml
    State file: ~/.local/share/notebridge/state.json

    [misskey]
    instance = \"https://misskey.io\"
    token = \"...\"
    user_id = \"9abcdefghi\"

    [mastodon]
    instance = \"https://mastodon.social\"
    token = \"...\"

    MISSKEY_INSTANCE, MISSKEY_TOKEN, MISSKEY_USER_ID, MASTODON_INSTANCE,
    MASTODON_TOKEN, FETCH_LIMIT and CROSSPOST_DELAY override the file.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Process one batch and exit
    #[arg(long)]
    once: bool,

    /// Path to the configuration file
    #[arg(long, value_name = "PATH", env = "NOTEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Only mirror notes newer than this id (never rewinds the saved cursor)
    #[arg(long, value_name = "ID")]
    since_id: Option<String>,

    /// Log output format: text, json or pretty [default: text]
    #[arg(long, value_name = "FORMAT", env = "NOTEBRIDGE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<BridgeError>()
            .map_or(1, BridgeError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let sync = &config.sync;

    let source: Arc<dyn SourceFeed> = Arc::new(MisskeyClient::from_config(
        &config.misskey,
        sync.request_timeout,
    )?);
    let destination = Arc::new(MastodonClient::from_config(&config.mastodon)?);
    let crossposter = Crossposter::new(
        source.clone(),
        destination,
        CrosspostTiming {
            post_delay: sync.crosspost_delay,
            attachment_delay: sync.attachment_delay,
            request_timeout: sync.request_timeout,
            media_processing_timeout: sync.media_processing_timeout,
        },
    );

    let store = FileCursorStore::new(&sync.state_file);
    let explicit = cli.since_id.map(NoteId::from).or_else(|| sync.since_id.clone());
    let cursor = starting_cursor(explicit, store.load());
    info!(
        state_file = %store.path().display(),
        since_id = ?cursor.as_ref().map(NoteId::as_str),
        "notebridge-sync starting"
    );

    let stop = StopHandle::new();
    setup_signal_handlers(stop.clone()).context("Signal setup failed")?;

    let mut engine = SyncEngine::new(
        source,
        crossposter,
        Box::new(store),
        EngineSettings::from_config(&config.misskey.user_id, sync),
        cursor,
    )
    .with_stop_handle(stop);

    if cli.once {
        let result = engine.run_batch().await;
        engine.shutdown();
        let report = result.map_err(BridgeError::from)?;
        info!(
            observed = report.observed,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Processed one batch, exiting"
        );
    } else {
        let totals = engine.run().await;
        info!(
            observed = totals.observed,
            succeeded = totals.succeeded,
            skipped = totals.skipped,
            failed = totals.failed,
            "notebridge-sync stopped"
        );
    }

    Ok(())
}

/// Request a graceful stop on the first signal. Returns `true` when a
/// second signal arrives, `false` if the stream ends first.
async fn forward_signals<S>(mut signals: S, stop: StopHandle) -> bool
where
    S: Stream + Unpin,
    S::Item: std::fmt::Debug,
{
    let mut received = false;
    while let Some(signal) = signals.next().await {
        if received {
            warn!(signal = ?signal, "Received second shutdown signal, exiting now");
            return true;
        }
        info!(signal = ?signal, "Received shutdown signal, stopping gracefully...");
        stop.request_stop();
        received = true;
    }
    false
}

/// Set the stop flag on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(stop: StopHandle) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let signals = Signals::new([SIGINT, SIGTERM])?;
    tokio::spawn(async move {
        if forward_signals(signals, stop).await {
            std::process::exit(1);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(stop: StopHandle) -> std::io::Result<()> {
    let signals = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ("ctrl-c", ()))
    });
    tokio::spawn(async move {
        if forward_signals(Box::pin(signals), stop).await {
            std::process::exit(1);
        }
    });

    Ok(())
}
