use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const REQUEST_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub type ShutdownChannel = (JoinHandle<()>, watch::Sender<()>, watch::Receiver<()>);

/// Turn SIGINT or SIGTERM into a broadcast on a shutdown watch.
///
/// SIGINT stops at once. SIGTERM, which Cloud Run and the launcher send,
/// waits out the grace period so in-flight prompts can finish. The sender is
/// returned as well for shutting down from inside the process.
pub fn graceful_shutdown_blocker() -> std::io::Result<ShutdownChannel> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let (tx, rx) = tokio::sync::watch::channel(());
    let signal_tx = tx.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::debug!("SIGINT received, stopping now");
            }
            _ = sigterm.recv() => {
                tokio::time::sleep(REQUEST_GRACE_PERIOD).await;
                tracing::debug!("draining requests before shutdown on SIGTERM");
            }
        }

        let _ = signal_tx.send(());
    });

    Ok((handle, tx, rx))
}

/// Route panics through tracing so they reach the log file too
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

/// One line identifying the binary, logged before anything else starts
pub fn report_build_info() {
    let build = common::prelude::build_info();
    tracing::info!(
        version = build.version,
        profile = build.build_profile,
        features = build.build_features,
        built = build.build_timestamp,
        "caims starting up"
    );
}
