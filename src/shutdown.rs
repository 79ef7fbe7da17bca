// databasebackup/src/shutdown.rs
use anyhow::Result;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    #[cfg(unix)]
    SIGHUP,
    #[cfg(unix)]
    SIGINT,
    #[cfg(unix)]
    SIGTERM,

    #[cfg(windows)]
    CtrlBreak,
    #[cfg(windows)]
    CtrlC,
    #[cfg(windows)]
    CtrlShutdown,
}

/// Cancels `token` when the process is asked to stop. Returns early if the
/// token is cancelled some other way.
#[tracing::instrument(name = "shutdown_listener", skip_all)]
pub async fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            tracing::info!(?signal, "shutting down due to signal");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let signal = tokio::select! {
        _ = hangup.recv() => Signal::SIGHUP,
        _ = interrupt.recv() => Signal::SIGINT,
        _ = terminate.recv() => Signal::SIGTERM,
    };
    Ok(signal)
}

#[cfg(windows)]
async fn shutdown_signal() -> Result<Signal> {
    let mut ctrl_break = tokio::signal::windows::ctrl_break()?;
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
    let mut ctrl_shutdown = tokio::signal::windows::ctrl_shutdown()?;
    let signal = tokio::select! {
        _ = ctrl_break.recv() => Signal::CtrlBreak,
        _ = ctrl_c.recv() => Signal::CtrlC,
        _ = ctrl_shutdown.recv() => Signal::CtrlShutdown,
    };
    Ok(signal)
}
