//! Process signals that end a `serve` run.

use std::fmt;

use tokio::signal;
use tracing::debug;

/// The signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Hangup => "SIGHUP",
            ShutdownSignal::Interrupt if cfg!(windows) => "Ctrl+C",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Waits until the process is asked to stop.
///
/// On Unix, SIGHUP, SIGINT, SIGTERM and SIGQUIT all stop the server. On
/// Windows only Ctrl+C does.
///
/// # Returns
///
/// The signal that arrived first, or an error if the handlers could not be
/// installed.
pub async fn wait_for_shutdown() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        debug!("Signal handlers installed");

        let received = tokio::select! {
            _ = hangup.recv() => ShutdownSignal::Hangup,
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
            _ = quit.recv() => ShutdownSignal::Quit,
        };
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        debug!("Waiting for Ctrl+C");
        signal::ctrl_c().await?;
        Ok(ShutdownSignal::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Hangup.to_string(), "SIGHUP");
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Quit.to_string(), "SIGQUIT");
    }
}
