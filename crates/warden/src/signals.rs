//! Signal handling for graceful shutdown.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) initiates a graceful stop;
//! a second one exits at once.

use std::fmt;
use tokio::signal;
use tracing::info;
use warden_core::ShutdownState;

/// Which signal ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    #[cfg(not(unix))]
    CtrlC,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
            #[cfg(not(unix))]
            ShutdownReason::CtrlC => "Ctrl+C",
        }
    }

    /// SIGTERM usually comes from a supervisor restarting the unit.
    pub fn is_supervised(&self) -> bool {
        matches!(self, ShutdownReason::Terminate)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waits for a termination signal, then stops `shutdown` and reports why.
pub async fn wait_for_shutdown(shutdown: &ShutdownState) -> std::io::Result<ShutdownReason> {
    let reason = next_signal().await?;
    if reason.is_supervised() {
        info!("📡 Received {} from the supervisor - stopping gracefully", reason);
    } else {
        info!("📡 Received {} - stopping gracefully, send again to force", reason);
    }
    shutdown.initiate_shutdown();
    Ok(reason)
}

/// Returns the next termination signal.
pub async fn next_signal() -> std::io::Result<ShutdownReason> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let reason = tokio::select! {
            _ = sigint.recv() => ShutdownReason::Interrupt,
            _ = sigterm.recv() => ShutdownReason::Terminate,
        };
        Ok(reason)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(ShutdownReason::CtrlC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_names() {
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
        assert!(ShutdownReason::Terminate.is_supervised());
        assert!(!ShutdownReason::Interrupt.is_supervised());
    }
}
