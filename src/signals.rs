use crate::error::{Result, TetherError};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// SIGINT and SIGTERM listeners, installed before anything is spawned
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    pub fn install() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate()).map_err(|e| {
            TetherError::SignalError(format!("Failed to setup SIGTERM handler: {}", e))
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| {
            TetherError::SignalError(format!("Failed to setup SIGINT handler: {}", e))
        })?;

        Ok(Self { sigterm, sigint })
    }

    /// Wait for the first shutdown signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}
