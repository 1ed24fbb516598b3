use queue_tunnel_core::ConfigError;
use queue_tunnel_pty::PtyError;
use thiserror::Error;

use crate::pump::PumpError;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to start shell: {0}")]
    Spawn(#[from] PtyError),
    #[error("Terminal error: {0}")]
    Terminal(#[source] std::io::Error),
    #[error(transparent)]
    Pump(#[from] PumpError),
}
