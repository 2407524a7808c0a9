use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced to command sources.
///
/// Engine failures are deliberately absent: the controller logs them and
/// carries on, so they never reach a caller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Rejected at the boundary; state is untouched.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The configured player profile does not include this capability.
    #[error("{0} is not supported by this player profile")]
    Unsupported(&'static str),

    #[error("failed to save settings: {0}")]
    Persistence(#[from] ConfigError),
}

impl ControllerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
