//! Errors raised at the player automation seam.
//!
//! Everything else in the crate uses `anyhow`; the reconciliation loop only
//! needs to tell "player is gone, back off" apart from the rest.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    /// Player process not running, `mpc` missing, or MPD refusing connections.
    #[error("player automation unavailable: {0}")]
    Unavailable(String),

    /// The player answered but the answer could not be understood.
    #[error("unexpected player response: {0}")]
    Unparseable(String),
}

impl AutomationError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}
