//! Errors surfaced by the integration layer.

use riposte_core::RiposteError;
use thiserror::Error;

/// Integration-layer error.
#[derive(Debug, Error)]
pub enum GameError {
    /// A core operation failed.
    #[error(transparent)]
    Core(#[from] RiposteError),

    /// The blocking task running a worker tick panicked or was cancelled.
    #[error("progression worker task failed: {0}")]
    WorkerJoin(#[source] tokio::task::JoinError),

    /// The global subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// A deployment profile name did not match any preset.
    #[error("unknown deployment profile `{0}`")]
    UnknownProfile(String),
}

impl GameError {
    /// Whether retrying the same call may succeed (busy or locked database).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_retryable())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GameError>;
