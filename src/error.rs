//! Error types surfaced to the host

use thiserror::Error;

use crate::core::pty::PtyError;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid working directory, disallowed TERM or unknown profile.
    /// The session never starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The executable could not be started. No session is created.
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// No live session for the given surface or tag
    #[error("No terminal found for {0}")]
    RegistryMiss(String),

    #[error(transparent)]
    Pty(#[from] PtyError),
}

pub type Result<T> = std::result::Result<T, Error>;
