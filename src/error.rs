//! Application-level error type.
//!
//! `EvbError` consolidates the component errors so that binaries and the
//! submission pipeline can use `?` across module boundaries:
//!
//! - **`Config`**: wraps `figment::Error` (file syntax, type mismatches,
//!   bad environment overrides).
//! - **`Configuration`**: values that parse but are semantically wrong
//!   (empty host, port 0, unknown log level).
//! - **`Orderer`**: anything raised by the orderer client, transport and
//!   protocol failures alike.
//! - **`Codec`**: fragment or ring item encoding problems.
//! - **`Io`**: plain I/O, such as spawning a worker thread.

use evb_core::CodecError;
use thiserror::Error;

use crate::network::OrdererError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EvbError>;

#[derive(Error, Debug)]
pub enum EvbError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Orderer error: {0}")]
    Orderer(#[from] OrdererError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Worker thread '{0}' panicked")]
    WorkerPanicked(String),
}

impl EvbError {
    /// Whether retrying after reconnecting could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EvbError::Orderer(err) => err.is_transport(),
            EvbError::Io(_) => true,
            _ => false,
        }
    }
}
