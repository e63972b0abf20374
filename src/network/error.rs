//! Errors raised by the orderer client.

use std::io;
use thiserror::Error;

use evb_core::CodecError;

/// Result type alias for orderer client operations.
pub type Result<T> = std::result::Result<T, OrdererError>;

/// Failures talking to the orderer or to the service directory.
///
/// Transport failures carry the OS error; protocol failures carry the
/// orderer's reply text. The client never retries either kind.
#[derive(Error, Debug)]
pub enum OrdererError {
    /// Could not reach the directory or the orderer while connecting.
    #[error("Connection to {service} at {host}:{port} refused: {source}")]
    ConnectionRefused {
        service: String,
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Socket read/write failed on an established connection.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// The peer answered with something other than `OK`.
    #[error("{request} rejected: {reply}")]
    Protocol { request: String, reply: String },

    /// No advertised service matched the name and user.
    #[error("No service '{service}' advertised for user '{user}'")]
    ServiceNotFound { service: String, user: String },

    #[error("Not connected to the orderer")]
    NotConnected,

    #[error("Already connected to the orderer")]
    AlreadyConnected,

    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),

    /// A message field does not fit the wire format.
    #[error("Message field too large: {0}")]
    TooLarge(String),
}

impl OrdererError {
    /// Whether this failure came from the socket rather than the peer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            OrdererError::Transport(_) | OrdererError::ConnectionRefused { .. }
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, OrdererError::Protocol { .. })
    }
}
