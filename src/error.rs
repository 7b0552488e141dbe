//! Error types for pool operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while configuring or running a client pool.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The pool was started without an agent factory.
    #[error("Agent factory must be set before starting the client")]
    MissingAgentFactory,

    /// The pool was started while it is already running.
    #[error("Client is already running")]
    AlreadyRunning,

    /// Frame length below the configured minimum.
    #[error("Message too short: {len} bytes, minimum is {min}")]
    MessageTooShort { len: usize, min: usize },

    /// Frame length above the configured maximum.
    #[error("Message too long: {len} bytes, maximum is {max}")]
    MessageTooLong { len: usize, max: usize },

    /// Connection closed locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The client is still closing and cannot be started yet.
    #[error("Client is closing")]
    Closing,

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
                || e.kind() == io::ErrorKind::ConnectionRefused
        ) || matches!(self, Self::Timeout)
    }

    /// Check if this error means the peer or the local side closed the socket.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MessageTooLong { len: 5000, max: 4096 };
        assert_eq!(
            format!("{err}"),
            "Message too long: 5000 bytes, maximum is 4096"
        );

        let err = Error::config("conn_num out of range");
        assert_eq!(format!("{err}"), "Invalid configuration: conn_num out of range");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_disconnect_classification() {
        let eof: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(eof.is_disconnect());
        assert!(Error::ConnectionClosed.is_disconnect());
        assert!(!Error::AlreadyRunning.is_disconnect());
    }
}
