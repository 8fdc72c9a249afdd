//! Transport layer
//!
//! The engine talks to any blocking `std::io::Read + std::io::Write` byte
//! stream. Serial ports are opened through [`serial`]; tests and the
//! `--simulate` flag use the in-memory [`crate::core::simulator::SimulatedDevice`].

mod serial;

pub use serial::{find_port, list_ports, open_serial, PortInfo, SerialConfig, SerialParity};

use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// A read did not complete within the configured timeout
    #[error("Read timed out")]
    Timeout,

    /// The stream ended before a complete frame was read
    #[error("Unexpected end of stream after {read} of {expected} bytes")]
    Eof {
        /// Bytes received before the stream ended
        read: usize,
        /// Bytes the frame needed
        expected: usize,
    },

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Opening the port failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The stream could not be resynchronized on a frame boundary
    #[error("Gave up resynchronizing after {attempts} consecutive failed frames")]
    ResyncExhausted {
        /// Consecutive failed frame reads
        attempts: u32,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// Map an I/O error, turning timeouts into [`TransportError::Timeout`]
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::IoError(err),
        }
    }

    /// Whether this error came from the read timeout elapsing
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes written to the device
    pub bytes_sent: u64,
    /// Bytes read from the device
    pub bytes_received: u64,
    /// Bytes discarded while searching for a start marker
    pub bytes_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_from_io_timeout() {
        let err = TransportError::from_io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_timeout());

        let err = TransportError::from_io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(err, TransportError::IoError(_)));
    }
}
