//! Engine error types

use super::transport::TransportError;
use thiserror::Error;

/// Errors raised by the protocol engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A start or end marker was not where the frame layout puts it
    #[error("Framing error at byte {offset}: expected 0x{expected:02X}, found 0x{found:02X}")]
    Framing {
        /// Byte offset inside the frame
        offset: usize,
        /// Marker the layout requires
        expected: u8,
        /// Byte actually received
        found: u8,
    },

    /// A well-framed response carried the wrong opcode or register
    #[error("Protocol error at byte {offset}: expected 0x{expected:02X}, found 0x{found:02X}")]
    Protocol {
        /// Byte offset inside the frame
        offset: usize,
        /// Expected opcode or register address
        expected: u8,
        /// Byte actually received
        found: u8,
    },

    /// Underlying I/O failure, timeout or exhausted resynchronization
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Streaming payload inconsistent with its declared lengths
    #[error("Malformed stream payload: {0}")]
    MalformedPayload(String),

    /// Invalid engine or smoother configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Errors the streaming loop may recover from by resynchronizing
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Framing { .. } | Self::Protocol { .. } => true,
            Self::Transport(TransportError::Timeout) => true,
            _ => false,
        }
    }
}

/// Engine result alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_in_message() {
        let err = EngineError::Framing {
            offset: 9,
            expected: 0xCD,
            found: 0x00,
        };
        assert_eq!(
            err.to_string(),
            "Framing error at byte 9: expected 0xCD, found 0x00"
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(EngineError::Protocol { offset: 3, expected: 0xFE, found: 0xF6 }.is_recoverable());
        assert!(EngineError::Transport(TransportError::Timeout).is_recoverable());
        let eof = TransportError::Eof { read: 0, expected: 1 };
        assert!(!EngineError::Transport(eof).is_recoverable());
        assert!(!EngineError::MalformedPayload("short".into()).is_recoverable());
    }
}
