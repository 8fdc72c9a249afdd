//! CLI Exit Codes
//!
//! Exit codes for scripted use of the binary; every engine error maps to one.

use crate::core::error::EngineError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Opening the port failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Device did not answer in time
    pub const TIMEOUT: u8 = 4;

    /// No matching serial port
    pub const PORT_NOT_FOUND: u8 = 5;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Marker byte mismatch
    pub const FRAMING_ERROR: u8 = 9;

    /// Unexpected opcode or register in a response
    pub const PROTOCOL_ERROR: u8 = 10;

    /// Stream payload inconsistent with its lengths
    pub const MALFORMED_PAYLOAD: u8 = 11;

    /// Stream could not be resynchronized
    pub const RESYNC_EXHAUSTED: u8 = 12;

    /// I/O failure on the link
    pub const IO_ERROR: u8 = 13;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying output
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Invalid command-line arguments
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::INVALID_ARGS, msg.into())
    }

    /// Configuration could not be loaded or is invalid
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Exit code for an engine error
pub fn exit_code_for(err: &EngineError) -> u8 {
    match err {
        EngineError::Framing { .. } => ExitCodes::FRAMING_ERROR,
        EngineError::Protocol { .. } => ExitCodes::PROTOCOL_ERROR,
        EngineError::MalformedPayload(_) => ExitCodes::MALFORMED_PAYLOAD,
        EngineError::Config(_) => ExitCodes::CONFIG_ERROR,
        EngineError::Transport(t) => match t {
            TransportError::Timeout | TransportError::Eof { .. } => ExitCodes::TIMEOUT,
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::ConnectionFailed(_) => ExitCodes::CONNECTION_FAILED,
            TransportError::ResyncExhausted { .. } => ExitCodes::RESYNC_EXHAUSTED,
            TransportError::IoError(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ExitCodes::PERMISSION_DENIED
            }
            TransportError::IoError(_) => ExitCodes::IO_ERROR,
        },
    }
}

impl From<EngineError> for CliResult {
    fn from(err: EngineError) -> Self {
        Self::Error(exit_code_for(&err), err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        EngineError::from(err).into()
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::NotFound => ExitCodes::PORT_NOT_FOUND,
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::TimedOut => ExitCodes::TIMEOUT,
            _ => ExitCodes::IO_ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Device timeout",
        5 => "Port not found",
        6 => "Permission denied",
        8 => "Configuration error",
        9 => "Framing error",
        10 => "Protocol error",
        11 => "Malformed stream payload",
        12 => "Stream resynchronization exhausted",
        13 => "I/O error",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));

        assert_eq!(CliResult::invalid_args("window").code(), ExitCodes::INVALID_ARGS);
        assert_eq!(CliResult::config_error("bad toml").code(), ExitCodes::CONFIG_ERROR);
    }

    #[test]
    fn test_engine_error_codes() {
        let framing = EngineError::Framing { offset: 0, expected: 0xCC, found: 0 };
        assert_eq!(CliResult::from(framing).code(), ExitCodes::FRAMING_ERROR);

        let resync = TransportError::ResyncExhausted { attempts: 6 };
        let result = CliResult::from(resync);
        assert_eq!(result.code(), ExitCodes::RESYNC_EXHAUSTED);
        assert!(result.message().unwrap().contains("6"));

        assert_eq!(
            exit_code_for(&EngineError::Transport(TransportError::Timeout)),
            ExitCodes::TIMEOUT
        );
    }

    #[test]
    fn test_every_listed_code_is_described() {
        for code in [0, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13, 127] {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
    }
}
