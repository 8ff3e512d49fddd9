//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::automation::AutomationError;
use crate::core::codec::CodecError;
use crate::core::protocol::DecodeError;
use crate::core::transport::TransportError;
use std::error::Error;

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

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Data validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

fn transport_code(err: &TransportError) -> u8 {
    match err {
        TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
        TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
        TransportError::AlreadyOpen(_) => ExitCodes::DEVICE_BUSY,
        TransportError::InvalidConfiguration(_) | TransportError::Unsupported(_) => ExitCodes::INVALID_ARGS,
        TransportError::ConnectionFailed(_) | TransportError::NotConnected | TransportError::IoError(_) => {
            ExitCodes::CONNECTION_FAILED
        }
    }
}

fn io_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        _ => ExitCodes::ERROR,
    }
}

/// Exit code for the first error in a chain the CLI knows about
pub fn exit_code_for<'a>(chain: impl IntoIterator<Item = &'a (dyn Error + 'static)>) -> u8 {
    chain
        .into_iter()
        .find_map(|err| {
            if let Some(e) = err.downcast_ref::<TransportError>() {
                Some(transport_code(e))
            } else if let Some(e) = err.downcast_ref::<ConfigError>() {
                Some(match e {
                    ConfigError::Io(io) => io_code(io),
                    _ => ExitCodes::CONFIG_ERROR,
                })
            } else if err.is::<AutomationError>() || err.is::<CodecError>() {
                Some(ExitCodes::INVALID_ARGS)
            } else if err.is::<DecodeError>() {
                Some(ExitCodes::PROTOCOL_ERROR)
            } else {
                err.downcast_ref::<std::io::Error>().map(io_code)
            }
        })
        .unwrap_or(ExitCodes::ERROR)
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Protocol error",
        11 => "Operation cancelled",
        13 => "Device busy",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Exit code table, one code per line
pub fn exit_code_table() -> String {
    let mut table = String::from("Exit Codes:\n");
    for code in [0, 1, 2, 3, 6, 7, 8, 9, 11, 13, 14, 17, 127] {
        table.push_str(&format!("  {:>3}  {}\n", code, exit_code_description(code)));
    }
    table
}
