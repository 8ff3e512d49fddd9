//! Transport layer for the serial link
//!
//! Provides:
//! - `TransportConfig` and its line-parameter enums
//! - The `SerialLink` handle abstraction used by a connection's reader
//! - The `LinkOpener` seam that acquires a device for a configuration

mod serial;

pub use serial::{list_ports, PortInfo, SystemOpener};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
}

impl Parity {
    /// Single-letter code used in `8N1` style summaries
    pub fn code(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
            Self::Mark => 'M',
            Self::Space => 'S',
        }
    }

    /// All parity settings
    pub fn all() -> &'static [Parity] {
        &[Self::None, Self::Even, Self::Odd, Self::Mark, Self::Space]
    }
}

impl std::str::FromStr for Parity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            "mark" | "m" => Ok(Self::Mark),
            "space" | "s" => Ok(Self::Space),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown parity '{other}'"
            ))),
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// One and a half stop bits
    OnePointFive,
    /// Two stop bits
    Two,
}

impl StopBits {
    /// All stop bit settings
    pub fn all() -> &'static [StopBits] {
        &[Self::One, Self::OnePointFive, Self::Two]
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "1"),
            Self::OnePointFive => write!(f, "1.5"),
            Self::Two => write!(f, "2"),
        }
    }
}

impl std::str::FromStr for StopBits {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown stop bits '{other}'"
            ))),
        }
    }
}

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl FlowControl {
    /// All flow control settings
    pub fn all() -> &'static [FlowControl] {
        &[Self::None, Self::Hardware, Self::Software]
    }
}

impl std::str::FromStr for FlowControl {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "hw" | "hardware" | "rts/cts" => Ok(Self::Hardware),
            "sw" | "software" | "xon/xoff" => Ok(Self::Software),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown flow control '{other}'"
            ))),
        }
    }
}

/// Line parameters of one serial transport.
///
/// A value is frozen once a connection opens with it; apply a new value by
/// closing and reopening the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port identifier (e.g., COM3, /dev/ttyUSB0)
    pub id: String,
    /// Baud rate
    pub baud: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Driver read timeout
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    /// Flow control
    pub flow_control: FlowControl,
}

impl TransportConfig {
    /// Create a configuration with 8N1, no flow control and a 100 ms read timeout
    pub fn new(id: &str, baud: u32) -> Self {
        Self {
            id: id.to_string(),
            baud,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
            flow_control: FlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Set the driver read timeout
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Check the values every transport accepts
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.id.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "port identifier is empty".to_string(),
            ));
        }
        if self.baud == 0 {
            return Err(TransportError::InvalidConfiguration(
                "baud rate must be positive".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "data bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({}{}{}, {})",
            self.id,
            self.baud,
            self.data_bits,
            self.parity.code(),
            self.stop_bits,
            match self.flow_control {
                FlowControl::None => "no FC",
                FlowControl::Hardware => "HW FC",
                FlowControl::Software => "SW FC",
            }
        )
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The connection is already open
    #[error("Port already open: {0}")]
    AlreadyOpen(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A parameter the driver cannot apply
    #[error("Unsupported by driver: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// An acquired byte-stream device.
///
/// The reader polls `bytes_to_read` and only calls `read` when input is
/// buffered, so implementations never need to be interruptible.
pub trait SerialLink: Send {
    /// Number of bytes buffered and ready to read
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush pending output to the device
    fn flush(&mut self) -> io::Result<()>;
}

/// Acquires a `SerialLink` for a configuration
pub trait LinkOpener: Send + Sync {
    /// Open the device described by `config`
    fn open(&self, config: &TransportConfig) -> Result<Box<dyn SerialLink>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_summary() {
        let config = TransportConfig::new("/dev/ttyUSB0", 19200).parity(Parity::Even);
        assert_eq!(config.to_string(), "/dev/ttyUSB0 @ 19200 (8E1, no FC)");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TransportConfig::new("COM3", 0).validate().is_err());
        assert!(TransportConfig::new("COM3", 9600).data_bits(9).validate().is_err());
        assert!(TransportConfig::new("", 9600).validate().is_err());
        assert!(TransportConfig::new("COM3", 9600).data_bits(5).validate().is_ok());
    }

    #[test]
    fn test_parse_line_parameters() {
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("space".parse::<Parity>().unwrap(), Parity::Space);
        assert!("x".parse::<Parity>().is_err());
        assert_eq!("1.5".parse::<StopBits>().unwrap(), StopBits::OnePointFive);
        assert_eq!("hw".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
    }

    #[test]
    fn test_config_toml_roundtrip_keeps_timeout() {
        let config = TransportConfig::new("COM7", 115_200).read_timeout(Duration::from_millis(250));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("read_timeout_ms = 250"));
        let back: TransportConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
