//! # PortPilot Core Library
//!
//! Serial link monitoring and automation:
//! - Threaded connection manager turning a polled serial device into an event stream
//! - Modbus RTU and user-declared frame decoding with integrity checks
//! - Auto-response rules, scheduled sends, session record and replay
//!
//! ## Example
//!
//! ```rust,no_run
//! use portpilot_core::{AutomationEngine, AutoResponseRule, ConnectionRegistry, MatchKind, TransportConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ConnectionRegistry::system(Default::default());
//!     let connection = registry.open(TransportConfig::new("/dev/ttyUSB0", 115_200))?;
//!
//!     let engine = AutomationEngine::new(connection.clone(), tokio::runtime::Handle::current());
//!     engine.add_rule(AutoResponseRule::new("ping", b"AT\r\n", MatchKind::Exact, b"OK\r\n"))?;
//!     engine.attach(connection.subscribe());
//!
//!     connection.send(b"ATI\r\n")?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     connection.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::{ConfigError, CoreConfig};
pub use crate::core::automation::{
    AutoResponseRule, AutomationEngine, AutomationError, AutomationEvent, MatchKind, RecordSession,
    ReplayHandle, ScheduledTask,
};
pub use crate::core::codec::{parse_input, to_hex, InputFormat};
pub use crate::core::connection::{
    Connection, ConnectionEvent, ConnectionOptions, ConnectionState, DataEvent, DataSink, Direction,
};
pub use crate::core::history::{ConnectionSessionRecord, HistoryRecord};
pub use crate::core::protocol::{DecodeError, FrameCodec, FrameDecoder, FrameDefinition};
pub use crate::core::registry::ConnectionRegistry;
pub use crate::core::transport::{
    FlowControl, LinkOpener, Parity, SerialLink, StopBits, TransportConfig, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
