//! Core module containing the link engine
//!
//! This module provides:
//! - Transport abstraction over serial devices
//! - Threaded connection manager publishing traffic events
//! - Connection registry keyed by port
//! - Frame decoding (Modbus RTU and declared layouts)
//! - Automation: auto-response rules, scheduled sends, record/replay
//! - Input codec for user-entered payloads
//! - History records for external stores

pub mod automation;
pub mod codec;
pub mod connection;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod transport;
