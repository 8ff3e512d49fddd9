//! Records handed to the history store
//!
//! The core does not persist anything itself. A store subscribes to the
//! connection events and turns each chunk into a `HistoryRecord`; each open
//! period of a connection is summarized by a `ConnectionSessionRecord`.

use super::connection::{DataEvent, Direction};
use super::transport::{Parity, StopBits, TransportConfig};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One transmitted or received chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Wall-clock time of the chunk
    pub timestamp: DateTime<Local>,
    /// Port identifier
    pub port: String,
    /// Direction
    pub direction: Direction,
    /// Raw bytes
    #[serde(with = "crate::core::codec::hex_bytes")]
    pub bytes: Vec<u8>,
    /// Display mode the chunk was shown in, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    /// Open period the chunk belongs to
    pub session_id: Uuid,
}

impl HistoryRecord {
    /// Build a record for a traffic event
    pub fn from_event(port: &str, event: &DataEvent, session_id: Uuid) -> Self {
        Self {
            timestamp: event.timestamp.wall,
            port: port.to_string(),
            direction: event.direction,
            bytes: event.bytes.to_vec(),
            display_mode: None,
            session_id,
        }
    }

    /// Tag the record with the display mode it was shown in
    #[must_use]
    pub fn with_display_mode(mut self, mode: &str) -> Self {
        self.display_mode = Some(mode.to_string());
        self
    }

    /// Format as a single text line
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.port,
            self.direction,
            hex::encode_upper(&self.bytes)
        )
    }
}

/// One open period of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSessionRecord {
    /// Identifier shared with the period's `HistoryRecord`s
    pub session_id: Uuid,
    /// Port identifier
    pub port: String,
    /// Baud rate
    pub baud: u32,
    /// Data bits
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// When the connection opened
    pub start_time: DateTime<Local>,
    /// When the connection closed, if it has
    pub end_time: Option<DateTime<Local>>,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
}

impl ConnectionSessionRecord {
    /// Start a record for a connection opening now
    pub fn begin(config: &TransportConfig) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            port: config.id.clone(),
            baud: config.baud,
            data_bits: config.data_bits,
            parity: config.parity,
            stop_bits: config.stop_bits,
            start_time: Local::now(),
            end_time: None,
            notes: String::new(),
        }
    }

    /// Mark the period as ended now
    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Local::now());
        }
    }

    /// Build a `HistoryRecord` belonging to this period
    pub fn record(&self, event: &DataEvent) -> HistoryRecord {
        HistoryRecord::from_event(&self.port, event, self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_carries_session_and_direction() {
        let config = TransportConfig::new("COM4", 9600);
        let mut session = ConnectionSessionRecord::begin(&config);
        let event = DataEvent::new(Direction::Rx, &b"\x01\x03"[..]);

        let record = session.record(&event);
        assert_eq!(record.session_id, session.session_id);
        assert_eq!(record.port, "COM4");
        assert_eq!(record.direction, Direction::Rx);
        assert_eq!(record.bytes, vec![0x01, 0x03]);
        assert!(record.to_line().ends_with("COM4 RX 0103"));

        session.finish();
        let ended = session.end_time;
        session.finish();
        assert!(ended.is_some());
        assert_eq!(session.end_time, ended);
    }

    #[test]
    fn test_record_serializes_bytes_as_hex() {
        let event = DataEvent::new(Direction::Tx, &b"OK"[..]);
        let record = HistoryRecord::from_event("COM1", &event, Uuid::nil()).with_display_mode("hex");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"bytes\":\"4f4b\""));
        assert!(json.contains("\"display_mode\":\"hex\""));
        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
