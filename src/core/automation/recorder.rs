//! Session capture for later replay

use crate::core::codec::hex_bytes;
use crate::core::connection::{DataEvent, Direction};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One captured chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Direction
    pub direction: Direction,
    /// Bytes
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Milliseconds since the first captured chunk
    pub elapsed_ms: u64,
}

/// Captured timeline of one recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSession {
    /// Session name
    pub name: String,
    /// Wall-clock time of the first chunk
    pub started_at: Option<DateTime<Local>>,
    /// Chunks in capture order
    pub records: Vec<RecordEntry>,
    #[serde(skip)]
    anchor: Option<Instant>,
}

impl RecordSession {
    /// Empty session
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started_at: None,
            records: Vec::new(),
            anchor: None,
        }
    }

    /// Build a session from already-timed entries
    pub fn from_records(name: &str, mut records: Vec<RecordEntry>) -> Self {
        records.sort_by_key(|r| r.elapsed_ms);
        Self {
            records,
            ..Self::new(name)
        }
    }

    /// Append a chunk. The first one anchors the timeline at 0 ms.
    pub fn push(&mut self, event: &DataEvent) {
        let anchor = *self.anchor.get_or_insert(event.timestamp.instant);
        if self.started_at.is_none() {
            self.started_at = Some(event.timestamp.wall);
        }

        let elapsed = event.timestamp.instant.saturating_duration_since(anchor);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        // RX and TX timestamps are taken on different threads
        let floor = self.records.last().map_or(0, |r| r.elapsed_ms);

        self.records.push(RecordEntry {
            direction: event.direction,
            data: event.bytes.to_vec(),
            elapsed_ms: elapsed_ms.max(floor),
        });
    }

    /// Entries in one direction
    pub fn entries(&self, direction: Direction) -> impl Iterator<Item = &RecordEntry> {
        self.records.iter().filter(move |r| r.direction == direction)
    }

    /// Bytes transmitted
    pub fn tx_bytes(&self) -> usize {
        self.entries(Direction::Tx).map(|r| r.data.len()).sum()
    }

    /// Bytes received
    pub fn rx_bytes(&self) -> usize {
        self.entries(Direction::Rx).map(|r| r.data.len()).sum()
    }

    /// Time from the first to the last chunk
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.records.last().map_or(0, |r| r.elapsed_ms))
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Import from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut session: Self = serde_json::from_str(json)?;
        session.records.sort_by_key(|r| r.elapsed_ms);
        Ok(session)
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    active: Option<RecordSession>,
    archive: HashMap<String, Arc<RecordSession>>,
}

/// Active capture plus the archive of stopped sessions
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    pub(crate) fn start(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(previous) = state.active.take() {
            warn!(session = %previous.name, "Recording restarted, archiving the unfinished session");
            state.archive.insert(previous.name.clone(), Arc::new(previous));
        }
        info!(session = %name, "Recording started");
        state.active = Some(RecordSession::new(name));
    }

    pub(crate) fn stop(&self) -> Option<Arc<RecordSession>> {
        let mut state = self.state.lock();
        let session = Arc::new(state.active.take()?);
        info!(
            session = %session.name,
            records = session.records.len(),
            duration = ?session.duration(),
            "Recording stopped"
        );
        state.archive.insert(session.name.clone(), Arc::clone(&session));
        Some(session)
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub(crate) fn record(&self, event: &DataEvent) {
        if let Some(session) = self.state.lock().active.as_mut() {
            session.push(event);
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<RecordSession>> {
        self.state.lock().archive.get(name).cloned()
    }

    pub(crate) fn insert(&self, session: RecordSession) -> Arc<RecordSession> {
        debug!(session = %session.name, records = session.records.len(), "Recording imported");
        let session = Arc::new(session);
        self.state.lock().archive.insert(session.name.clone(), Arc::clone(&session));
        session
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<RecordSession>> {
        self.state.lock().archive.remove(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().archive.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Timestamp;

    fn event_at(base: Instant, ms: u64, direction: Direction, data: &'static [u8]) -> DataEvent {
        DataEvent::with_timestamp(
            direction,
            data,
            Timestamp {
                instant: base + Duration::from_millis(ms),
                wall: Local::now(),
            },
        )
    }

    #[test]
    fn test_first_event_anchors_timeline() {
        let base = Instant::now();
        let mut session = RecordSession::new("s");
        session.push(&event_at(base, 500, Direction::Tx, b"A"));
        session.push(&event_at(base, 620, Direction::Rx, b"BB"));
        session.push(&event_at(base, 900, Direction::Tx, b"CCC"));

        let elapsed: Vec<u64> = session.records.iter().map(|r| r.elapsed_ms).collect();
        assert_eq!(elapsed, vec![0, 120, 400]);
        assert_eq!(session.tx_bytes(), 4);
        assert_eq!(session.rx_bytes(), 2);
        assert_eq!(session.duration(), Duration::from_millis(400));
    }

    #[test]
    fn test_elapsed_never_decreases() {
        let base = Instant::now();
        let mut session = RecordSession::new("s");
        session.push(&event_at(base, 100, Direction::Rx, b"a"));
        session.push(&event_at(base, 300, Direction::Rx, b"b"));
        session.push(&event_at(base, 250, Direction::Tx, b"c"));
        let elapsed: Vec<u64> = session.records.iter().map(|r| r.elapsed_ms).collect();
        assert_eq!(elapsed, vec![0, 200, 200]);
    }

    #[test]
    fn test_stop_archives_and_overwrites() {
        let recorder = Recorder::default();
        let base = Instant::now();
        assert!(recorder.stop().is_none());

        recorder.start("run");
        recorder.record(&event_at(base, 0, Direction::Tx, b"first"));
        let first = recorder.stop().unwrap();
        assert_eq!(first.records.len(), 1);

        recorder.record(&event_at(base, 10, Direction::Tx, b"ignored"));
        assert_eq!(recorder.get("run").unwrap().records.len(), 1);

        recorder.start("run");
        recorder.record(&event_at(base, 20, Direction::Tx, b"a"));
        recorder.record(&event_at(base, 30, Direction::Tx, b"b"));
        recorder.stop();
        assert_eq!(recorder.get("run").unwrap().records.len(), 2);
        assert_eq!(recorder.names(), vec!["run".to_string()]);
    }

    #[test]
    fn test_json_export() {
        let session = RecordSession::from_records(
            "log",
            vec![RecordEntry {
                direction: Direction::Tx,
                data: vec![0x41, 0x54],
                elapsed_ms: 0,
            }],
        );
        let json = session.to_json().unwrap();
        assert!(json.contains("\"data\": \"4154\""));
        assert_eq!(RecordSession::from_json(&json).unwrap(), session);
    }

    #[test]
    fn test_json_import_orders_records() {
        let json = r#"{
            "name": "edited",
            "started_at": null,
            "records": [
                {"direction": "TX", "data": "03", "elapsed_ms": 300},
                {"direction": "RX", "data": "01", "elapsed_ms": 0},
                {"direction": "TX", "data": "02", "elapsed_ms": 120}
            ]
        }"#;
        let session = RecordSession::from_json(json).unwrap();
        let elapsed: Vec<u64> = session.records.iter().map(|r| r.elapsed_ms).collect();
        assert_eq!(elapsed, vec![0, 120, 300]);
        assert_eq!(session.duration(), Duration::from_millis(300));
    }
}
