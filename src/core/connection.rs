//! Connection lifecycle for one serial transport
//!
//! A `Connection` owns the device handle while open and runs exactly one
//! reader thread that turns the blocking, poll-only device into a stream of
//! timestamped `ConnectionEvent`s.

use super::history::ConnectionSessionRecord;
use super::transport::{LinkOpener, SerialLink, TransportConfig, TransportError};
use bytes::Bytes;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Data direction relative to this side of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Sent by us
    Tx,
    /// Received from the peer
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => write!(f, "TX"),
            Self::Rx => write!(f, "RX"),
        }
    }
}

/// Monotonic instant paired with the wall-clock time it was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Monotonic clock reading, used for elapsed-time arithmetic
    pub instant: Instant,
    /// Wall clock reading, used for display and persistence
    pub wall: DateTime<Local>,
}

impl Timestamp {
    /// Current time
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now(),
        }
    }
}

/// One chunk of traffic. Produced once and shared read-only with all subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    /// Direction of the chunk
    pub direction: Direction,
    /// Raw bytes; chunk boundaries are not message boundaries
    pub bytes: Bytes,
    /// When the chunk was read or written
    pub timestamp: Timestamp,
}

impl DataEvent {
    /// Create an event stamped with the current time
    pub fn new(direction: Direction, bytes: impl Into<Bytes>) -> Self {
        Self::with_timestamp(direction, bytes, Timestamp::now())
    }

    /// Create an event with an explicit timestamp
    pub fn with_timestamp(direction: Direction, bytes: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            direction,
            bytes: bytes.into(),
            timestamp,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened
    Idle,
    /// Open with a running reader
    Open,
    /// Close requested, waiting for the reader
    Closing,
    /// Closed by request
    Closed,
    /// Transport failure; must be reopened explicitly
    Failed(String),
}

/// Events published by a connection, in production order
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Traffic chunk
    Data(Arc<DataEvent>),
    /// Lifecycle transition
    State(ConnectionState),
    /// Error notification
    Error(String),
}

/// Traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Chunks sent
    pub chunks_sent: u64,
    /// Chunks received
    pub chunks_received: u64,
    /// Read/write errors
    pub errors: u64,
}

/// Reader and lifecycle tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Sleep between polls when no input is buffered
    pub poll_interval: Duration,
    /// How long `close` waits for the reader to stop
    pub close_grace: Duration,
    /// Broadcast channel capacity per connection
    pub event_capacity: usize,
    /// Upper bound for one read chunk
    pub read_chunk_max: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            close_grace: Duration::from_millis(3000),
            event_capacity: 1024,
            read_chunk_max: 4096,
        }
    }
}

/// Anything that can put bytes on the wire
pub trait DataSink: Send + Sync {
    /// Send `data`, returning once it was handed to the device
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;
}

type SharedLink = Arc<Mutex<Option<Box<dyn SerialLink>>>>;

/// State shared between the connection and its reader thread
struct Shared {
    id: String,
    state: RwLock<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    stats: RwLock<ConnectionStats>,
}

impl Shared {
    fn publish(&self, event: ConnectionEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state.clone();
        self.publish(ConnectionEvent::State(state));
    }

    /// Move an open connection to `Failed`. Returns false if it was not open.
    fn fail(&self, reason: String) -> bool {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Open {
                return false;
            }
            *state = ConnectionState::Failed(reason.clone());
        }
        error!(port = %self.id, %reason, "connection failed");
        self.stats.write().errors += 1;
        self.publish(ConnectionEvent::Error(reason.clone()));
        self.publish(ConnectionEvent::State(ConnectionState::Failed(reason)));
        true
    }
}

/// Resources that exist only while a connection is open
struct ActiveLink {
    link: SharedLink,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// One serial connection
pub struct Connection {
    shared: Arc<Shared>,
    opener: Arc<dyn LinkOpener>,
    options: ConnectionOptions,
    config: RwLock<Option<TransportConfig>>,
    active: Mutex<Option<ActiveLink>>,
    /// Reader that outlived its close grace period
    leaked: Mutex<Option<JoinHandle<()>>>,
    session: RwLock<Option<ConnectionSessionRecord>>,
    lifecycle: Mutex<()>,
}

impl Connection {
    /// Create an idle connection for transport `id`
    pub fn new(id: &str, opener: Arc<dyn LinkOpener>, options: ConnectionOptions) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                id: id.to_string(),
                state: RwLock::new(ConnectionState::Idle),
                event_tx,
                stats: RwLock::new(ConnectionStats::default()),
            }),
            opener,
            options,
            config: RwLock::new(None),
            active: Mutex::new(None),
            leaked: Mutex::new(None),
            session: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Transport identifier
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    /// Check if open
    pub fn is_open(&self) -> bool {
        *self.shared.state.read() == ConnectionState::Open
    }

    /// Configuration of the current or last open period
    pub fn config(&self) -> Option<TransportConfig> {
        self.config.read().clone()
    }

    /// Traffic counters of the current or last open period
    pub fn stats(&self) -> ConnectionStats {
        *self.shared.stats.read()
    }

    /// Session record of the current or last open period
    pub fn session(&self) -> Option<ConnectionSessionRecord> {
        self.session.read().clone()
    }

    /// Subscribe to data, lifecycle and error events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Acquire the device and start the reader thread.
    pub fn open(&self, config: TransportConfig) -> Result<(), TransportError> {
        let _guard = self.lifecycle.lock();

        if config.id != self.shared.id {
            return Err(TransportError::InvalidConfiguration(format!(
                "configuration is for '{}', connection is '{}'",
                config.id, self.shared.id
            )));
        }
        if matches!(
            *self.shared.state.read(),
            ConnectionState::Open | ConnectionState::Closing
        ) {
            return Err(TransportError::AlreadyOpen(self.shared.id.clone()));
        }
        self.reap_finished_readers()?;
        config.validate()?;

        let link = match self.opener.open(&config) {
            Ok(link) => link,
            Err(e) => {
                warn!(port = %self.shared.id, error = %e, "open failed");
                self.shared.publish(ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let link: SharedLink = Arc::new(Mutex::new(Some(link)));
        let stop = Arc::new(AtomicBool::new(false));
        *self.shared.stats.write() = ConnectionStats::default();

        // Publish Open before the reader can publish data
        self.shared.set_state(ConnectionState::Open);

        let reader = ReadLoop {
            shared: self.shared.clone(),
            link: link.clone(),
            stop: stop.clone(),
            poll_interval: self.options.poll_interval,
            chunk_max: self.options.read_chunk_max.max(1),
        };
        let spawned = thread::Builder::new()
            .name(format!("portpilot-rx:{}", self.shared.id))
            .spawn(move || reader.run());

        let reader = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                link.lock().take();
                self.shared.set_state(ConnectionState::Failed(e.to_string()));
                return Err(TransportError::IoError(e));
            }
        };

        info!(port = %self.shared.id, config = %config, "connection opened");
        *self.session.write() = Some(ConnectionSessionRecord::begin(&config));
        *self.config.write() = Some(config);
        *self.active.lock() = Some(ActiveLink { link, stop, reader });
        Ok(())
    }

    /// Stop the reader, release the device and move to `Closed`.
    ///
    /// Blocks for at most the configured grace period. A reader still running
    /// after that is reported as leaked; the device handle is released anyway
    /// once the reader lets go of it.
    pub fn close(&self) {
        let _guard = self.lifecycle.lock();

        let was_failed = match &*self.shared.state.read() {
            ConnectionState::Open => false,
            ConnectionState::Failed(_) => true,
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                return;
            }
        };

        if !was_failed {
            self.shared.set_state(ConnectionState::Closing);
        }

        let active = self.active.lock().take();
        if let Some(active) = active {
            self.stop_reader(active);
        }

        if let Some(session) = self.session.write().as_mut() {
            session.finish();
        }
        self.shared.set_state(ConnectionState::Closed);
        info!(port = %self.shared.id, "connection closed");
    }

    fn stop_reader(&self, active: ActiveLink) {
        let ActiveLink { link, stop, reader } = active;
        stop.store(true, Ordering::Release);

        let deadline = Instant::now() + self.options.close_grace;
        let step = self.options.poll_interval.min(Duration::from_millis(5)).max(Duration::from_millis(1));
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(step);
        }

        if reader.is_finished() {
            if reader.join().is_err() {
                error!(port = %self.shared.id, "reader thread panicked");
            }
        } else {
            let message = format!(
                "reader for {} did not stop within {:?}; thread leaked",
                self.shared.id, self.options.close_grace
            );
            warn!(port = %self.shared.id, "{message}");
            self.shared.publish(ConnectionEvent::Error(message));
            *self.leaked.lock() = Some(reader);
        }

        match link.try_lock_for(self.options.poll_interval.max(Duration::from_millis(1))) {
            Some(mut handle) => {
                handle.take();
            }
            None => {
                let message = format!(
                    "device handle for {} is held by a stuck reader; it is released when the reader exits",
                    self.shared.id
                );
                warn!(port = %self.shared.id, "{message}");
                self.shared.publish(ConnectionEvent::Error(message));
            }
        };
    }

    /// Join readers that already exited; refuse to start a second one while a leaked reader runs
    fn reap_finished_readers(&self) -> Result<(), TransportError> {
        let previous = self.active.lock().take();
        if let Some(active) = previous {
            self.stop_reader(active);
        }

        let mut leaked = self.leaked.lock();
        if let Some(reader) = leaked.take() {
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                *leaked = Some(reader);
                return Err(TransportError::ConnectionFailed(format!(
                    "previous reader for {} is still running",
                    self.shared.id
                )));
            }
        }
        Ok(())
    }

    /// Write bytes and publish a TX event. Only valid while open.
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }

        let link = self
            .active
            .lock()
            .as_ref()
            .map(|active| active.link.clone())
            .ok_or(TransportError::NotConnected)?;

        {
            let mut guard = link.lock();
            let port = guard.as_mut().ok_or(TransportError::NotConnected)?;

            if let Err(e) = port.write_all(data).and_then(|()| port.flush()) {
                if e.kind() == io::ErrorKind::TimedOut {
                    self.shared.stats.write().errors += 1;
                    self.shared
                        .publish(ConnectionEvent::Error(format!("Write timeout: {e}")));
                } else if self.shared.fail(format!("Write error: {e}")) {
                    guard.take();
                }
                return Err(TransportError::IoError(e));
            }
        }

        {
            let mut stats = self.shared.stats.write();
            stats.bytes_sent += data.len() as u64;
            stats.chunks_sent += 1;
        }
        debug!(port = %self.shared.id, len = data.len(), "sent");
        self.shared.publish(ConnectionEvent::Data(Arc::new(DataEvent::new(
            Direction::Tx,
            Bytes::copy_from_slice(data),
        ))));
        Ok(())
    }
}

impl DataSink for Connection {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        Connection::send(self, data)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Background reader for one open period
struct ReadLoop {
    shared: Arc<Shared>,
    link: SharedLink,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    chunk_max: usize,
}

impl ReadLoop {
    fn run(self) {
        debug!(port = %self.shared.id, "reader started");

        while !self.stop.load(Ordering::Acquire) {
            let polled = {
                let mut guard = self.link.lock();
                let Some(port) = guard.as_mut() else {
                    break;
                };
                match port.bytes_to_read() {
                    Ok(0) => Ok(None),
                    Ok(pending) => {
                        let mut buffer = vec![0u8; pending.min(self.chunk_max)];
                        port.read(&mut buffer).map(|n| {
                            buffer.truncate(n);
                            Some(buffer)
                        })
                    }
                    Err(e) => Err(e),
                }
            };

            match polled {
                Ok(Some(buffer)) if !buffer.is_empty() => {
                    {
                        let mut stats = self.shared.stats.write();
                        stats.bytes_received += buffer.len() as u64;
                        stats.chunks_received += 1;
                    }
                    self.shared.publish(ConnectionEvent::Data(Arc::new(DataEvent::new(
                        Direction::Rx,
                        buffer,
                    ))));
                }
                Ok(_) => thread::sleep(self.poll_interval),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    if !self.stop.load(Ordering::Acquire) && self.shared.fail(format!("Read error: {e}")) {
                        self.link.lock().take();
                    }
                    break;
                }
            }
        }

        debug!(port = %self.shared.id, "reader stopped");
    }
}
