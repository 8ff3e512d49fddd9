//! In-memory serial device shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use portpilot_core::{ConnectionEvent, LinkOpener, SerialLink, TransportConfig, TransportError};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// What the fake device sees and produces
#[derive(Default)]
pub struct DeviceState {
    pub inbound: VecDeque<u8>,
    pub outbound: Vec<u8>,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub opened: usize,
}

/// Handle the test keeps to drive the fake device
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    stalled: Arc<AtomicBool>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the reader
    pub fn inject(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data.iter().copied());
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().outbound.clone()
    }

    pub fn fail_reads(&self) {
        self.state.lock().fail_reads = true;
    }

    pub fn fail_writes(&self) {
        self.state.lock().fail_writes = true;
    }

    /// Make `bytes_to_read` block until `release` is called
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.stalled.store(false, Ordering::Release);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    /// Opener handing out links to this device
    pub fn opener(&self) -> Arc<dyn LinkOpener> {
        Arc::new(MockOpener { device: self.clone() })
    }
}

struct MockLink {
    state: Arc<Mutex<DeviceState>>,
    stalled: Arc<AtomicBool>,
}

impl SerialLink for MockLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        while self.stalled.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        let state = self.state.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.outbound.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MockOpener {
    device: MockDevice,
}

impl LinkOpener for MockOpener {
    fn open(&self, _config: &TransportConfig) -> Result<Box<dyn SerialLink>, TransportError> {
        self.device.state.lock().opened += 1;
        Ok(Box::new(MockLink {
            state: self.device.state.clone(),
            stalled: self.device.stalled.clone(),
        }))
    }
}

/// Next event, or panic after two seconds
pub async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("event channel closed")
}

/// Poll `check` every 5 ms for up to two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
