//! Connections keyed by port identifier

use super::connection::{Connection, ConnectionOptions};
use super::transport::{self, FlowControl, LinkOpener, Parity, PortInfo, StopBits, TransportConfig, TransportError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Baud rates offered for selection
pub const BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200, 128_000, 256_000, 460_800,
    921_600,
];

/// Data bit counts offered for selection
pub const DATA_BITS: &[u8] = &[5, 6, 7, 8];

/// At most one `Connection` per port identifier
pub struct ConnectionRegistry {
    opener: Arc<dyn LinkOpener>,
    options: ConnectionOptions,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Registry opening ports through `opener`
    pub fn new(opener: Arc<dyn LinkOpener>, options: ConnectionOptions) -> Self {
        Self {
            opener,
            options,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registry on the system serial driver
    pub fn system(options: ConnectionOptions) -> Self {
        Self::new(Arc::new(transport::SystemOpener), options)
    }

    /// Connection for `config.id`, created unopened if unknown
    pub fn create(&self, config: &TransportConfig) -> Arc<Connection> {
        if let Some(existing) = self.get(&config.id) {
            return existing;
        }

        let mut connections = self.connections.write();
        // Another caller may have created it between the two locks
        Arc::clone(connections.entry(config.id.clone()).or_insert_with(|| {
            debug!(port = %config.id, "Connection created");
            Arc::new(Connection::new(&config.id, Arc::clone(&self.opener), self.options))
        }))
    }

    /// Create if needed and open with `config`
    pub fn open(&self, config: TransportConfig) -> Result<Arc<Connection>, TransportError> {
        let connection = self.create(&config);
        connection.open(config)?;
        Ok(connection)
    }

    /// Existing connection
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Close and forget a connection
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(id)?;
        removed.close();
        info!(port = %id, "Connection removed");
        Some(removed)
    }

    /// Close every connection, keeping them registered
    pub fn close_all(&self) {
        let connections: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        for connection in connections {
            connection.close();
        }
    }

    /// Known identifiers, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ports present on the system
    pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
        transport::list_ports()
    }

    /// Selectable baud rates
    pub fn baud_rates() -> &'static [u32] {
        BAUD_RATES
    }

    /// Selectable data bits
    pub fn data_bits() -> &'static [u8] {
        DATA_BITS
    }

    /// Selectable parities
    pub fn parities() -> &'static [Parity] {
        Parity::all()
    }

    /// Selectable stop bits
    pub fn stop_bits() -> &'static [StopBits] {
        StopBits::all()
    }

    /// Selectable flow control modes
    pub fn flow_controls() -> &'static [FlowControl] {
        FlowControl::all()
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.ids())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingOpener;

    impl LinkOpener for RefusingOpener {
        fn open(&self, config: &TransportConfig) -> Result<Box<dyn transport::SerialLink>, TransportError> {
            Err(TransportError::PortNotFound(config.id.clone()))
        }
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(RefusingOpener), ConnectionOptions::default())
    }

    #[test]
    fn test_same_id_returns_same_connection() {
        let registry = registry();
        let first = registry.create(&TransportConfig::new("COM3", 9600));
        let second = registry.create(&TransportConfig::new("COM3", 115_200));
        assert!(Arc::ptr_eq(&first, &second));

        registry.create(&TransportConfig::new("COM1", 9600));
        assert_eq!(registry.ids(), vec!["COM1".to_string(), "COM3".to_string()]);
    }

    #[test]
    fn test_open_failure_keeps_entry() {
        let registry = registry();
        let result = registry.open(TransportConfig::new("COM9", 9600));
        assert!(matches!(result, Err(TransportError::PortNotFound(_))));
        assert!(registry.get("COM9").is_some());
        assert!(registry.remove("COM9").is_some());
        assert!(registry.get("COM9").is_none());
    }

    #[test]
    fn test_parameter_lists() {
        assert_eq!(ConnectionRegistry::baud_rates().first(), Some(&110));
        assert_eq!(ConnectionRegistry::baud_rates().last(), Some(&921_600));
        assert!(ConnectionRegistry::baud_rates().contains(&115_200));
        assert_eq!(ConnectionRegistry::data_bits(), &[5, 6, 7, 8]);
        assert_eq!(ConnectionRegistry::parities().len(), 5);
        assert_eq!(ConnectionRegistry::stop_bits().len(), 3);
        assert_eq!(ConnectionRegistry::flow_controls().len(), 3);
    }
}
