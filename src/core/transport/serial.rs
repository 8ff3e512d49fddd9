//! Serial port transport implementation

use super::{FlowControl, LinkOpener, Parity, SerialLink, StopBits, TransportConfig, TransportError};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read, Write};

impl SerialLink for Box<dyn SerialPort> {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let pending = SerialPort::bytes_to_read(self.as_ref()).map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

/// Opens real devices through the `serialport` driver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl SystemOpener {
    fn driver_parity(parity: Parity) -> Result<serialport::Parity, TransportError> {
        match parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Mark | Parity::Space => Err(TransportError::Unsupported(format!(
                "{parity:?} parity"
            ))),
        }
    }

    fn driver_stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits, TransportError> {
        match stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OnePointFive => {
                Err(TransportError::Unsupported("1.5 stop bits".to_string()))
            }
        }
    }

    fn driver_data_bits(bits: u8) -> Result<serialport::DataBits, TransportError> {
        match bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(TransportError::InvalidConfiguration(format!(
                "data bits must be 5..=8, got {other}"
            ))),
        }
    }
}

impl LinkOpener for SystemOpener {
    fn open(&self, config: &TransportConfig) -> Result<Box<dyn SerialLink>, TransportError> {
        config.validate()?;

        let flow_control = match config.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
            FlowControl::Software => serialport::FlowControl::Software,
        };

        let port = serialport::new(&config.id, config.baud)
            .data_bits(Self::driver_data_bits(config.data_bits)?)
            .stop_bits(Self::driver_stop_bits(config.stop_bits)?)
            .parity(Self::driver_parity(config.parity)?)
            .flow_control(flow_control)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.id.clone()),
                serialport::ErrorKind::InvalidInput => {
                    TransportError::InvalidConfiguration(e.to_string())
                }
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.id.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        Ok(Box::new(port))
    }
}

/// An enumerated serial device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device name usable as a transport identifier
    pub name: String,
    /// Port kind (USB, PCI, Bluetooth, Unknown)
    pub kind: String,
    /// Human-readable description, when the driver reports one
    pub description: Option<String>,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (kind, description) = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let description = match (usb.manufacturer, usb.product) {
                    (Some(m), Some(p)) => Some(format!("{m} {p}")),
                    (m, p) => m.or(p),
                }
                .or_else(|| Some(format!("{:04x}:{:04x}", usb.vid, usb.pid)));
                ("USB".to_string(), description)
            }
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None),
        };

        Self {
            name: info.port_name,
            kind,
            description,
        }
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}
