//! Serial port transport

use super::TransportError;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::time::Duration;

/// USB product description the XB122 evaluation board reports
pub const DEFAULT_DESCRIPTION: &str = "XB122";

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0). Empty means discover by description.
    pub port: String,
    /// USB product description used for discovery
    pub description: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: SerialParity,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            baud_rate,
            parity: SerialParity::None,
            timeout_ms: 1000,
        }
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set read timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("", 115200)
    }
}

/// Discovered serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS port name
    pub name: String,
    /// USB product description, if any
    pub description: Option<String>,
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(usb) => usb.product,
                _ => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Find the first port whose USB product description matches
pub fn find_port(description: &str) -> Result<String, TransportError> {
    let port = list_ports()?
        .into_iter()
        .find(|p| p.description.as_deref() == Some(description))
        .ok_or_else(|| TransportError::PortNotFound(description.to_string()))?;

    tracing::info!("Found {} at {}", description, port.name);
    Ok(port.name)
}

/// Open the configured port, discovering it by description when no name is set
pub fn open_serial(config: &SerialConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    let name = if config.port.is_empty() {
        find_port(&config.description)?
    } else {
        config.port.clone()
    };

    let parity = match config.parity {
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
        SerialParity::None => Parity::None,
    };

    let port = serialport::new(&name, config.baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(parity)
        .flow_control(FlowControl::None)
        .timeout(config.read_timeout())
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(name.clone()),
            _ => TransportError::ConnectionFailed(format!("{name}: {e}")),
        })?;

    tracing::debug!("Opened {} @ {} baud", name, config.baud_rate);
    Ok(port)
}
