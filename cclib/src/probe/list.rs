//! Discovery of CCLib proxies on the serial ports of the host.

use super::{CcProxy, DebugProbeError, SerialConfig};
use serialport::{available_ports, SerialPortType};
use std::env;
use std::fmt;

/// Environment variable naming the default serial port of the adapter.
pub const SERIAL_PORT_ENV: &str = "CC_SERIAL";

/// Fragments of port names that usually belong to USB serial adapters.
const LIKELY_PORTS: [&str; 3] = ["acm", "usb", "ttys"];

/// A serial port that may have a proxy attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPortInfo {
    pub port_name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub product: Option<String>,
}

impl ProxyPortInfo {
    fn from_port(port_name: String, port_type: SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(info) => Self {
                port_name,
                vendor_id: Some(info.vid),
                product_id: Some(info.pid),
                product: info.product,
            },
            _ => Self {
                port_name,
                vendor_id: None,
                product_id: None,
                product: None,
            },
        }
    }

    fn is_likely_adapter(&self) -> bool {
        let name = self.port_name.to_lowercase();
        LIKELY_PORTS.iter().any(|fragment| name.contains(fragment))
    }
}

impl fmt::Display for ProxyPortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port_name)?;
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            write!(f, " ({vid:04x}:{pid:04x}")?;
            if let Some(product) = &self.product {
                write!(f, " {product}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Lists the serial ports of the host, likely adapters first.
pub fn list_ports() -> Vec<ProxyPortInfo> {
    let Ok(ports) = available_ports() else {
        return vec![];
    };

    let ports = ports
        .into_iter()
        .filter(|port| {
            // Only accept /dev/cu.* values on macos, to avoid having two
            // copies of the port (both /dev/tty.* and /dev/cu.*)
            !cfg!(target_os = "macos") || port.port_name.contains("/cu.")
        })
        .map(|port| ProxyPortInfo::from_port(port.port_name, port.port_type))
        .collect();

    prioritize(ports)
}

/// Orders ports so that names containing `acm`, `usb` or `ttys` come first.
/// The relative order within each group is kept.
fn prioritize(ports: Vec<ProxyPortInfo>) -> Vec<ProxyPortInfo> {
    let (mut likely, other): (Vec<_>, Vec<_>) =
        ports.into_iter().partition(|port| port.is_likely_adapter());
    likely.extend(other);
    likely
}

/// Probes every serial port and returns a session with the first one that
/// answers a ping.
pub fn detect(config: &SerialConfig) -> Result<CcProxy, DebugProbeError> {
    for port in list_ports() {
        tracing::debug!("Probing {}", port);
        match CcProxy::open(&port.port_name, config) {
            Ok(proxy) => return Ok(proxy),
            Err(error) => tracing::trace!("No proxy on {}: {}", port.port_name, error),
        }
    }

    Err(DebugProbeError::NoAdapterFound)
}

/// Opens the given port, falling back to `CC_SERIAL` and then to detection.
pub fn open(port: Option<&str>, config: &SerialConfig) -> Result<CcProxy, DebugProbeError> {
    if let Some(port) = port {
        return CcProxy::open(port, config);
    }

    match env::var(SERIAL_PORT_ENV) {
        Ok(port) if !port.is_empty() => CcProxy::open(&port, config),
        _ => detect(config),
    }
}
