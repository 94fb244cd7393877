use std::io::{self, Read, Write};

use serialport::{SerialPort, SerialPortType};

use super::{SerialBackend, SerialLink};
use crate::{CurrentsError, Result, SerialConfig};

/// Serial ports of the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial {
    /// Also list ports that are not USB adapters.
    pub include_all: bool,
}

impl SystemSerial {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SerialBackend for SystemSerial {
    fn ports(&self) -> Result<Vec<String>> {
        let ports =
            serialport::available_ports().map_err(|e| CurrentsError::Backend(e.to_string()))?;
        Ok(ports
            .into_iter()
            .filter(|p| self.include_all || matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .collect())
    }

    fn open(&self, port: &str, config: &SerialConfig) -> Result<Box<dyn SerialLink>> {
        let handle = serialport::new(port, config.baud)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| CurrentsError::PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(SystemLink(handle)))
    }
}

struct SystemLink(Box<dyn SerialPort>);

impl Write for SystemLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl SerialLink for SystemLink {
    fn reader(&self) -> Result<Box<dyn Read + Send>> {
        let clone = self
            .0
            .try_clone()
            .map_err(|e| CurrentsError::PortIo(e.to_string()))?;
        Ok(Box::new(clone))
    }
}
