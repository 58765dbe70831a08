use std::io;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::debug;

use crate::link::{LinkError, LinkPort, PortProvider};

/// Serial ports of the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    type Port = SerialLink;

    /// USB serial adapters first, then anything else that looks like one.
    fn candidates(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(io::Error::from)?;

        let mut usb = Vec::new();
        let mut other = Vec::new();
        for port in ports {
            match port.port_type {
                SerialPortType::UsbPort(_) => usb.push(port.port_name),
                SerialPortType::Unknown if looks_like_adapter(&port.port_name) => {
                    other.push(port.port_name)
                }
                _ => {}
            }
        }

        usb.extend(other);
        debug!("Serial port candidates: {:?}", usb);
        Ok(usb)
    }

    fn open(&self, path: &str, baud: u32, timeout: Duration) -> Result<Self::Port, LinkError> {
        // serialport configures the tty in raw mode on unix
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|err| match err.kind() {
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                    LinkError::PermissionDenied {
                        path: path.to_string(),
                    }
                }
                _ => LinkError::Open {
                    path: path.to_string(),
                    reason: err.to_string(),
                },
            })?;

        Ok(SerialLink { port })
    }
}

fn looks_like_adapter(name: &str) -> bool {
    ["ttyUSB", "ttyACM", "cu.usb", "cu.wch", "COM"]
        .iter()
        .any(|pattern| name.contains(pattern))
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.port.name())
            .finish()
    }
}

impl io::Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut *self.port, buf)
    }
}

impl io::Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.port, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *self.port)
    }
}

impl LinkPort for SerialLink {
    fn pending_output(&self) -> io::Result<u32> {
        SerialPort::bytes_to_write(self.port.as_ref()).map_err(io::Error::from)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        SerialPort::clear(self.port.as_ref(), ClearBuffer::Input).map_err(io::Error::from)
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(self.port.as_mut(), timeout).map_err(io::Error::from)
    }
}
