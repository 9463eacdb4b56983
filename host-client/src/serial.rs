// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{self, Read, Write};
use std::time::Duration;

use ota_protocol::{Transport, TransportError};
use serialport::SerialPort;

/// Serial port speaking the update framing.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialLink {
    pub fn open(path: &str, baudrate: u32, timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(path, baudrate).timeout(timeout).open()?;
        log::debug!("Opened {} at {} baud", path, baudrate);
        Ok(Self { port, timeout })
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout).map_err(|err| {
                log::error!("Cannot set port timeout: {}", err);
                TransportError::Io
            })?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl Transport for SerialLink {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        self.set_timeout(timeout)?;
        self.port.read_exact(buf).map_err(|err| match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof => TransportError::Timeout,
            _ => {
                log::error!("Serial read failed: {}", err);
                TransportError::Io
            }
        })
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.port
            .write_all(buf)
            .and_then(|()| self.port.flush())
            .map_err(|err| {
                log::error!("Serial write failed: {}", err);
                TransportError::Io
            })
    }
}

/// Print the serial ports the system knows about.
pub fn list_ports() -> serialport::Result<()> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("- {} ({:?})", port.port_name, port.port_type);
    }
    Ok(())
}
