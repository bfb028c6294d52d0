// Serial command link
//
// Polled from the control loop: whatever bytes are waiting get read, never
// blocking for more.

use serialport::SerialPort;
use std::io::{Read, Write};
use tracing::{debug, info};

use crate::command::LineBuffer;
use crate::config::SERIAL_TIMEOUT;
use crate::motor::roller::Result;

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl SerialLink {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening command link on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(SERIAL_TIMEOUT)
            .open()?;

        Ok(Self {
            port,
            lines: LineBuffer::new(),
        })
    }

    /// Drain pending bytes; returns the lines they complete
    pub fn read_lines(&mut self) -> Result<Vec<String>> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        let n = self.port.read(&mut buf)?;
        Ok(self.lines.extend(&buf[..n]))
    }

    /// Send one reply line
    pub fn send(&mut self, reply: &str) -> Result<()> {
        debug!("Reply: {}", reply);
        self.port.write_all(reply.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }
}
