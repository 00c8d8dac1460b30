//! The `SerialDevice` capability contract and its two implementations: a
//! real `serialport`-backed device, and an in-memory double for tests.
//! Grounded on the design's platform-abstraction note: enumeration stays
//! outside the core, and the Bridge is generic over this trait rather than
//! naming `serialport` types directly.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::time::Duration;

/// Open/close/read/write a byte-oriented serial link. Implementations must
/// never block indefinitely: `read` returns `Ok(0)` rather than stalling
/// when nothing is available, so the 20 ms poll loop stays responsive.
pub trait SerialDevice: Send {
    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn bytes_available(&self) -> usize;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

/// Real serial device backed by the `serialport` crate, opened 8-N-1 at the
/// caller-supplied baud rate with a short read timeout so polling never
/// blocks for long.
#[derive(Default)]
pub struct SerialPortDevice {
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialPortDevice {
    pub fn new() -> Self {
        SerialPortDevice::default()
    }
}

impl SerialDevice for SerialPortDevice {
    fn open(&mut self, name: &str, baud_rate: u32) -> Result<()> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(5))
            .open()
            .with_context(|| format!("opening serial port '{name}'"))?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_available(&self) -> usize {
        self.port
            .as_ref()
            .and_then(|p| p.bytes_to_read().ok())
            .unwrap_or(0) as usize
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e).context("reading from serial port"),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };
        port.write(buf).context("writing to serial port")
    }
}

/// In-memory test double. Tests push bytes into the inbound queue to
/// simulate data arriving on the wire, and inspect `written()` for what the
/// bridge sent out.
#[derive(Default)]
pub struct LoopbackSerialDevice {
    open: bool,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl LoopbackSerialDevice {
    pub fn new() -> Self {
        LoopbackSerialDevice::default()
    }

    /// Queues bytes as if they had just arrived on the wire.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Everything written to this device since it was opened.
    pub fn written(&self) -> &[u8] {
        &self.outbound
    }
}

impl SerialDevice for LoopbackSerialDevice {
    fn open(&mut self, _name: &str, _baud_rate: u32) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn bytes_available(&self) -> usize {
        self.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_reports_availability_and_drains_in_order() {
        let mut device = LoopbackSerialDevice::new();
        device.open("ignored", 115200).unwrap();
        device.push_inbound(&[1, 2, 3]);
        assert_eq!(device.bytes_available(), 3);

        let mut buf = [0u8; 2];
        assert_eq!(device.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(device.bytes_available(), 1);
    }

    #[test]
    fn loopback_records_writes() {
        let mut device = LoopbackSerialDevice::new();
        device.open("ignored", 115200).unwrap();
        device.write(&[0x90, 0x3C, 0x50]).unwrap();
        assert_eq!(device.written(), &[0x90, 0x3C, 0x50]);
    }

    #[test]
    fn close_reports_not_open() {
        let mut device = LoopbackSerialDevice::new();
        device.open("ignored", 115200).unwrap();
        device.close();
        assert!(!device.is_open());
    }
}
