//! Native serial transport using the `serialport` crate.

use std::io::{self, Read, Write};

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::port::{DataBits, FlowControl, Parity, PortInfo, SerialConfig, StopBits};
use crate::transport::{RxQueue, Transport, XOFF, XON};

/// [`Transport`] over an open serial port.
///
/// Received bytes are moved from the OS buffer into an [`RxQueue`] on demand,
/// never more than the ring can hold. A write failure is kept and reported by
/// the next [`SerialTransport::flush`].
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    rx: RxQueue,
    software_flow: bool,
    xoff: bool,
    write_error: Option<io::Error>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("queued", &self.rx.len())
            .field("xoff", &self.xoff)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        Ok(Self {
            port,
            name: config.port_name.clone(),
            rx: RxQueue::new(),
            software_flow: config.flow_control == FlowControl::Software,
            xoff: false,
            write_error: None,
        })
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flush pending output and report any earlier write failure.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(err) = self.write_error.take() {
            return Err(Error::Io(err));
        }
        self.port.flush()?;
        Ok(())
    }

    /// Discard everything received so far.
    pub fn clear_input(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        while self.rx.pop().is_some() {}
        Ok(())
    }

    /// Move whatever the OS has buffered into the ring, up to its free space.
    fn fill(&mut self) {
        let available = match self.port.bytes_to_read() {
            Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
            Err(err) => {
                warn!("{}: bytes_to_read failed: {err}", self.name);
                return;
            },
        };
        let want = available.min(self.rx.free());
        if want == 0 {
            return;
        }
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf[..want]) {
            Ok(n) => {
                for &b in &buf[..n] {
                    self.rx.push(b);
                }
            },
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {},
            Err(err) => warn!("{}: read failed: {err}", self.name),
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(err) = self.port.write_all(bytes) {
            warn!("{}: write failed: {err}", self.name);
            self.write_error = Some(err);
        }
    }
}

impl Transport for SerialTransport {
    fn read_nonblocking(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            self.fill();
        }
        self.rx.pop()
    }

    fn has_byte(&self) -> bool {
        !self.rx.is_empty() || self.port.bytes_to_read().is_ok_and(|n| n > 0)
    }

    fn write(&mut self, byte: u8) {
        self.send(&[byte]);
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.send(bytes);
    }

    fn assert_xoff(&mut self) {
        if self.software_flow && !self.xoff {
            trace!("{}: XOFF", self.name);
            self.send(&[XOFF]);
        }
        self.xoff = true;
    }

    fn assert_xon(&mut self) {
        if self.software_flow && self.xoff {
            trace!("{}: XON", self.name);
            self.send(&[XON]);
        }
        self.xoff = false;
    }

    fn overrun(&self) -> bool {
        self.rx.overrun()
    }

    fn take_overrun(&mut self) -> bool {
        self.rx.take_overrun()
    }

    /// Waits on the port with its configured timeout instead of spinning.
    fn read_blocking(&mut self) -> Result<u8> {
        loop {
            if let Some(b) = self.rx.pop() {
                return Ok(b);
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(1) => return Ok(byte[0]),
                Ok(_) => {},
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {},
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

/// List the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, manufacturer, product, serial_number) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    Some(info.vid),
                    Some(info.pid),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                ),
                _ => (None, None, None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                manufacturer,
                product,
                serial_number,
            }
        })
        .collect())
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            // In-band XON/XOFF is written by the transport itself; letting
            // the driver also act on DC1/DC3 would eat them from the stream.
            FlowControl::None | FlowControl::Software => Self::None,
            FlowControl::Hardware => Self::Hardware,
        }
    }
}
