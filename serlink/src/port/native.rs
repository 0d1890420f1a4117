//! Native serial channel using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{LineConfig, Parity, PortOpener, SerialChannel, StopBits},
    },
    log::{debug, trace, warn},
    serialport::ClearBuffer,
    std::{
        io::{ErrorKind, Read, Write},
        time::Duration,
    },
};

/// Native serial port channel.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given line parameters.
    pub fn open(port_name: &str, line: &LineConfig) -> Result<Self> {
        line.validate()?;

        let port = serialport::new(port_name, line.baud_rate)
            .timeout(line.read_timeout)
            .data_bits(data_bits(line.data_bits)?)
            .parity(parity(line.parity)?)
            .stop_bits(stop_bits(line.stop_bits)?)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        let mut native = Self {
            port: Some(port),
            name: port_name.to_string(),
            read_timeout: line.read_timeout,
            write_timeout: line.write_timeout,
        };
        native.discard_input();
        Ok(native)
    }

    fn discard_input(&mut self) {
        if let Some(ref mut p) = self.port {
            if let Err(e) = p.clear(ClearBuffer::Input) {
                debug!("Could not clear input buffer on {}: {e}", self.name);
            }
        }
    }

    fn with_timeout<T>(
        &mut self,
        timeout: Duration,
        op: impl FnOnce(&mut dyn serialport::SerialPort) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "port closed"))?;
        if port.timeout() != timeout {
            port.set_timeout(timeout)?;
        }
        op(port.as_mut())
    }
}

impl SerialChannel for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.read_timeout;
        match self.with_timeout(timeout, |p| p.read(buf)) {
            Ok(n) => {
                if n > 0 {
                    trace!("Read {n} bytes from {}", self.name);
                }
                Ok(n)
            },
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(Error::IoRead(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.port.is_none() {
            trace!("Dropping {} bytes for closed port {}", data.len(), self.name);
            return Ok(());
        }
        let timeout = self.write_timeout;
        self.with_timeout(timeout, |p| {
            p.write_all(data)?;
            p.flush()
        })
        .map_err(Error::IoWrite)
    }

    fn try_clone_reader(&self) -> Result<Box<dyn SerialChannel>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::NotConnected, "port closed")))?;
        Ok(Box::new(Self {
            port: Some(port.try_clone()?),
            name: self.name.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }))
    }

    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                warn!("Error while closing {}: {e}", self.name);
            }
            debug!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`NativePort`] channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl PortOpener for NativeOpener {
    fn open(&self, port: &str, line: &LineConfig) -> Result<Box<dyn SerialChannel>> {
        let native = NativePort::open(port, line).map_err(|e| Error::open_failed(port, e))?;
        Ok(Box::new(native))
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(Error::Config(format!("unsupported data bits: {other}"))),
    }
}

fn parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(Error::Config(format!(
            "{parity:?} parity is not supported by the native backend"
        ))),
    }
}

fn stop_bits(bits: StopBits) -> Result<serialport::StopBits> {
    match bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OnePointFive => Err(Error::Config(
            "1.5 stop bits are not supported by the native backend".to_string(),
        )),
    }
}
