//! Serial channel abstraction.
//!
//! A [`SerialChannel`] is one open handle to a serial device. The session
//! controller keeps one handle for writing and hands a second one, obtained
//! with [`SerialChannel::try_clone_reader`], to its reader thread. Channels
//! are created by a [`PortOpener`]:
//!
//! - **Native** ([`NativeOpener`]): the `serialport` crate
//! - **Mock** ([`MockOpener`]): in-memory, scriptable, for tests and demos
//!
//! ```text
//!  SessionController ──open()──> PortOpener ──> Box<dyn SerialChannel>
//!        │                                            │ try_clone_reader()
//!        │ write_bytes()                              v
//!        └────────────── same device <──── reader thread: read_available()
//! ```

pub mod mock;
#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use mock::{MockOpener, MockPort};
#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort};

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Parity bit always set.
    Mark,
    /// Parity bit always clear.
    Space,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 1.5 stop bits.
    OnePointFive,
    /// 2 stop bits.
    Two,
}

/// Line parameters for a serial channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Data bits, 5 through 8.
    pub data_bits: u8,
    /// Upper bound on a single read.
    pub read_timeout: Duration,
    /// Upper bound on a single write.
    pub write_timeout: Duration,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: 8,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl LineConfig {
    /// Create a configuration with the given baud rate and 8N1 framing.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Set parity.
    #[must_use]
    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits.
    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set data bits.
    #[must_use]
    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Set both read and write timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Check the parameters. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("baud rate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::Config(format!(
                "data bits must be between 5 and 8, got {}",
                self.data_bits
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".to_string()));
        }
        if self.stop_bits == StopBits::OnePointFive && self.data_bits != 5 {
            return Err(Error::Config(
                "1.5 stop bits are only defined for 5 data bits".to_string(),
            ));
        }
        Ok(())
    }
}

/// One open handle to a serial device.
pub trait SerialChannel: Send {
    /// Port identifier this channel was opened on.
    fn name(&self) -> &str;

    /// Read whatever is buffered, waiting at most the read timeout.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. Any `Err` means the
    /// device is no longer usable.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes. Writing to a closed channel silently does nothing.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Open a second handle on the same device for a reader thread.
    fn try_clone_reader(&self) -> Result<Box<dyn SerialChannel>>;

    /// Close the handle. Idempotent; close-time errors are swallowed.
    fn close(&mut self);

    /// Whether the handle is still open.
    fn is_open(&self) -> bool;
}

/// Opens serial channels.
pub trait PortOpener: Send {
    /// Open `port` with the given line parameters.
    fn open(&self, port: &str, line: &LineConfig) -> Result<Box<dyn SerialChannel>>;
}
