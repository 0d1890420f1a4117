//! Error types for serlink.

use std::io;
use thiserror::Error;

use crate::device::ServiceKind;

/// Result type for serlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for serlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No enumerated device matched the port selector.
    #[error("No {service} device found at index {skip}")]
    DeviceNotFound {
        /// Requested service kind.
        service: ServiceKind,
        /// Requested skip index.
        skip: usize,
    },

    /// Device enumeration itself failed.
    #[error("Port enumeration unavailable: {0}")]
    ResolverUnavailable(String),

    /// The OS refused or failed to open the port.
    #[error("Failed to open {port}: {source}")]
    ChannelOpenFailed {
        /// Port identifier that was being opened.
        port: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// I/O failure while reading an open session.
    #[error("Read error: {0}")]
    IoRead(#[source] io::Error),

    /// I/O failure while writing to an open session.
    #[error("Write error: {0}")]
    IoWrite(#[source] io::Error),

    /// Invalid line parameters or session configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No parser registered under the requested id.
    #[error("Unknown parser: {0}")]
    UnknownParser(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// Whether the failure means the port is unavailable right now and a
    /// later retry may succeed.
    pub fn is_port_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. } | Self::ResolverUnavailable(_)
        )
    }

    /// Wrap an open failure with the port it concerned.
    pub(crate) fn open_failed(port: &str, source: Self) -> Self {
        match source {
            Self::Config(_) | Self::ChannelOpenFailed { .. } => source,
            other => Self::ChannelOpenFailed {
                port: port.to_string(),
                source: Box::new(other),
            },
        }
    }
}
