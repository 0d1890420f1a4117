//! Device discovery and port selection.
//!
//! Serial ports are classified by the USB bridge (or USB class) behind them.
//! A [`PortSelector`] names a service kind and how many matching devices to
//! skip, and a [`PortResolver`] turns it into a concrete port identifier such
//! as `/dev/ttyUSB0` or `COM7`.

use std::fmt;

use crate::error::{Error, Result};

use log::debug;
#[cfg(feature = "native")]
use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Classified kind of an enumerated serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// USB CDC-ACM device (STM32 virtual COM port and friends).
    UsbCdc,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches every product of the vendor.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x0483, &[0x5740, 0x5741, 0x3748], DeviceKind::UsbCdc),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

/// Port name fragments that identify a CDC-ACM device when USB ids are missing.
const CDC_NAME_HINTS: &[&str] = &["ttyACM", "cu.usbmodem", "tty.usbmodem"];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Classify a port by its name alone.
    #[must_use]
    pub fn from_port_name(name: &str) -> Self {
        if CDC_NAME_HINTS.iter().any(|hint| name.contains(hint)) {
            Self::UsbCdc
        } else {
            Self::Unknown
        }
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ch340 => "CH340/CH341",
            Self::UsbCdc => "USB CDC",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Service kind a [`PortSelector`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ServiceKind {
    /// CH34x driver family.
    #[default]
    Ch340,
    /// USB CDC-ACM class driver.
    UsbCdc,
    /// CP210x driver.
    Cp210x,
    /// FTDI driver.
    Ftdi,
    /// PL2303 driver.
    Prolific,
    /// Any enumerated serial port.
    Any,
}

impl ServiceKind {
    /// All service kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Ch340,
        Self::UsbCdc,
        Self::Cp210x,
        Self::Ftdi,
        Self::Prolific,
        Self::Any,
    ];

    /// Whether a device of `kind` provides this service.
    pub fn matches(self, kind: DeviceKind) -> bool {
        match self {
            Self::Any => true,
            Self::Ch340 => kind == DeviceKind::Ch340,
            Self::UsbCdc => kind == DeviceKind::UsbCdc,
            Self::Cp210x => kind == DeviceKind::Cp210x,
            Self::Ftdi => kind == DeviceKind::Ftdi,
            Self::Prolific => kind == DeviceKind::Prolific,
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ch340 => "CH340",
            Self::UsbCdc => "USB CDC",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Any => "serial",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which enumerated device to bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortSelector {
    /// Service kind to match.
    pub service: ServiceKind,
    /// Number of matching devices to skip.
    pub skip: usize,
}

impl PortSelector {
    /// Create a selector.
    pub fn new(service: ServiceKind, skip: usize) -> Self {
        Self { service, skip }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service, self.skip)
    }
}

/// Discovered serial port with metadata.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// A port with only a name, classified from that name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            device: DeviceKind::from_port_name(&name),
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }
}

/// Enumerate serial ports, failing if the platform enumeration fails.
#[cfg(feature = "native")]
pub fn enumerate_ports() -> Result<Vec<DetectedPort>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::ResolverUnavailable(e.to_string()))?;

    let mut result = Vec::with_capacity(ports.len());
    for port_info in ports {
        let mut detected = DetectedPort::named(port_info.port_name.clone());

        if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
            detected.vid = Some(usb_info.vid);
            detected.pid = Some(usb_info.pid);
            detected.manufacturer = usb_info.manufacturer;
            detected.product = usb_info.product;
            detected.serial = usb_info.serial_number;

            let by_id = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
            if by_id.is_known() {
                detected.device = by_id;
            }

            trace!(
                "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                port_info.port_name, usb_info.vid, usb_info.pid, detected.device
            );
        }

        result.push(detected);
    }

    Ok(result)
}

/// Enumerate serial ports (always unavailable without native support).
#[cfg(not(feature = "native"))]
pub fn enumerate_ports() -> Result<Vec<DetectedPort>> {
    Err(Error::ResolverUnavailable(
        "native serial support is disabled".to_string(),
    ))
}

/// Detect all available ports, treating enumeration failure as "no ports".
pub fn detect_ports() -> Vec<DetectedPort> {
    match enumerate_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Detect ports that provide the given service, in enumeration order.
pub fn detect_service_ports(service: ServiceKind) -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(|p| service.matches(p.device))
        .collect()
}

/// Pick the port a selector designates from an enumerated list.
pub fn select_port(ports: &[DetectedPort], selector: &PortSelector) -> Result<String> {
    ports
        .iter()
        .filter(|p| selector.service.matches(p.device))
        .nth(selector.skip)
        .map(|p| p.name.clone())
        .ok_or(Error::DeviceNotFound {
            service: selector.service,
            skip: selector.skip,
        })
}

/// Maps a [`PortSelector`] to a concrete port identifier.
pub trait PortResolver: Send {
    /// Resolve the selector.
    ///
    /// Fails with [`Error::DeviceNotFound`] when nothing matches and with
    /// [`Error::ResolverUnavailable`] when enumeration itself fails.
    fn resolve(&self, selector: &PortSelector) -> Result<String>;
}

impl<F> PortResolver for F
where
    F: Fn(&PortSelector) -> Result<String> + Send,
{
    fn resolve(&self, selector: &PortSelector) -> Result<String> {
        self(selector)
    }
}

/// Resolver backed by the operating system's port enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeResolver;

impl PortResolver for NativeResolver {
    fn resolve(&self, selector: &PortSelector) -> Result<String> {
        let ports = enumerate_ports()?;
        select_port(&ports, selector)
    }
}

/// Resolver that always returns the same port, ignoring the selector.
#[derive(Debug, Clone)]
pub struct FixedPort(pub String);

impl PortResolver for FixedPort {
    fn resolve(&self, _selector: &PortSelector) -> Result<String> {
        Ok(self.0.clone())
    }
}
