//! Host-side utilities for serial port discovery.

use crate::device::{DetectedPort, NativeResolver, PortResolver, PortSelector, ServiceKind};

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Discover serial ports that match a service kind.
#[must_use]
pub fn discover_service_ports(service: ServiceKind) -> Vec<DetectedPort> {
    crate::device::detect_service_ports(service)
}

/// Resolve a selector against the ports currently present.
pub fn resolve_selector(selector: &PortSelector) -> crate::Result<String> {
    NativeResolver.resolve(selector)
}
