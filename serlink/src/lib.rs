//! # serlink
//!
//! A serial-device session engine.
//!
//! This crate opens a serial port, reads from it on a dedicated thread,
//! runs the byte stream through a pluggable frame parser and hands decoded
//! frames to the consumer without ever blocking the reader. A session that
//! loses its device reconnects on its own.
//!
//! - Port selection by service kind and index ([`PortSelector`])
//! - Frame parsers selected by id ([`ParserRegistry`]): `simple`, `mind`, `line`
//! - Status events (`UNFIND`, `OPENED`, `ERROR`, `CLOSED`, `EDISCONNECTED`)
//! - In-memory mock channel for tests and hardware-free hosts
//!
//! ## Features
//!
//! - `native` (default): Operating system serial ports via the `serialport` crate
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serlink::{ParserRegistry, SessionConfig, SessionController, SimpleFrame};
//!
//! # #[cfg(feature = "native")]
//! # {
//! let parsers = Arc::new(ParserRegistry::with_builtin());
//! let mut session = SessionController::native(SessionConfig::default(), parsers);
//!
//! session.on_status(|event| println!("{}: {}", event.session, event.status));
//! session.on_data(|payload| {
//!     if let Some(frame) = payload.downcast_ref::<SimpleFrame>() {
//!         println!("command {}", frame.command);
//!     }
//! });
//!
//! session.start();
//! loop {
//!     session.poll_timeout(Duration::from_millis(100));
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod parser;
pub mod port;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort};
pub use {
    device::{
        DetectedPort, DeviceKind, FixedPort, NativeResolver, PortResolver, PortSelector,
        ServiceKind,
    },
    dispatch::{PacketSink, Payload, Payloads, SessionEvent, StatusEvent, StatusTag},
    error::{Error, Result},
    host::{discover_ports, discover_service_ports, resolve_selector},
    parser::{
        FrameParser, LineParser, MindData, MindParser, ParseSignal, ParserRegistry, SimpleFrame,
        SimpleParser,
    },
    port::{LineConfig, MockOpener, MockPort, Parity, PortOpener, SerialChannel, StopBits},
    session::{SessionConfig, SessionController, SessionStatus},
};
