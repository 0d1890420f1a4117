//! Session lifecycle: open, read, dispatch, reconnect, close.
//!
//! A [`SessionController`] belongs to the consumer's thread. It resolves the
//! configured [`PortSelector`], opens a channel, and starts one reader thread
//! that feeds received bytes through the configured parser. Status
//! transitions and decoded frames travel through a queue. They are delivered
//! to subscribed callbacks only inside [`SessionController::poll`] and
//! [`SessionController::poll_timeout`], so callbacks always run on the
//! consumer's thread.
//!
//! ```
//! use std::sync::Arc;
//! use serlink::port::{MockOpener, MockPort};
//! use serlink::{FixedPort, ParserRegistry, SessionConfig, SessionController, SimpleFrame};
//!
//! let device = MockPort::new("COM7");
//! let mut session = SessionController::new(
//!     SessionConfig::default(),
//!     Arc::new(ParserRegistry::with_builtin()),
//!     FixedPort("COM7".into()),
//!     MockOpener::new(device.clone()),
//! );
//! session.on_data(|payload| {
//!     if let Some(frame) = payload.downcast_ref::<SimpleFrame>() {
//!         println!("command {}", frame.command);
//!     }
//! });
//! session.open();
//! device.push_read(&[0xFB, 0x05, 0xBF]);
//! session.poll_timeout(std::time::Duration::from_millis(100));
//! session.close();
//! ```

mod reader;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::device::{PortResolver, PortSelector};
use crate::dispatch::{
    Envelope, EventReceiver, EventSender, PacketSink, Payload, StatusEvent, StatusTag,
    Subscribers, event_queue,
};
use crate::error::{Error, Result};
use crate::parser::{DEFAULT_PARSER, ParserRegistry};
use crate::port::{LineConfig, PortOpener, SerialChannel};

use reader::{ReaderContext, ReaderLoop};

/// Delay before a session retries after no device was found.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// Not open.
    #[default]
    Closed,
    /// No device matched the selector.
    Unfound,
    /// An open attempt is in progress.
    Opening,
    /// Open and reading.
    Open,
    /// The last open attempt failed.
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Unfound => "unfound",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Static configuration of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name reported in status events and used for the reader thread.
    pub name: String,
    /// Which device to open.
    pub selector: PortSelector,
    /// Line parameters.
    pub line: LineConfig,
    /// Whether `start()` opens and whether reconnects happen automatically.
    pub auto_open: bool,
    /// Registry id of the parser to run.
    pub parser: String,
    /// Delay before retrying when no device was found.
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "serial".to_string(),
            selector: PortSelector::default(),
            line: LineConfig::default(),
            auto_open: true,
            parser: DEFAULT_PARSER.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl SessionConfig {
    /// Default configuration under another session name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the port selector.
    #[must_use]
    pub fn with_selector(mut self, selector: PortSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the line parameters.
    #[must_use]
    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.line = line;
        self
    }

    /// Enable or disable automatic open and reconnect.
    #[must_use]
    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }

    /// Select the parser by registry id.
    #[must_use]
    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser = parser.into();
        self
    }

    /// Set the retry delay after an unfound device.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Owns one serial session and its reader thread.
///
/// Dropping the controller shuts the session down.
pub struct SessionController {
    config: SessionConfig,
    parsers: Arc<ParserRegistry>,
    resolver: Box<dyn PortResolver>,
    opener: Box<dyn PortOpener>,

    status: Arc<Mutex<SessionStatus>>,
    error_finished: bool,
    shutting_down: bool,
    port_name: Option<String>,

    writer: Option<Box<dyn SerialChannel>>,
    reader: Option<ReaderLoop>,
    /// Bumped for every started reader and every close, so failure reports
    /// from a reader the user already closed are recognised as stale.
    generation: u64,
    retry_at: Option<Instant>,

    events_tx: EventSender,
    events_rx: EventReceiver,
    subscribers: Subscribers,
}

impl SessionController {
    /// Create a closed session.
    pub fn new(
        config: SessionConfig,
        parsers: Arc<ParserRegistry>,
        resolver: impl PortResolver + 'static,
        opener: impl PortOpener + 'static,
    ) -> Self {
        let (events_tx, events_rx) = event_queue();
        Self {
            config,
            parsers,
            resolver: Box::new(resolver),
            opener: Box::new(opener),
            status: Arc::new(Mutex::new(SessionStatus::Closed)),
            error_finished: false,
            shutting_down: false,
            port_name: None,
            writer: None,
            reader: None,
            generation: 0,
            retry_at: None,
            events_tx,
            events_rx,
            subscribers: Subscribers::default(),
        }
    }

    /// Create a closed session on the operating system's serial ports.
    #[cfg(feature = "native")]
    pub fn native(config: SessionConfig, parsers: Arc<ParserRegistry>) -> Self {
        Self::new(
            config,
            parsers,
            crate::device::NativeResolver,
            crate::port::NativeOpener,
        )
    }

    /// Replace the port resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl PortResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Replace the channel opener.
    #[must_use]
    pub fn with_opener(mut self, opener: impl PortOpener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Replace the parser registry.
    #[must_use]
    pub fn with_parsers(mut self, parsers: Arc<ParserRegistry>) -> Self {
        self.parsers = parsers;
        self
    }

    /// Session name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.lock_status()
    }

    /// Whether the session is open.
    pub fn is_opened(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    /// Whether the last open attempt ended in an error.
    pub fn is_error_finished(&self) -> bool {
        self.error_finished
    }

    /// Port resolved by the most recent open attempt.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// When the scheduled retry will run, if one is pending.
    pub fn pending_retry(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Whether `shutdown()` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Register a callback for status transitions.
    pub fn on_status(&mut self, callback: impl FnMut(&StatusEvent) + 'static) {
        self.subscribers.on_status(Box::new(callback));
    }

    /// Register a callback for decoded frames.
    pub fn on_data(&mut self, callback: impl FnMut(&Payload) + 'static) {
        self.subscribers.on_data(Box::new(callback));
    }

    /// Open the session if it is configured to open automatically.
    pub fn start(&mut self) -> SessionStatus {
        self.connect();
        self.status()
    }

    /// Resolve, open and start reading.
    ///
    /// Does nothing when already open. The outcome is also reported as a
    /// status event on the next `poll()`.
    pub fn open(&mut self) -> SessionStatus {
        if self.is_opened() {
            return SessionStatus::Open;
        }
        if self.shutting_down {
            debug!("Session '{}' is shutting down, not opening", self.config.name);
            return self.status();
        }

        self.retry_at = None;
        self.error_finished = false;
        self.release_handles();
        self.set_status(SessionStatus::Opening);

        if let Err(e) = self.config.line.validate() {
            return self.fail(&e);
        }

        let port = match self.resolver.resolve(&self.config.selector) {
            Ok(port) => port,
            Err(e) => {
                warn!("Session '{}': {e}", self.config.name);
                self.set_status(SessionStatus::Unfound);
                self.fire(StatusTag::Unfound);
                self.schedule_retry();
                return SessionStatus::Unfound;
            },
        };
        debug!("Selector {} resolved to {port}", self.config.selector);
        self.port_name = Some(port.clone());

        let sink = PacketSink::new(self.events_tx.clone());
        let parser = match self.parsers.create(&self.config.parser, sink) {
            Ok(parser) => parser,
            Err(e) => return self.fail(&e),
        };

        let mut writer = match self.opener.open(&port, &self.config.line) {
            Ok(channel) => channel,
            Err(e) => return self.fail(&e),
        };
        let channel = match writer.try_clone_reader() {
            Ok(channel) => channel,
            Err(e) => {
                writer.close();
                return self.fail(&Error::open_failed(&port, e));
            },
        };

        self.generation += 1;
        self.set_status(SessionStatus::Open);
        // Queued before the reader can emit its first frame.
        self.fire(StatusTag::Opened);

        let ctx = ReaderContext {
            session: self.config.name.clone(),
            generation: self.generation,
            channel,
            parser,
            status: Arc::clone(&self.status),
            events: self.events_tx.clone(),
        };
        match ReaderLoop::spawn(ctx) {
            Ok(reader) => {
                info!(
                    "Opened {port} at {} baud for session '{}'",
                    self.config.line.baud_rate, self.config.name
                );
                self.writer = Some(writer);
                self.reader = Some(reader);
                SessionStatus::Open
            },
            Err(e) => {
                writer.close();
                self.fail(&e)
            },
        }
    }

    /// Stop reading, close the channel and cancel any pending retry.
    ///
    /// Calling it again on a closed session does nothing.
    pub fn close(&mut self) {
        let had_retry = self.retry_at.take().is_some();
        if self.reader.is_none()
            && self.writer.is_none()
            && !had_retry
            && self.status() == SessionStatus::Closed
        {
            trace!("Session '{}' already closed", self.config.name);
            return;
        }

        {
            let mut status = self.lock_status();
            if let Some(reader) = &self.reader {
                reader.request_stop();
            }
            *status = SessionStatus::Closed;
        }
        self.generation += 1;
        self.release_handles();

        info!("Closed session '{}'", self.config.name);
        self.fire(StatusTag::Closed);
    }

    /// Close for good: no reconnect is scheduled afterwards.
    pub fn shutdown(&mut self) {
        if !self.shutting_down {
            debug!("Shutting down session '{}'", self.config.name);
        }
        self.shutting_down = true;
        self.retry_at = None;
        self.close();
    }

    /// Write raw bytes. Dropped silently while the session is not open.
    pub fn send_data(&mut self, data: &[u8]) {
        if !self.is_opened() {
            trace!("Session '{}' not open, dropping {} bytes", self.config.name, data.len());
            return;
        }
        match self.try_send(data) {
            Ok(()) => trace!("Sent {} bytes: {data:02X?}", data.len()),
            Err(e) => warn!("Dropped write of {} bytes: {e}", data.len()),
        }
    }

    /// Write raw bytes and report whether the port accepted them.
    ///
    /// Fails with [`Error::IoWrite`] when the session is not open or the
    /// write itself fails. The session stays open either way.
    pub fn try_send(&mut self, data: &[u8]) -> Result<()> {
        let not_open = || {
            Error::IoWrite(io::Error::new(
                io::ErrorKind::NotConnected,
                "session is not open",
            ))
        };
        if !self.is_opened() {
            return Err(not_open());
        }
        let writer = self.writer.as_mut().ok_or_else(not_open)?;
        writer.write_bytes(data)
    }

    /// Write text as UTF-8 bytes.
    pub fn send_text(&mut self, text: &str) {
        self.send_data(text.as_bytes());
    }

    /// Run a due retry and deliver every queued event.
    ///
    /// Returns the number of events delivered to callbacks.
    pub fn poll(&mut self) -> usize {
        self.run_due_retry();
        let mut delivered = 0;
        while let Some(envelope) = self.events_rx.try_next() {
            delivered += self.handle(envelope);
        }
        delivered
    }

    /// Like [`poll`](Self::poll), but first wait up to `timeout` for an event
    /// or for the pending retry to become due.
    pub fn poll_timeout(&mut self, timeout: Duration) -> usize {
        let wait = match self.retry_at {
            Some(at) => timeout.min(at.saturating_duration_since(Instant::now())),
            None => timeout,
        };
        let mut delivered = 0;
        if let Some(envelope) = self.events_rx.next_timeout(wait) {
            delivered += self.handle(envelope);
        }
        delivered + self.poll()
    }

    fn handle(&mut self, envelope: Envelope) -> usize {
        match envelope {
            Envelope::Event(event) => {
                self.subscribers.deliver(&event);
                1
            },
            Envelope::ReaderFailed { generation } => {
                if generation == self.generation && self.reader.is_some() {
                    self.release_handles();
                    if !self.shutting_down {
                        self.connect();
                    }
                } else {
                    trace!("Ignoring stale reader failure (generation {generation})");
                }
                0
            },
        }
    }

    /// Reopen when automatic opening is enabled.
    fn connect(&mut self) {
        if self.config.auto_open {
            self.open();
        } else {
            debug!("Session '{}' has auto-open disabled", self.config.name);
        }
    }

    fn run_due_retry(&mut self) {
        if let Some(at) = self.retry_at {
            if Instant::now() >= at {
                self.retry_at = None;
                debug!("Retrying session '{}'", self.config.name);
                self.connect();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.shutting_down || !self.config.auto_open {
            return;
        }
        let delay = self.config.reconnect_delay;
        self.retry_at = Some(Instant::now() + delay);
        debug!("Session '{}' retries in {delay:?}", self.config.name);
    }

    fn fail(&mut self, error: &Error) -> SessionStatus {
        warn!("Session '{}' failed to open: {error}", self.config.name);
        self.release_handles();
        self.set_status(SessionStatus::Error);
        self.error_finished = true;
        self.fire(StatusTag::Error);
        SessionStatus::Error
    }

    /// Join the reader (which must already be stopping) and close the writer.
    fn release_handles(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.request_stop();
            reader.join();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.close();
        }
    }

    fn fire(&self, status: StatusTag) {
        self.events_tx.status(StatusEvent {
            session: self.config.name.clone(),
            status,
            port: self.port_name.clone(),
        });
    }

    fn set_status(&self, status: SessionStatus) {
        *self.lock_status() = status;
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("port_name", &self.port_name)
            .field("retry_at", &self.retry_at)
            .finish_non_exhaustive()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
