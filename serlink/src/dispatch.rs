//! Hand-off of session events from the reader thread to the consumer.
//!
//! Producers (the reader thread and the parser running on it) push into an
//! unbounded queue and never wait for the consumer. The consumer drains the
//! queue on its own thread, inside `SessionController::poll`, which is where
//! subscribed callbacks run. Events from one producer keep their order.

use std::any::Any;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Status notification tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    /// No device matched the selector; a retry is scheduled.
    Unfound,
    /// The channel is open and the reader is running.
    Opened,
    /// The open attempt failed.
    Error,
    /// The session was closed.
    Closed,
    /// The device went away while the session was open.
    Disconnected,
}

impl StatusTag {
    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unfound => "UNFIND",
            Self::Opened => "OPENED",
            Self::Error => "ERROR",
            Self::Closed => "CLOSED",
            Self::Disconnected => "EDISCONNECTED",
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Name of the session that changed.
    pub session: String,
    /// What happened.
    pub status: StatusTag,
    /// Port involved, when one had been resolved.
    pub port: Option<String>,
}

/// A decoded frame. Its concrete type is chosen by the parser.
pub struct Payload(Box<dyn Any + Send>);

impl Payload {
    /// Wrap a decoded value.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Borrow the value as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Take the value out as `T`, giving the payload back on mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(Self)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").finish_non_exhaustive()
    }
}

/// Anything the consumer can observe.
#[derive(Debug)]
pub enum SessionEvent {
    /// A status transition.
    Status(StatusEvent),
    /// A decoded frame.
    Data(Payload),
}

/// Queue item: consumer-visible events plus reader bookkeeping.
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(SessionEvent),
    /// The reader of session `generation` exited after an I/O failure.
    ReaderFailed { generation: u64 },
}

/// Producer side of the queue.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: Sender<Envelope>,
}

impl EventSender {
    pub(crate) fn status(&self, event: StatusEvent) {
        self.push(Envelope::Event(SessionEvent::Status(event)));
    }

    pub(crate) fn data(&self, payload: Payload) {
        self.push(Envelope::Event(SessionEvent::Data(payload)));
    }

    pub(crate) fn reader_failed(&self, generation: u64) {
        self.push(Envelope::ReaderFailed { generation });
    }

    fn push(&self, envelope: Envelope) {
        // A dropped receiver means the consumer is gone; nothing left to notify.
        let _ = self.tx.send(envelope);
    }
}

/// Consumer side of the queue.
#[derive(Debug)]
pub(crate) struct EventReceiver {
    rx: Receiver<Envelope>,
}

impl EventReceiver {
    pub(crate) fn try_next(&self) -> Option<Envelope> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn next_timeout(&self, timeout: Duration) -> Option<Envelope> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Some(envelope),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Create a connected sender/receiver pair.
pub(crate) fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Handle a parser uses to emit decoded frames.
#[derive(Debug, Clone)]
pub struct PacketSink {
    sender: EventSender,
}

impl PacketSink {
    pub(crate) fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    /// A sink not attached to any session, with the receiving end of its
    /// frames. Useful for running a parser over recorded data.
    pub fn detached() -> (Self, Payloads) {
        let (sender, receiver) = event_queue();
        (Self::new(sender), Payloads { receiver })
    }

    /// Emit one decoded frame.
    pub fn emit<T: Any + Send>(&self, value: T) {
        self.sender.data(Payload::new(value));
    }
}

/// Frames emitted through a detached [`PacketSink`].
#[derive(Debug)]
pub struct Payloads {
    receiver: EventReceiver,
}

impl Payloads {
    /// Drain every frame emitted so far.
    pub fn drain(&self) -> Vec<Payload> {
        std::iter::from_fn(|| self.receiver.try_next())
            .filter_map(|envelope| match envelope {
                Envelope::Event(SessionEvent::Data(payload)) => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Drain every frame emitted so far as `T`, skipping other types.
    pub fn drain_as<T: Any>(&self) -> Vec<T> {
        self.drain()
            .into_iter()
            .filter_map(|payload| payload.downcast::<T>().ok())
            .collect()
    }
}

type StatusCallback = Box<dyn FnMut(&StatusEvent)>;
type DataCallback = Box<dyn FnMut(&Payload)>;

/// Ordered callback lists, invoked on the consumer's thread.
#[derive(Default)]
pub(crate) struct Subscribers {
    status: Vec<StatusCallback>,
    data: Vec<DataCallback>,
}

impl Subscribers {
    pub(crate) fn on_status(&mut self, callback: StatusCallback) {
        self.status.push(callback);
    }

    pub(crate) fn on_data(&mut self, callback: DataCallback) {
        self.data.push(callback);
    }

    pub(crate) fn deliver(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Status(status) => {
                for callback in &mut self.status {
                    callback(status);
                }
            },
            SessionEvent::Data(payload) => {
                for callback in &mut self.data {
                    callback(payload);
                }
            },
        }
    }
}
