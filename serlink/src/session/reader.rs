//! Background reader thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};

use crate::dispatch::{EventSender, StatusEvent, StatusTag};
use crate::error::Result;
use crate::parser::{FrameParser, ParseSignal};
use crate::port::SerialChannel;
use crate::session::SessionStatus;

/// Size of the buffer handed to each read.
const READ_BUFFER_SIZE: usize = 1024;

/// Everything a reader thread owns or shares.
pub(crate) struct ReaderContext {
    pub(crate) session: String,
    pub(crate) generation: u64,
    pub(crate) channel: Box<dyn SerialChannel>,
    pub(crate) parser: Box<dyn FrameParser>,
    pub(crate) status: Arc<Mutex<SessionStatus>>,
    pub(crate) events: EventSender,
}

/// Handle to a running reader thread.
pub(crate) struct ReaderLoop {
    keep_running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReaderLoop {
    /// Start reading on a new thread.
    pub(crate) fn spawn(ctx: ReaderContext) -> Result<Self> {
        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep_running);
        let handle = thread::Builder::new()
            .name(format!("serlink-reader-{}", ctx.session))
            .spawn(move || run(ctx, &flag))?;
        Ok(Self {
            keep_running,
            handle,
        })
    }

    /// Ask the loop to exit after the current read.
    ///
    /// Call with the session status locked so a concurrent failure report
    /// either happens entirely before or not at all.
    pub(crate) fn request_stop(&self) {
        self.keep_running.store(false, Ordering::Release);
    }

    /// Wait for the thread to finish. Bounded by one read timeout once a
    /// stop was requested or the loop failed.
    pub(crate) fn join(self) {
        let name = self
            .handle
            .thread()
            .name()
            .unwrap_or("serlink-reader")
            .to_string();
        if self.handle.join().is_err() {
            warn!("Reader thread {name} panicked");
        } else {
            debug!("Reader thread {name} joined");
        }
    }
}

fn run(mut ctx: ReaderContext, keep_running: &AtomicBool) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    debug!("Reader started on {}", ctx.channel.name());

    while keep_running.load(Ordering::Acquire) {
        match ctx.channel.read_available(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                for &byte in &buf[..n] {
                    if ctx.parser.parse_byte(byte) == ParseSignal::FrameError {
                        trace!("Framing error at byte {byte:#04x}, resynchronising");
                    }
                }
            },
            Err(e) => {
                report_failure(&ctx, keep_running, &e);
                break;
            },
        }
    }

    ctx.channel.close();
    debug!("Reader stopped on {}", ctx.channel.name());
}

fn report_failure(ctx: &ReaderContext, keep_running: &AtomicBool, error: &crate::Error) {
    let mut status = ctx
        .status
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if !keep_running.load(Ordering::Acquire) {
        // Closing raced with the failure; the closer reports the transition.
        return;
    }
    keep_running.store(false, Ordering::Release);

    warn!("{} disconnected: {error}", ctx.channel.name());
    *status = SessionStatus::Closed;
    ctx.events.status(StatusEvent {
        session: ctx.session.clone(),
        status: StatusTag::Disconnected,
        port: Some(ctx.channel.name().to_string()),
    });
    ctx.events.reader_failed(ctx.generation);
}
