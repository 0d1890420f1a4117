//! In-memory serial channel.
//!
//! [`MockPort`] simulates a device without hardware: tests queue the chunks
//! the device "sends", inject read failures to simulate an unplugged cable,
//! and inspect what was written. Every handle cloned from a `MockPort` shares
//! the same device state.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::port::{DEFAULT_READ_TIMEOUT, LineConfig, PortOpener, SerialChannel};

#[derive(Debug, Default)]
struct DeviceState {
    /// Chunks returned by successive reads, boundaries preserved.
    reads: VecDeque<Vec<u8>>,
    /// Error returned by the next read.
    read_error: Option<io::ErrorKind>,
    /// Whether writes fail.
    fail_writes: bool,
    /// Every successful write.
    writes: Vec<Vec<u8>>,
    /// Number of handles closed.
    closes: usize,
}

#[derive(Debug, Default)]
struct Device {
    state: Mutex<DeviceState>,
    data_ready: Condvar,
}

impl Device {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Mock serial device handle.
#[derive(Debug, Clone)]
pub struct MockPort {
    name: String,
    device: Arc<Device>,
    read_timeout: Duration,
    open: bool,
}

impl MockPort {
    /// Create a mock device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: Arc::new(Device::default()),
            read_timeout: DEFAULT_READ_TIMEOUT,
            open: true,
        }
    }

    /// Queue one chunk of bytes for the next read.
    pub fn push_read(&self, data: &[u8]) {
        self.device.lock().reads.push_back(data.to_vec());
        self.device.data_ready.notify_all();
    }

    /// Make the next read fail, as if the device had been unplugged.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.device.lock().read_error = Some(kind);
        self.device.data_ready.notify_all();
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.device.lock().fail_writes = fail;
    }

    /// All writes so far, one entry per call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.device.lock().writes.clone()
    }

    /// Number of handles closed so far.
    pub fn close_count(&self) -> usize {
        self.device.lock().closes
    }

    /// Number of queued chunks not read yet.
    pub fn pending_reads(&self) -> usize {
        self.device.lock().reads.len()
    }

    fn handle(&self, name: &str, read_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            device: Arc::clone(&self.device),
            read_timeout,
            open: true,
        }
    }
}

impl SerialChannel for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::IoRead(io::Error::new(
                io::ErrorKind::NotConnected,
                "port closed",
            )));
        }

        let deadline = Instant::now() + self.read_timeout;
        let mut state = self.device.lock();
        loop {
            if let Some(kind) = state.read_error.take() {
                return Err(Error::IoRead(io::Error::new(kind, "mock read failure")));
            }

            if let Some(mut chunk) = state.reads.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.reads.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            state = self
                .device
                .data_ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let mut state = self.device.lock();
        if state.fail_writes {
            return Err(Error::IoWrite(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    fn try_clone_reader(&self) -> Result<Box<dyn SerialChannel>> {
        Ok(Box::new(self.handle(&self.name, self.read_timeout)))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.lock().closes += 1;
            self.device.data_ready.notify_all();
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Opens handles on a shared [`MockPort`] device.
#[derive(Debug, Clone)]
pub struct MockOpener {
    device: MockPort,
    refuse: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl MockOpener {
    /// Opener that hands out handles to `device`.
    pub fn new(device: MockPort) -> Self {
        Self {
            device,
            refuse: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make subsequent opens fail (or succeed again).
    pub fn refuse_open(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The shared device.
    pub fn device(&self) -> &MockPort {
        &self.device
    }
}

impl PortOpener for MockOpener {
    fn open(&self, port: &str, line: &LineConfig) -> Result<Box<dyn SerialChannel>> {
        line.validate()?;
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::open_failed(
                port,
                Error::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "access denied",
                )),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.device.handle(port, line.read_timeout)))
    }
}
