//! Session lifecycle tests against the in-memory mock device.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serlink::{
    Error, LineConfig, MockOpener, MockPort, ParserRegistry, PortSelector, ServiceKind,
    SessionConfig, SessionController, SessionStatus, SimpleFrame, StatusTag,
};

const WAIT: Duration = Duration::from_secs(3);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_line() -> LineConfig {
    LineConfig::new(9600).with_timeouts(Duration::from_millis(20), Duration::from_millis(20))
}

fn config() -> SessionConfig {
    SessionConfig::new("test")
        .with_line(fast_line())
        .with_reconnect_delay(Duration::from_millis(30))
}

fn com7(_: &PortSelector) -> serlink::Result<String> {
    Ok("COM7".to_string())
}

fn session_on(device: &MockPort, config: SessionConfig) -> (SessionController, MockOpener) {
    let opener = MockOpener::new(device.clone());
    let session = SessionController::new(
        config,
        Arc::new(ParserRegistry::with_builtin()),
        com7,
        opener.clone(),
    );
    (session, opener)
}

fn record_status(session: &mut SessionController) -> Rc<RefCell<Vec<StatusTag>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session.on_status(move |event| sink.borrow_mut().push(event.status));
    seen
}

fn record_commands(session: &mut SessionController) -> Rc<RefCell<Vec<u8>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session.on_data(move |payload| {
        if let Some(frame) = payload.downcast_ref::<SimpleFrame>() {
            sink.borrow_mut().push(frame.command);
        }
    });
    seen
}

/// Poll until `done` holds or the wait expires.
fn poll_until(session: &mut SessionController, mut done: impl FnMut(&SessionController) -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done(session) {
        assert!(Instant::now() < deadline, "condition not reached in {WAIT:?}");
        session.poll_timeout(Duration::from_millis(10));
    }
}

/// Wait, without polling, until the reader has marked the session closed.
fn wait_for_reader_failure(session: &SessionController) {
    let deadline = Instant::now() + WAIT;
    while session.status() != SessionStatus::Closed {
        assert!(Instant::now() < deadline, "reader failure not reported in {WAIT:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Poll for a fixed time, for asserting that nothing else happens.
fn poll_for(session: &mut SessionController, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        session.poll_timeout(Duration::from_millis(5));
    }
}

#[test]
fn test_end_to_end_simple_frames() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);
    let commands = record_commands(&mut session);

    assert_eq!(session.open(), SessionStatus::Open);
    assert!(session.is_opened());
    assert_eq!(session.port_name(), Some("COM7"));
    assert_eq!(opener.open_count(), 1);

    device.push_read(&[0xFB, 0x05, 0xBF]);
    poll_until(&mut session, |_| commands.borrow().len() == 1);
    assert_eq!(*commands.borrow(), vec![5]);

    // Bad end byte: no frame, and the next frame still decodes.
    device.push_read(&[0xFB, 0x05, 0x00]);
    device.push_read(&[0xFB, 0x06, 0xBF]);
    poll_until(&mut session, |_| commands.borrow().len() == 2);
    assert_eq!(*commands.borrow(), vec![5, 6]);

    session.close();
    session.poll();
    assert_eq!(*status.borrow(), vec![StatusTag::Opened, StatusTag::Closed]);
}

#[test]
fn test_chunk_partition_does_not_change_output() {
    init_logger();
    let stream: Vec<u8> = [0x00, 0xFB, 0x01, 0xBF, 0xFB, 0x02, 0x7F, 0xFB, 0x03, 0xBF]
        .into_iter()
        .chain([0xFB, 0xFB, 0xBF])
        .collect();

    let mut outputs = Vec::new();
    for chunk_size in [1, 2, 3, 5, stream.len()] {
        let device = MockPort::new("COM7");
        let (mut session, _opener) = session_on(&device, config());
        let commands = record_commands(&mut session);
        session.open();

        for chunk in stream.chunks(chunk_size) {
            device.push_read(chunk);
        }
        poll_until(&mut session, |_| commands.borrow().len() == 3);
        poll_for(&mut session, Duration::from_millis(30));
        outputs.push(commands.borrow().clone());
    }

    for output in &outputs {
        assert_eq!(output, &vec![1, 3, 0xFB]);
    }
}

#[test]
fn test_unfound_keeps_single_pending_retry() {
    init_logger();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let resolver = move |selector: &PortSelector| -> serlink::Result<String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::DeviceNotFound {
            service: selector.service,
            skip: selector.skip,
        })
    };
    let opener = MockOpener::new(MockPort::new("COM7"));
    let mut session = SessionController::new(
        config().with_selector(PortSelector::new(ServiceKind::UsbCdc, 1)),
        Arc::new(ParserRegistry::with_builtin()),
        resolver,
        opener.clone(),
    );
    let status = record_status(&mut session);

    assert_eq!(session.open(), SessionStatus::Unfound);
    let first = session.pending_retry().unwrap();
    assert!(!session.is_error_finished());

    // A second failure replaces the schedule instead of adding one.
    assert_eq!(session.open(), SessionStatus::Unfound);
    let second = session.pending_retry().unwrap();
    assert!(second >= first);

    poll_until(&mut session, |_| attempts.load(Ordering::SeqCst) >= 4);
    assert_eq!(session.status(), SessionStatus::Unfound);
    assert!(session.pending_retry().is_some());
    assert_eq!(opener.open_count(), 0);

    session.close();
    assert!(session.pending_retry().is_none());
    let tried = attempts.load(Ordering::SeqCst);
    poll_for(&mut session, Duration::from_millis(100));
    assert_eq!(attempts.load(Ordering::SeqCst), tried);

    let seen = status.borrow();
    assert_eq!(seen.last(), Some(&StatusTag::Closed));
    assert!(seen[..seen.len() - 1].iter().all(|s| *s == StatusTag::Unfound));
    assert_eq!(seen.len() - 1, tried);
}

#[test]
fn test_retry_opens_once_device_appears() {
    init_logger();
    let present = Arc::new(AtomicBool::new(false));
    let plugged = Arc::clone(&present);
    let resolver = move |selector: &PortSelector| -> serlink::Result<String> {
        if plugged.load(Ordering::SeqCst) {
            Ok("/dev/ttyACM0".to_string())
        } else {
            Err(Error::DeviceNotFound {
                service: selector.service,
                skip: selector.skip,
            })
        }
    };
    let device = MockPort::new("/dev/ttyACM0");
    let opener = MockOpener::new(device.clone());
    let mut session = SessionController::new(
        config(),
        Arc::new(ParserRegistry::with_builtin()),
        resolver,
        opener.clone(),
    );
    let status = record_status(&mut session);

    assert_eq!(session.start(), SessionStatus::Unfound);
    present.store(true, Ordering::SeqCst);
    poll_until(&mut session, SessionController::is_opened);

    assert_eq!(session.port_name(), Some("/dev/ttyACM0"));
    assert!(session.pending_retry().is_none());
    session.poll();
    assert_eq!(status.borrow().first(), Some(&StatusTag::Unfound));
    assert_eq!(status.borrow().last(), Some(&StatusTag::Opened));
}

#[test]
fn test_double_close_fires_one_closed() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());
    let status = record_status(&mut session);

    session.open();
    session.close();
    session.close();
    session.poll();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(*status.borrow(), vec![StatusTag::Opened, StatusTag::Closed]);
    // Writer and reader handles both closed.
    assert_eq!(device.close_count(), 2);
}

#[test]
fn test_close_on_fresh_session_is_silent() {
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());
    let status = record_status(&mut session);

    session.close();
    session.poll();
    assert!(status.borrow().is_empty());
}

#[test]
fn test_disconnect_reconnects() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);
    let commands = record_commands(&mut session);

    session.open();
    device.fail_next_read(io::ErrorKind::BrokenPipe);
    poll_until(&mut session, |_| opener.open_count() == 2);
    poll_until(&mut session, SessionController::is_opened);
    session.poll();

    assert_eq!(
        *status.borrow(),
        vec![
            StatusTag::Opened,
            StatusTag::Disconnected,
            StatusTag::Opened
        ]
    );
    // The failed reader and its writer were released before reopening.
    assert_eq!(device.close_count(), 2);

    device.push_read(&[0xFB, 0x09, 0xBF]);
    poll_until(&mut session, |_| !commands.borrow().is_empty());
    assert_eq!(*commands.borrow(), vec![9]);
}

#[test]
fn test_disconnect_without_auto_open_stays_closed() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config().with_auto_open(false));
    let status = record_status(&mut session);

    session.open();
    device.fail_next_read(io::ErrorKind::BrokenPipe);
    poll_until(&mut session, |_| status.borrow().len() == 2);
    poll_for(&mut session, Duration::from_millis(50));

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(opener.open_count(), 1);
    assert_eq!(*status.borrow(), vec![StatusTag::Opened, StatusTag::Disconnected]);
}

#[test]
fn test_shutdown_suppresses_reconnect() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);

    session.open();
    device.fail_next_read(io::ErrorKind::BrokenPipe);
    wait_for_reader_failure(&session);

    session.shutdown();
    poll_for(&mut session, Duration::from_millis(100));

    assert_eq!(opener.open_count(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(
        *status.borrow(),
        vec![
            StatusTag::Opened,
            StatusTag::Disconnected,
            StatusTag::Closed
        ]
    );
}

#[test]
fn test_close_after_reader_failure_does_not_reconnect() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);

    session.open();
    device.fail_next_read(io::ErrorKind::BrokenPipe);
    wait_for_reader_failure(&session);

    // The reconnect request is still queued; close makes it stale.
    session.close();
    poll_for(&mut session, Duration::from_millis(100));

    assert_eq!(opener.open_count(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(session.pending_retry().is_none());
    assert_eq!(
        *status.borrow(),
        vec![
            StatusTag::Opened,
            StatusTag::Disconnected,
            StatusTag::Closed
        ]
    );
}

#[test]
fn test_reopen_after_reader_failure_opens_once() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);

    session.open();
    device.fail_next_read(io::ErrorKind::BrokenPipe);
    wait_for_reader_failure(&session);

    // Reopen before the queued reconnect request is handled.
    assert_eq!(session.open(), SessionStatus::Open);
    poll_for(&mut session, Duration::from_millis(100));

    assert_eq!(opener.open_count(), 2);
    assert!(session.is_opened());
    assert_eq!(
        *status.borrow(),
        vec![
            StatusTag::Opened,
            StatusTag::Disconnected,
            StatusTag::Opened
        ]
    );
}

#[test]
fn test_close_returns_within_read_timeout() {
    init_logger();
    let read_timeout = Duration::from_millis(300);
    let device = MockPort::new("COM7");
    let line = LineConfig::new(9600).with_timeouts(read_timeout, Duration::from_millis(20));
    let (mut session, _opener) = session_on(&device, config().with_line(line));

    session.open();
    // Let the reader settle into a blocking read.
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    session.close();
    let took = started.elapsed();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(
        took < read_timeout + Duration::from_millis(150),
        "close took {took:?} with a {read_timeout:?} read timeout"
    );
}

#[test]
fn test_unfound_without_auto_open_has_no_retry() {
    init_logger();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let resolver = move |selector: &PortSelector| -> serlink::Result<String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::DeviceNotFound {
            service: selector.service,
            skip: selector.skip,
        })
    };
    let mut session = SessionController::new(
        config().with_auto_open(false),
        Arc::new(ParserRegistry::with_builtin()),
        resolver,
        MockOpener::new(MockPort::new("COM7")),
    );

    assert_eq!(session.open(), SessionStatus::Unfound);
    assert!(session.pending_retry().is_none());
    poll_for(&mut session, Duration::from_millis(100));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(), SessionStatus::Unfound);
}

#[test]
fn test_send_while_closed_is_dropped() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());

    session.send_data(&[0x01, 0x02]);
    assert!(device.written().is_empty());

    session.open();
    session.send_data(&[0xFB, 0x01, 0xBF]);
    session.send_text("AT\r\n");
    assert_eq!(
        device.written(),
        vec![vec![0xFB, 0x01, 0xBF], b"AT\r\n".to_vec()]
    );

    session.close();
    session.send_text("late");
    assert_eq!(device.written().len(), 2);
}

#[test]
fn test_write_failure_keeps_session_open() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());

    session.open();
    device.fail_writes(true);
    session.send_data(b"lost");
    assert!(session.is_opened());

    device.fail_writes(false);
    session.send_data(b"kept");
    assert_eq!(device.written(), vec![b"kept".to_vec()]);
}

#[test]
fn test_try_send_reports_write_errors() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());

    assert!(matches!(session.try_send(b"early"), Err(Error::IoWrite(_))));

    session.open();
    device.fail_writes(true);
    assert!(matches!(session.try_send(b"lost"), Err(Error::IoWrite(_))));
    assert!(session.is_opened());

    device.fail_writes(false);
    session.try_send(b"kept").unwrap();
    assert_eq!(device.written(), vec![b"kept".to_vec()]);
}

#[test]
fn test_open_failure_is_error_without_retry() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config());
    let status = record_status(&mut session);
    opener.refuse_open(true);

    assert_eq!(session.open(), SessionStatus::Error);
    assert!(session.is_error_finished());
    assert!(session.pending_retry().is_none());
    poll_for(&mut session, Duration::from_millis(60));
    assert_eq!(*status.borrow(), vec![StatusTag::Error]);

    // A new attempt clears the error flag.
    opener.refuse_open(false);
    assert_eq!(session.open(), SessionStatus::Open);
    assert!(!session.is_error_finished());
}

#[test]
fn test_invalid_line_config_is_error() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, opener) = session_on(&device, config().with_line(LineConfig::new(0)));
    let status = record_status(&mut session);

    assert_eq!(session.open(), SessionStatus::Error);
    assert!(session.is_error_finished());
    assert_eq!(opener.open_count(), 0);
    session.poll();
    assert_eq!(*status.borrow(), vec![StatusTag::Error]);
}

#[test]
fn test_status_event_carries_session_and_port() {
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config());
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    session.on_status(move |event| sink.borrow_mut().push(event.clone()));

    session.open();
    session.poll();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].session, "test");
    assert_eq!(events[0].port.as_deref(), Some("COM7"));
    assert_eq!(events[0].status.as_str(), "OPENED");
}

#[test]
fn test_line_parser_session() {
    init_logger();
    let device = MockPort::new("COM7");
    let (mut session, _opener) = session_on(&device, config().with_parser("line"));
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    session.on_data(move |payload| {
        if let Some(line) = payload.downcast_ref::<String>() {
            sink.borrow_mut().push(line.clone());
        }
    });

    session.open();
    device.push_read(b"temp=2");
    device.push_read(b"1\r\nok\n");
    poll_until(&mut session, |_| lines.borrow().len() == 2);
    assert_eq!(*lines.borrow(), vec!["temp=21", "ok"]);
}
