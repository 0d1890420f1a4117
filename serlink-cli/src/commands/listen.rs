//! Listen command: print status changes and decoded frames.

use anyhow::{Context, Result, bail};
use console::style;
use log::debug;
use serlink::{
    MindData, NativeOpener, ParserRegistry, Payload, SessionController, SessionStatus,
    SimpleFrame, StatusEvent, StatusTag,
};
use std::cell::Cell;
use std::io::{self, Write as _};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{Cli, config::Config, use_fancy_output};

/// How long one poll waits for events.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options of the listen command.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListenOptions {
    /// Stop after this many frames.
    pub count: Option<usize>,
    /// Exit when the session closes instead of reconnecting.
    pub no_reconnect: bool,
    /// Emit JSON lines on stdout.
    pub json: bool,
}

/// JSON view of a status event.
fn status_json(event: &StatusEvent) -> serde_json::Value {
    serde_json::json!({
        "type": "status",
        "session": event.session,
        "status": event.status.as_str(),
        "port": event.port,
    })
}

/// JSON view of a decoded frame. Unknown payload types are reported by type only.
fn payload_json(payload: &Payload) -> serde_json::Value {
    if let Some(frame) = payload.downcast_ref::<SimpleFrame>() {
        serde_json::json!({ "type": "frame", "command": frame.command })
    } else if let Some(data) = payload.downcast_ref::<MindData>() {
        serde_json::json!({
            "type": "mind",
            "signal": data.signal,
            "attention": data.attention,
            "meditation": data.meditation,
            "raw": data.raw,
        })
    } else if let Some(line) = payload.downcast_ref::<String>() {
        serde_json::json!({ "type": "line", "text": line })
    } else {
        serde_json::json!({ "type": "unknown" })
    }
}

/// Human-readable view of a decoded frame.
fn payload_text(payload: &Payload) -> String {
    if let Some(frame) = payload.downcast_ref::<SimpleFrame>() {
        format!("command 0x{:02X}", frame.command)
    } else if let Some(data) = payload.downcast_ref::<MindData>() {
        let fields: Vec<String> = [
            ("signal", data.signal.map(i32::from)),
            ("attention", data.attention.map(i32::from)),
            ("meditation", data.meditation.map(i32::from)),
            ("raw", data.raw.map(i32::from)),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| format!("{name}={v}")))
        .collect();
        fields.join(" ")
    } else if let Some(line) = payload.downcast_ref::<String>() {
        line.clone()
    } else {
        "<frame>".to_string()
    }
}

/// Styled status line for stderr.
fn status_text(event: &StatusEvent) -> String {
    let tag = match event.status {
        StatusTag::Opened => style(event.status.as_str()).green().bold(),
        StatusTag::Unfound | StatusTag::Closed => style(event.status.as_str()).yellow(),
        StatusTag::Error | StatusTag::Disconnected => style(event.status.as_str()).red().bold(),
    };
    let marker = if use_fancy_output() { "●" } else { "*" };
    match &event.port {
        Some(port) => format!("{} {tag} {}", style(marker).dim(), style(port).cyan()),
        None => format!("{} {tag}", style(marker).dim()),
    }
}

/// Listen command implementation.
pub(crate) fn cmd_listen(
    cli: &Cli,
    config: &Config,
    parsers: ParserRegistry,
    options: &ListenOptions,
) -> Result<()> {
    let mut session_config = cli.session_config(config, &parsers)?;
    if options.no_reconnect {
        session_config.auto_open = false;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let mut session = SessionController::new(
        session_config,
        Arc::new(parsers),
        cli.resolver(config),
        NativeOpener,
    );

    let json = options.json;
    let quiet = cli.quiet;
    session.on_status(move |event| {
        if json {
            println!("{}", status_json(event));
        } else if !quiet {
            eprintln!("{}", status_text(event));
        }
    });

    let frames = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&frames);
    session.on_data(move |payload| {
        counter.set(counter.get() + 1);
        if json {
            println!("{}", payload_json(payload));
        } else {
            println!("{}", payload_text(payload));
        }
        io::stdout().flush().ok();
    });

    if !json && !quiet {
        eprintln!("{}", style("Press Ctrl-C to stop").dim());
    }

    // Listening is an explicit request to open, whatever auto_open says.
    session.open();
    let result = listen_loop(&mut session, &stop, &frames, options);

    session.shutdown();
    session.poll();
    result
}

fn listen_loop(
    session: &mut SessionController,
    stop: &AtomicBool,
    frames: &Cell<usize>,
    options: &ListenOptions,
) -> Result<()> {
    loop {
        session.poll_timeout(POLL_INTERVAL);

        if stop.load(Ordering::SeqCst) {
            debug!("Interrupted, closing session");
            return Ok(());
        }
        if options.count.is_some_and(|count| frames.get() >= count) {
            return Ok(());
        }
        if session.is_error_finished() {
            bail!(
                "Failed to open {}",
                session.port_name().unwrap_or("serial port")
            );
        }
        if options.no_reconnect
            && matches!(
                session.status(),
                SessionStatus::Closed | SessionStatus::Unfound
            )
        {
            bail!("Session '{}' is no longer open", session.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serlink::{FixedPort, MockOpener, MockPort, SessionConfig};

    fn event(status: StatusTag, port: Option<&str>) -> StatusEvent {
        StatusEvent {
            session: "serial".to_string(),
            status,
            port: port.map(str::to_string),
        }
    }

    #[test]
    fn test_status_json() {
        let value = status_json(&event(StatusTag::Disconnected, Some("COM7")));
        assert_eq!(value["type"], "status");
        assert_eq!(value["status"], "EDISCONNECTED");
        assert_eq!(value["port"], "COM7");
    }

    #[test]
    fn test_payload_views() {
        let frame = Payload::new(SimpleFrame { command: 5 });
        assert_eq!(payload_json(&frame)["command"], 5);
        assert_eq!(payload_text(&frame), "command 0x05");

        let mind = Payload::new(MindData {
            attention: Some(50),
            raw: Some(-200),
            ..MindData::default()
        });
        assert_eq!(payload_json(&mind)["attention"], 50);
        assert!(payload_json(&mind)["signal"].is_null());
        assert_eq!(payload_text(&mind), "attention=50 raw=-200");

        let line = Payload::new("ok".to_string());
        assert_eq!(payload_json(&line)["text"], "ok");
        assert_eq!(payload_text(&line), "ok");

        let other = Payload::new(7u64);
        assert_eq!(payload_json(&other)["type"], "unknown");
    }

    #[test]
    fn test_status_text_plain() {
        console::set_colors_enabled(false);
        let text = status_text(&event(StatusTag::Opened, Some("COM7")));
        assert!(text.ends_with("OPENED COM7"));
    }

    #[test]
    fn test_listen_loop_stops_after_count() {
        let device = MockPort::new("COM7");
        let line = serlink::LineConfig::default()
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));
        let mut session = SessionController::new(
            SessionConfig::default().with_line(line),
            Arc::new(ParserRegistry::with_builtin()),
            FixedPort("COM7".to_string()),
            MockOpener::new(device.clone()),
        );
        let frames = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&frames);
        session.on_data(move |_| counter.set(counter.get() + 1));

        session.open();
        device.push_read(&[0xFB, 0x01, 0xBF, 0xFB, 0x02, 0xBF]);
        let options = ListenOptions {
            count: Some(2),
            ..ListenOptions::default()
        };
        listen_loop(&mut session, &AtomicBool::new(false), &frames, &options).unwrap();
        assert_eq!(frames.get(), 2);
    }

    #[test]
    fn test_listen_loop_no_reconnect_fails_on_disconnect() {
        let device = MockPort::new("COM7");
        let line = serlink::LineConfig::default()
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20));
        let mut session = SessionController::new(
            SessionConfig::default().with_line(line).with_auto_open(false),
            Arc::new(ParserRegistry::with_builtin()),
            FixedPort("COM7".to_string()),
            MockOpener::new(device.clone()),
        );

        session.open();
        device.fail_next_read(io::ErrorKind::BrokenPipe);
        let options = ListenOptions {
            no_reconnect: true,
            ..ListenOptions::default()
        };
        let err = listen_loop(&mut session, &AtomicBool::new(false), &Cell::new(0), &options)
            .unwrap_err();
        assert!(err.to_string().contains("no longer open"));
    }

    #[test]
    fn test_listen_loop_stops_on_interrupt() {
        let device = MockPort::new("COM7");
        let mut session = SessionController::new(
            SessionConfig::default(),
            Arc::new(ParserRegistry::with_builtin()),
            FixedPort("COM7".to_string()),
            MockOpener::new(device),
        );
        session.open();
        let stop = AtomicBool::new(true);
        listen_loop(&mut session, &stop, &Cell::new(0), &ListenOptions::default()).unwrap();
    }
}
