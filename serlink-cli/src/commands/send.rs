//! Send command: open, write, close.

use anyhow::{Context, Result, bail};
use console::style;
use serlink::{NativeOpener, ParserRegistry, SessionController, SessionStatus};
use std::sync::Arc;

use crate::{Cli, CliError, config::Config};

/// Parse hex bytes such as `"FB 05 BF"`, `"fb05bf"` or `"0xFB,0x05,0xBF"`.
fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|token| {
            token
                .trim_start_matches("0x")
                .trim_start_matches("0X")
        })
        .collect();

    if digits.is_empty() {
        return Err("no hex bytes given".to_string());
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{s}'"));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = digits.get(i..i + 2).ok_or_else(|| format!("invalid hex in '{s}'"))?;
            u8::from_str_radix(pair, 16).map_err(|e| format!("invalid hex byte '{pair}': {e}"))
        })
        .collect()
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    parsers: ParserRegistry,
    data: &str,
    hex: bool,
) -> Result<()> {
    let bytes = if hex {
        parse_hex_bytes(data).map_err(CliError::Usage)?
    } else {
        data.as_bytes().to_vec()
    };

    // One-shot: no retry, no reconnect.
    let session_config = cli
        .session_config(config, &parsers)?
        .with_auto_open(false);
    let mut session = SessionController::new(
        session_config,
        Arc::new(parsers),
        cli.resolver(config),
        NativeOpener,
    );

    let port = send_once(&mut session, &bytes)?;

    if !cli.quiet {
        eprintln!(
            "{} Sent {} bytes to {}",
            style("✓").green(),
            bytes.len(),
            style(port).cyan()
        );
    }
    Ok(())
}

/// Open the session, write `bytes` and shut it down. Returns the port written to.
fn send_once(session: &mut SessionController, bytes: &[u8]) -> Result<String> {
    match session.open() {
        SessionStatus::Open => {},
        SessionStatus::Unfound => bail!("No device found for {}", session.config().selector),
        _ => bail!(
            "Failed to open {}",
            session.port_name().unwrap_or("serial port")
        ),
    }

    let port = session.port_name().unwrap_or_default().to_string();
    let sent = session
        .try_send(bytes)
        .with_context(|| format!("Failed to write to {port}"));
    session.shutdown();
    sent.map(|()| port)
}
