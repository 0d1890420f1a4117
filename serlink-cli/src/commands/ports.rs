//! Port discovery and parser listing commands.

use anyhow::{Context, Result};
use console::style;
use serlink::device::select_port;
use serlink::{DetectedPort, ParserRegistry, PortResolver, PortSelector};

use crate::{Cli, config::Config, use_fancy_output};

/// JSON view of a detected port.
fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// One human-readable line describing a detected port.
fn port_line(port: &DetectedPort) -> String {
    let device_type = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else {
        String::new()
    };

    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = match port.product.as_deref() {
        Some(product) if !product.is_empty() => format!(" - {}", style(product).dim()),
        _ => String::new(),
    };

    format!("{}{device_type}{vid_pid}{product}", style(&port.name).cyan())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(selector: &PortSelector, json: bool) {
    let detected = serlink::discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    let bullet = if use_fancy_output() { "•" } else { "-" };
    for port in &detected {
        eprintln!("  {} {}", style(bullet).green(), port_line(port));
    }

    // Show what the selector would bind to
    if let Ok(port) = select_port(&detected, selector) {
        eprintln!(
            "\n{} {selector} resolves to {}",
            style("→").green().bold(),
            style(port).cyan().bold()
        );
    }
}

/// Resolve command implementation: prints the port name to stdout.
pub(crate) fn cmd_resolve(cli: &Cli, config: &Config) -> Result<()> {
    let selector = cli.selector(config);
    let port = cli
        .resolver(config)
        .resolve(&selector)
        .with_context(|| format!("Could not resolve {selector}"))?;
    println!("{port}");
    Ok(())
}

/// Parsers command implementation.
pub(crate) fn cmd_parsers(parsers: &ParserRegistry) {
    for name in parsers.names() {
        println!("{name}");
    }
}
