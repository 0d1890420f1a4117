//! serlink CLI - Listen to and talk with serial devices.
//!
//! ## Features
//!
//! - List and classify serial ports
//! - Resolve a port by service kind and index
//! - Listen with a frame parser, reconnecting when the device comes back
//! - Send raw or hex-encoded data
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use serlink::{
    FixedPort, LineConfig, NativeResolver, ParserRegistry, PortResolver, PortSelector,
    ServiceKind, SessionConfig,
};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if styled output should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::Config;

/// Errors the CLI reports with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid arguments or option values.
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// serlink - Serial device sessions with frame parsing and reconnection.
///
/// Environment variables:
///   SERLINK_PORT     - Serial port to use (skips discovery)
///   SERLINK_SERVICE  - Device service kind used for discovery
///   SERLINK_BAUD     - Baud rate (default: 9600)
///   SERLINK_PARSER   - Frame parser id (default: simple)
#[derive(Parser)]
#[command(name = "serlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/serlink/serlink")]
struct Cli {
    /// Serial port to use (discovered by service kind if not specified).
    #[arg(short, long, global = true, env = "SERLINK_PORT")]
    port: Option<String>,

    /// Device service kind used for discovery.
    #[arg(long, global = true, env = "SERLINK_SERVICE")]
    service: Option<Service>,

    /// Number of matching devices to skip during discovery.
    #[arg(long, global = true)]
    skip: Option<usize>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "SERLINK_BAUD")]
    baud: Option<u32>,

    /// Frame parser id (see `serlink parsers`).
    #[arg(long, global = true, env = "SERLINK_PARSER")]
    parser: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Device service kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Service {
    /// CH34x USB-serial bridges (default).
    Ch340,
    /// USB CDC-ACM devices.
    UsbCdc,
    /// Silicon Labs CP210x bridges.
    Cp210x,
    /// FTDI bridges.
    Ftdi,
    /// Prolific PL2303 bridges.
    Prolific,
    /// Any serial port.
    Any,
}

impl From<Service> for ServiceKind {
    fn from(service: Service) -> Self {
        match service {
            Service::Ch340 => ServiceKind::Ch340,
            Service::UsbCdc => ServiceKind::UsbCdc,
            Service::Cp210x => ServiceKind::Cp210x,
            Service::Ftdi => ServiceKind::Ftdi,
            Service::Prolific => ServiceKind::Prolific,
            Service::Any => ServiceKind::Any,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Print the port the selector resolves to.
    Resolve,

    /// List available frame parsers.
    Parsers,

    /// Open a session and print status changes and decoded frames.
    Listen {
        /// Stop after this many decoded frames.
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Exit instead of reconnecting when the device goes away.
        #[arg(long)]
        no_reconnect: bool,

        /// Output events as JSON lines to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open the port, write data and close.
    Send {
        /// Data to send (text, or hex bytes with --hex).
        data: String,

        /// Interpret DATA as hex bytes, e.g. "FB 05 BF".
        #[arg(long)]
        hex: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Port selector from flags, falling back to the config file.
    fn selector(&self, config: &Config) -> PortSelector {
        let service = self
            .service
            .map(ServiceKind::from)
            .or(config.port.service)
            .unwrap_or_default();
        let skip = self.skip.or(config.port.skip).unwrap_or(0);
        PortSelector::new(service, skip)
    }

    /// Explicit port from flags or config, if any.
    fn fixed_port(&self, config: &Config) -> Option<String> {
        self.port
            .clone()
            .or_else(|| config.port.serial.clone())
    }

    /// Resolver honouring an explicit port before discovery.
    fn resolver(&self, config: &Config) -> impl PortResolver + 'static {
        let fixed = self.fixed_port(config).map(FixedPort);
        move |selector: &PortSelector| match &fixed {
            Some(port) => port.resolve(selector),
            None => NativeResolver.resolve(selector),
        }
    }

    /// Line parameters from the config file with the baud flag applied.
    fn line(&self, config: &Config) -> LineConfig {
        let mut line = config.line.to_line_config();
        if let Some(baud) = self.baud {
            line.baud_rate = baud;
        }
        line
    }

    /// Session configuration, rejecting unknown parser ids.
    fn session_config(&self, config: &Config, parsers: &ParserRegistry) -> Result<SessionConfig> {
        let parser = self
            .parser
            .clone()
            .or_else(|| config.session.parser.clone())
            .unwrap_or_else(|| serlink::parser::DEFAULT_PARSER.to_string());
        if !parsers.contains(&parser) {
            return Err(CliError::Usage(format!(
                "unknown parser '{parser}' (available: {})",
                parsers.names().join(", ")
            ))
            .into());
        }

        let mut session = SessionConfig::default()
            .with_selector(self.selector(config))
            .with_line(self.line(config))
            .with_parser(parser);
        if let Some(name) = &config.session.name {
            session.name.clone_from(name);
        }
        if let Some(auto_open) = config.session.auto_open {
            session.auto_open = auto_open;
        }
        if let Some(ms) = config.session.reconnect_delay_ms {
            session.reconnect_delay = Duration::from_millis(ms);
        }
        Ok(session)
    }
}

fn main() {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "serlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let parsers = ParserRegistry::with_builtin();

    match &cli.command {
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(&cli.selector(&config), *json);
        },
        Commands::Resolve => {
            commands::ports::cmd_resolve(cli, &config)?;
        },
        Commands::Parsers => {
            commands::ports::cmd_parsers(&parsers);
        },
        Commands::Listen {
            count,
            no_reconnect,
            json,
        } => {
            let options = commands::listen::ListenOptions {
                count: *count,
                no_reconnect: *no_reconnect,
                json: *json,
            };
            commands::listen::cmd_listen(cli, &config, parsers, &options)?;
        },
        Commands::Send { data, hex } => {
            commands::send::cmd_send(cli, &config, parsers, data, *hex)?;
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}
