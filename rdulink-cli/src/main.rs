//! rdulink CLI - move memory images to and from RDU hand controllers.
//!
//! ## Features
//!
//! - Send S-record / Intel Hex files, line by line or over Xmodem
//! - Receive an image into a RAM target and save or verify it
//! - Convert and inspect record files offline
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use rdulink::{IntelHex, RecordFormat, SRecord};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod image;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars should be drawn (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad or missing arguments (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// rdulink - transfer tool for RDU hand-controller memory images.
///
/// Environment variables:
///   RDULINK_PORT   - Default serial port
///   RDULINK_BAUD   - Default baud rate (default: 9600)
#[derive(Parser)]
#[command(name = "rdulink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "RDULINK_PORT")]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "RDULINK_BAUD")]
    pub baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Record format for generated output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    /// Motorola S-records (S1/S9).
    Srec,
    /// Intel Hex (00/01).
    Ihex,
}

impl OutputFormat {
    /// The library codec for this format.
    pub fn codec(self) -> &'static dyn RecordFormat {
        match self {
            Self::Srec => &SRecord,
            Self::Ihex => &IntelHex,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a record file to the device.
    Send {
        /// S-record or Intel Hex file.
        file: PathBuf,

        /// Send through the Xmodem link layer instead of plain lines.
        #[arg(long)]
        xmodem: bool,

        /// Re-encode the records in this format before sending.
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Data bytes per record.
        #[arg(long)]
        chunk: Option<usize>,
    },

    /// Receive an image from the device.
    Receive {
        /// Write the received image to this binary file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compare against this binary file instead of storing.
        #[arg(long, conflicts_with = "output")]
        verify: Option<PathBuf>,

        /// Record address that maps to the start of the image.
        #[arg(long, value_parser = parse_hex_u32)]
        base: Option<u32>,

        /// Relocation offset added to every record address.
        #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
        offset: u16,

        /// Image size in bytes.
        #[arg(long, value_parser = parse_hex_u32)]
        size: Option<u32>,

        /// Run commands embedded in comment records.
        #[arg(long)]
        commands: bool,

        /// Expect plain record lines instead of Xmodem packets.
        #[arg(long)]
        lines: bool,
    },

    /// Convert a record file to another format.
    Convert {
        /// Input record file.
        input: PathBuf,

        /// Output format.
        #[arg(long, value_enum)]
        to: OutputFormat,

        /// First address to emit (defaults to the lowest address present).
        #[arg(long, value_parser = parse_hex_u16)]
        start: Option<u16>,

        /// Last address to emit (defaults to the highest address present).
        #[arg(long, value_parser = parse_hex_u16)]
        end: Option<u16>,

        /// Data bytes per record.
        #[arg(long)]
        chunk: Option<usize>,

        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show information about a record file.
    Info {
        /// Record file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a hexadecimal number (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Parse a 16-bit hexadecimal address.
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).map_err(|_| format!("Address 0x{value:X} does not fit in 16 bits"))
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 130,
        None => match err.downcast_ref::<rdulink::Error>() {
            Some(rdulink::Error::Interrupted) => 130,
            _ => 1,
        },
    }
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

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
        "rdulink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {err}");
    }
    rdulink::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Send {
            file,
            xmodem,
            format,
            chunk,
        } => commands::send::cmd_send(cli, &config, file, *xmodem, *format, *chunk),
        Commands::Receive {
            output,
            verify,
            base,
            offset,
            size,
            commands: embedded_commands,
            lines,
        } => commands::receive::cmd_receive(
            cli,
            &config,
            &commands::receive::ReceiveOptions {
                output: output.clone(),
                verify: verify.clone(),
                base: *base,
                offset: *offset,
                size: *size,
                embedded_commands: *embedded_commands,
                lines: *lines,
            },
        ),
        Commands::Convert {
            input,
            to,
            start,
            end,
            chunk,
            output,
        } => commands::convert::cmd_convert(
            &config,
            input,
            *to,
            (*start, *end),
            *chunk,
            output.as_deref(),
        ),
        Commands::Info { file, json } => commands::info::cmd_info(&config, file, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
