//! Serial port selection.
//!
//! The port comes from `--port` / `RDULINK_PORT`, then the config file. With
//! neither set, a single detected port is used; none or several is a usage
//! error so scripts never hang on a prompt.

use anyhow::{Context, Result};
use log::{debug, info};
use rdulink::port::{PortInfo, SerialConfig};
use rdulink::{SerialTransport, list_ports};
use std::cmp::Ordering;

use crate::config::Config;
use crate::{Cli, CliError};

/// Baud rate when nothing else sets one.
pub(crate) const DEFAULT_BAUD: u32 = 9600;

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port from the candidates found on this machine.
fn select_detected(ports: Vec<PortInfo>) -> Result<String> {
    match ports.len().cmp(&1) {
        Ordering::Equal => ports
            .into_iter()
            .next()
            .map(|p| p.name)
            .ok_or_else(|| usage_err("No serial ports found")),
        Ordering::Greater => {
            let names: Vec<_> = ports.iter().map(|p| p.name.as_str()).collect();
            Err(usage_err(&format!(
                "Multiple serial ports found ({}); choose one with --port",
                names.join(", ")
            )))
        },
        Ordering::Less => Err(usage_err("No serial ports found; specify one with --port")),
    }
}

/// Resolve the port name to use.
pub(crate) fn select_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }
    if let Some(port) = &config.port.connection.serial {
        debug!("Using port from config: {port}");
        return Ok(port.clone());
    }
    let port = select_detected(list_ports()?)?;
    info!("Auto-selected port {port}");
    Ok(port)
}

/// Resolve the baud rate to use.
pub(crate) fn select_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Open the selected port with software flow control.
pub(crate) fn open_port(cli: &Cli, config: &Config) -> Result<SerialTransport> {
    let name = select_port(cli, config)?;
    let baud = select_baud(cli, config);
    let serial = SerialConfig::new(&name, baud);
    let mut io = SerialTransport::open(&serial)
        .with_context(|| format!("Failed to open {name} at {baud} baud"))?;
    io.clear_input()?;
    debug!("Opened {name} at {baud} baud");
    Ok(io)
}
