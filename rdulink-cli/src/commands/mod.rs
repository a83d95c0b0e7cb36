//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod convert;
pub(crate) mod info;
pub(crate) mod receive;
pub(crate) mod send;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Fail with a cancellation if Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        return Err(CliError::Cancelled("Interrupted by user".into()).into());
    }
    Ok(())
}

/// A progress bar on stderr, hidden in quiet mode or without a terminal.
pub(crate) fn progress_bar(cli: &Cli, len: u64, unit: &str) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
            ))
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
