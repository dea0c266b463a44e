//! Application entry point.
//!
//! Parses command-line arguments and delegates execution to [`runner::run`].
//! When a launched tool fails, its exit status becomes ours.

use clap::Parser;
use enclave_test::{cli::Cli, config::ConfigError, runner};
use miette::{Diagnostic, GraphicalReportHandler};
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    fmt()
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
    match runner::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(diagnostic) = err.downcast_ref::<ConfigError>() {
                report_diagnostic(diagnostic);
            }
            tracing::error!("{err:#}");
            let code = err
                .downcast_ref::<runner::RunnerError>()
                .map_or(1, runner::RunnerError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn report_diagnostic(diagnostic: &dyn Diagnostic) {
    let mut rendered = String::new();
    if GraphicalReportHandler::new()
        .render_report(&mut rendered, diagnostic)
        .is_ok()
    {
        if let Err(err) = io::stderr().lock().write_all(rendered.as_bytes()) {
            tracing::warn!("failed to write diagnostic: {err}");
        }
    }
}
