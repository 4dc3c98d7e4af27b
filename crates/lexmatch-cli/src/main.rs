mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use lexmatch_core::LexMatchError;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let operation = commands::operation_name(&cli.command);
    match commands::run_from_root(&cli.root, cli.config.as_deref(), cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(operation, &err);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable JSON.
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Core failures are reported as a structured payload; anything else as text.
fn report_error(operation: &str, err: &anyhow::Error) {
    let Some(core_err) = err.downcast_ref::<LexMatchError>() else {
        eprintln!("error: {err:#}");
        return;
    };
    let mut payload = core_err.to_payload(operation);
    payload.message = format!("{err:#}");
    match serde_json::to_string_pretty(&payload) {
        Ok(raw) => eprintln!("{raw}"),
        Err(_) => eprintln!("error: {err:#}"),
    }
}
