//! gridwatch binary entry point.
//!
//! Parses CLI arguments and either watches the instrument or runs a
//! one-shot command.

use clap::Parser;
use gridwatch::cli::{exit_code_for_error, Cli, Commands, Exit};
use gridwatch::config::Config;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => Exit::Ok.into(),
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            eprintln!("gridwatch: {:#}", e);
            exit_code_for_error(&e).into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli)?;

    match cli.command {
        Some(Commands::Runs { json }) => gridwatch::cli::runs::run(&config, json),
        None => {
            // Held until exit so buffered log lines are flushed
            let _guard = gridwatch::logging::init(&config.logging, &config.log_file())?;
            gridwatch::agent::run(config).await
        }
    }
}
