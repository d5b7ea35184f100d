mod application;
mod presentation;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use presentation::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // No cleanup: a partial container or uncommitted rows are left for the
    // next run to resume or discard.
    if let Err(e) = ctrlc::set_handler(|| {
        eprintln!("SIGINT or CTRL-C detected. Exiting.");
        std::process::exit(1);
    }) {
        error!("could not install interrupt handler: {e}");
    }

    match application::run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
