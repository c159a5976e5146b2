#![forbid(unsafe_code)]

//! shs — Shai-Hulud scanner CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        if !matches!(e, cli_app::CliError::FindingsDetected(_)) {
            eprintln!("shs: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
