//! Unified switchyard CLI.
//!
//! - `switchyard check` - Load, validate and build a configuration
//! - `switchyard match` - Route one connection descriptor (dry run)
//! - `switchyard run` - Keep providers fresh and reload on SIGHUP
//!
//! The router can also be run as the standalone `switchyard-router` binary.

use std::process::ExitCode;

use clap::Parser;
use switchyard_router::cli::{self, RouterCommand};

/// Switchyard unified CLI.
#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Rule-based connection routing engine",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: RouterCommand,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = cli::run(cli::RouterArgs {
        command: cli.command,
    })
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
