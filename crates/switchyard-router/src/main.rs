//! Switchyard router standalone binary.

use clap::Parser;
use switchyard_router::{RouterArgs, cli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RouterArgs::parse();
    cli::run(args).await
}
