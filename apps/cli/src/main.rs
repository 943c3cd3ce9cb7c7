//! Code Check CLI: sign-code research for street addresses.
//!
//! Researches municipal sign regulations section by section, either
//! synchronously or as persisted jobs processed by a background worker.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
