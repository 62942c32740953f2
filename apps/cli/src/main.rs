//! finsource CLI: find official financial disclosure URLs for a list of
//! companies with a search model, a judge model, and prompt refinement.

mod commands;
mod input;

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
