//! LeadScout CLI: website in, enriched leads out.
//!
//! Runs the whole prospecting pipeline from the terminal, or starts the
//! step-by-step web API.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // Secrets may live in a local .env; it is optional.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
