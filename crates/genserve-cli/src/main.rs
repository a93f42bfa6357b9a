//! `genserve` entry point.

use clap::Parser;

use genserve_cli::{Cli, init_tracing, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so env fallbacks see it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_level)?;

    run(cli).await
}
