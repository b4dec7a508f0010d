use anyhow::Result;
use clap::Parser;
use tutorledger::cli::Cli;
use tutorledger::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(if cli.verbose { "debug" } else { "info" });
    cli.run().await
}
