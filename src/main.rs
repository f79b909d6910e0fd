use clap::Parser;
use fluxnet_processor::cli::{run, Cli};
use fluxnet_processor::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
