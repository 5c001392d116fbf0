mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use imagepipe::api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => api::run(args.address, !args.no_processor).await?,
    }

    Ok(())
}
