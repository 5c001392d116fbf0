use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "imagepipe")]
#[command(about = "Product photo image-pipeline service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API (webhook ingress + job management); starts the
    /// background processor alongside it unless --no-processor is given.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the API server to. Overrides `server.bind_addr`.
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Don't start the background processor in-process.
    #[arg(long)]
    pub no_processor: bool,
}
