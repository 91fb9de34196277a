mod api;
mod cli;
mod commands;
mod config;
mod confirm;
mod error;
mod filter;
mod local_tree;
mod model;
mod resolve;
mod runner;

use anyhow::Result;
use clap::Parser;
use commands::Outcome;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli::run(args).await? {
        Outcome::Completed | Outcome::Declined | Outcome::NothingToDo => Ok(()),
    }
}
