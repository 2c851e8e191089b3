#![recursion_limit = "256"]

#[macro_use]
mod infra;
mod cli;
mod application;
mod domain;
mod data;
mod ml;

use anyhow::Result;
use cli::Cli;
use clap::Parser;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("train_recipes=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    cli.run()
}
