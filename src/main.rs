// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code, unused_imports)]

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod acquisition;
mod cli;
mod events;
mod scheduler;

#[derive(Parser)]
#[command(
    name = "trawl",
    about = "Trawl — adaptive scraping scheduler for web data extraction",
    version,
    after_help = "Run 'trawl <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a batch of URLs through the adaptive scheduler
    Fetch(cli::fetch_cmd::FetchArgs),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "trawl=debug" } else { "trawl=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Fetch(fetch_args) => {
            cli::fetch_cmd::run(fetch_args, args.json, args.quiet).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "trawl", &mut std::io::stdout());
            Ok(())
        }
    }
}
