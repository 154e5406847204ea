//! Bundle auditor CLI.
//!
//! Re-verifies published pipeline bundles from their files alone: artifact
//! digests, counts, the valid/exception partition, totals and, given the
//! input folder, source-document hashes.

mod bundle;
mod cli;
mod compare;
mod exit_codes;
mod verify;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "audit", version, about = "Re-verify published invoice run bundles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one bundle's digests, counts, partition and totals
    Verify {
        /// Bundle directory (`<output>/<run id>`)
        bundle: PathBuf,

        /// Input folder of the run; re-hashes every manifest source
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Byte-compare the deterministic artifacts of two bundles
    Compare { left: PathBuf, right: PathBuf },

    /// List bundles in an output folder
    List { output: PathBuf },
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli.command) {
        Ok(0) => exit_codes::OK,
        Ok(_) => exit_codes::FINDINGS,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Commands) -> Result<usize> {
    match command {
        Commands::Verify { bundle, input } => cli::verify_bundle(&bundle, input.as_deref()),
        Commands::Compare { left, right } => cli::compare_bundles(&left, &right),
        Commands::List { output } => cli::list_bundles(&output),
    }
}
