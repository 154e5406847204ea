//! Invoice validation-and-audit pipeline CLI.
//!
//! `pipeline run` validates every invoice found in an input folder and
//! publishes a run bundle under the output folder; `pipeline rules` checks a
//! rule file without running.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use pipeline::exit_codes;
use pipeline::io::config::{DEFAULT_RULES_PATH, load_ruleset};
use pipeline::logging;
use pipeline::run::{RunOptions, execute_run};

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Deterministic invoice validation and audit pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the input folder and publish a bundle under the output folder.
    Run {
        /// Folder containing PDFs (with extraction sidecars) and Smartsheet CSVs.
        #[arg(long)]
        input: PathBuf,
        /// Folder receiving one bundle directory per run.
        #[arg(long)]
        output: PathBuf,
        /// Rule file (TOML).
        #[arg(long, default_value = DEFAULT_RULES_PATH)]
        rules: PathBuf,
    },
    /// Load and validate the rule file, then print a summary.
    Rules {
        #[arg(long, default_value = DEFAULT_RULES_PATH)]
        rules: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            input,
            output,
            rules,
        } => cmd_run(RunOptions {
            input,
            output,
            rules,
        }),
        Command::Rules { rules } => match cmd_rules(&rules) {
            Ok(()) => exit_codes::OK,
            Err(err) => {
                eprintln!("{:#}", err);
                exit_codes::INVALID
            }
        },
    };
    std::process::exit(code);
}

fn cmd_run(options: RunOptions) -> i32 {
    match execute_run(&options) {
        Ok(summary) => {
            println!(
                "run: run_id={} valid={} exceptions={} sources={} bundle={}",
                summary.run_id,
                summary.valid_count,
                summary.exception_count,
                summary.source_count,
                summary.bundle.dir.display()
            );
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{:#}", err);
            err.exit_code()
        }
    }
}

fn cmd_rules(path: &Path) -> Result<()> {
    let loaded = load_ruleset(path)?;
    let rules = &loaded.rules;
    println!("rules: version={} sha256={}", rules.version, loaded.info.sha256);
    println!(
        "rules: suppliers={} vat_codes={} works_types={} extraction_profiles={}",
        rules.suppliers.len(),
        rules.vat.rules.len(),
        rules.works_types.rules.len(),
        loaded.extractor.profiles().len()
    );
    let order: Vec<String> = rules
        .settings
        .check_order
        .iter()
        .map(ToString::to_string)
        .collect();
    println!("rules: check_order={}", order.join(","));
    Ok(())
}
