//! Build automation tasks for Piecework
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

const FUZZ_TARGETS: &[&str] = &["fuzz_bencode_decode", "fuzz_metainfo_parse"];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Piecework build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the hashing benchmarks
    Bench {
        /// Only run benchmarks whose name contains this filter
        filter: Option<String>,
    },

    /// Run every fuzz target for a fixed time (requires cargo-fuzz and nightly)
    Fuzz {
        /// Seconds per target
        #[arg(long, default_value = "60")]
        seconds: u64,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench { filter } => {
            let mut args = vec!["bench", "-p", "piecework-files"];
            if let Some(filter) = filter.as_deref() {
                args.extend(["--", filter]);
            }
            run_command("cargo", &args)?;
        }
        Commands::Fuzz { seconds } => {
            let max_time = format!("-max_total_time={seconds}");
            for target in FUZZ_TARGETS {
                println!("Fuzzing {target} for {seconds}s...");
                run_command(
                    "cargo",
                    &["+nightly", "fuzz", "run", "--fuzz-dir", "fuzz", target, "--", &max_time],
                )?;
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
