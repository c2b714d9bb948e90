//! Piecework CLI
//!
//! Parallel piece hashing and torrent creation

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use piecework_files::{
    Cancellation, DigestAlgorithm, FileSet, HashOptions, PoolConfig, WorkerPool, hash_files,
};
use piecework_meta::{
    FileLayout, Metainfo, TorrentCreator, default_created_by, verify_content_with,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use config::{Config, validate_piece_length};
use progress::{HashProgress, format_bytes, format_duration, format_speed};

/// Piecework - parallel piece hashing for torrent manifests
#[derive(Parser)]
#[command(name = "piecework")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file path (default: <config dir>/piecework/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a .torrent file for a file or directory
    Create {
        /// File or directory to hash
        #[arg(required = true)]
        path: PathBuf,

        /// Output file (default: <name>.torrent)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Piece length in bytes
        #[arg(long)]
        piece_length: Option<usize>,

        /// Hashing threads
        #[arg(long)]
        threads: Option<usize>,

        /// Tracker URL, one tier each (repeatable)
        #[arg(long)]
        announce: Vec<String>,

        /// Creating program recorded in the torrent
        #[arg(long)]
        created_by: Option<String>,
    },

    /// Print the piece digests of a file or directory
    Pieces {
        /// File or directory to hash
        #[arg(required = true)]
        path: PathBuf,

        /// Piece length in bytes
        #[arg(long)]
        piece_length: Option<usize>,

        /// Digest algorithm (sha1, blake3)
        #[arg(long, default_value = "sha1")]
        algorithm: DigestAlgorithm,

        /// Hashing threads
        #[arg(long)]
        threads: Option<usize>,

        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Check content on disk against a .torrent file
    Verify {
        /// Torrent file
        #[arg(required = true)]
        torrent: PathBuf,

        /// Content location (default: next to the torrent file)
        #[arg(long)]
        content: Option<PathBuf>,

        /// Hashing threads
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Show the contents of a .torrent file
    Info {
        /// Torrent file
        #[arg(required = true)]
        torrent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::resolve(cli.config.as_deref())?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Create {
            path,
            output,
            piece_length,
            threads,
            announce,
            created_by,
        } => {
            let request = CreateRequest {
                path,
                output,
                piece_length,
                threads,
                announce,
                created_by,
            };
            create_torrent(request, &config, cli.quiet).await?;
        }
        Commands::Pieces {
            path,
            piece_length,
            algorithm,
            threads,
            json,
        } => {
            print_pieces(path, piece_length, algorithm, threads, json, &config, cli.quiet).await?;
        }
        Commands::Verify {
            torrent,
            content,
            threads,
        } => {
            verify_torrent(torrent, content, threads, &config, cli.quiet).await?;
        }
        Commands::Info { torrent } => {
            show_info(&torrent)?;
        }
    }

    Ok(())
}

/// Run a hashing job off the async runtime; Ctrl-C cancels it
async fn run_blocking<T, F>(cancel: Cancellation, job: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(job);

    tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nCancelling...");
            cancel.cancel();
            handle.await?
        }
    }
}

fn progress_for(quiet: bool, total_bytes: u64, label: &str) -> HashProgress {
    if quiet {
        HashProgress::hidden()
    } else {
        HashProgress::new(total_bytes, label)
    }
}

fn pool_for(threads: Option<usize>, config: &Config) -> WorkerPool {
    WorkerPool::new(PoolConfig::with_workers(config.worker_count(threads)))
}

struct CreateRequest {
    path: PathBuf,
    output: Option<PathBuf>,
    piece_length: Option<usize>,
    threads: Option<usize>,
    announce: Vec<String>,
    created_by: Option<String>,
}

/// Hash a file or directory and write a .torrent for it
async fn create_torrent(request: CreateRequest, config: &Config, quiet: bool) -> anyhow::Result<()> {
    let piece_length = request.piece_length.unwrap_or(config.hashing.piece_length);
    validate_piece_length(piece_length)?;

    let files = FileSet::from_path(&request.path)?;
    let name = files.name();
    let output = request
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{name}.torrent")));

    let tiers: Vec<Vec<String>> = if request.announce.is_empty() {
        config.torrent.announce.clone()
    } else {
        request.announce.into_iter().map(|url| vec![url]).collect()
    };
    let created_by = request
        .created_by
        .or_else(|| config.torrent.created_by.clone())
        .unwrap_or_else(default_created_by);

    let pool = pool_for(request.threads, config);
    println!("Source: {}", request.path.display());
    println!("Size: {} in {} file(s)", format_bytes(files.total_len()), files.len());
    println!("Piece length: {}", format_bytes(piece_length as u64));
    println!("Threads: {}", pool.max_workers());

    let cancel = Cancellation::new();
    let progress = progress_for(quiet, files.total_len(), &name);
    let mut creator = TorrentCreator::new(&request.path)
        .piece_length(piece_length)
        .announce_tiers(&tiers)?
        .created_by(created_by)
        .pool(pool.clone())
        .cancellation(cancel.clone())
        .progress(progress.callback());
    if let Some(timeout) = config.timeout() {
        creator = creator.timeout(timeout);
    }

    let started = Instant::now();
    let outcome = run_blocking(cancel, move || Ok(creator.create()?)).await;
    pool.shutdown();
    let meta = match outcome {
        Ok(meta) => meta,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    let elapsed = started.elapsed();
    progress.finish_with_message(format!(
        "Hashed {} in {} ({})",
        format_bytes(files.total_len()),
        format_duration(elapsed),
        format_speed(files.total_len(), elapsed)
    ));

    meta.write_to(&output)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Pieces: {}", meta.piece_count());
    println!("Info hash: {}", meta.info_hash_hex());
    println!("Torrent written to: {}", output.display());

    Ok(())
}

#[derive(Serialize)]
struct PieceListing {
    name: String,
    algorithm: String,
    piece_length: usize,
    total_length: u64,
    pieces: Vec<String>,
}

/// Hash a file or directory and print one digest per piece
async fn print_pieces(
    path: PathBuf,
    piece_length: Option<usize>,
    algorithm: DigestAlgorithm,
    threads: Option<usize>,
    json: bool,
    config: &Config,
    quiet: bool,
) -> anyhow::Result<()> {
    let piece_length = piece_length.unwrap_or(config.hashing.piece_length);
    validate_piece_length(piece_length)?;

    let files = FileSet::from_path(&path)?;
    let pool = pool_for(threads, config);
    let cancel = Cancellation::new();
    let progress = progress_for(quiet || json, files.total_len(), &files.name());

    let mut options = HashOptions::default()
        .with_piece_length(piece_length)
        .with_algorithm(algorithm)
        .with_cancellation(cancel.clone())
        .with_progress(progress.callback());
    if let Some(timeout) = config.timeout() {
        options = options.with_timeout(timeout);
    }

    let listing_name = files.name();
    let total_length = files.total_len();
    let hashing = pool.clone();
    let outcome = run_blocking(cancel, move || Ok(hash_files(&files, &options, &hashing)?)).await;
    pool.shutdown();
    let digests = match outcome {
        Ok(digests) => digests,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    progress.finish_with_message(format!("Hashed {}", format_bytes(total_length)));

    let pieces: Vec<String> = digests.chunks_exact(algorithm.size()).map(hex::encode).collect();

    if json {
        let listing = PieceListing {
            name: listing_name,
            algorithm: algorithm.to_string(),
            piece_length,
            total_length,
            pieces,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for (index, digest) in pieces.iter().enumerate() {
            println!("{index:>8}  {digest}");
        }
    }

    Ok(())
}

/// Re-hash content and compare it with a .torrent file
async fn verify_torrent(
    torrent: PathBuf,
    content: Option<PathBuf>,
    threads: Option<usize>,
    config: &Config,
    quiet: bool,
) -> anyhow::Result<()> {
    let meta = Metainfo::read_from(&torrent)
        .with_context(|| format!("reading {}", torrent.display()))?;
    let content = content.unwrap_or_else(|| match torrent.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    });

    let pool = pool_for(threads, config);
    let cancel = Cancellation::new();
    let progress = progress_for(quiet, meta.total_length(), &meta.info.name);

    let mut options = HashOptions::default()
        .with_cancellation(cancel.clone())
        .with_progress(progress.callback());
    if let Some(timeout) = config.timeout() {
        options = options.with_timeout(timeout);
    }

    let name = meta.info.name.clone();
    let hashing = pool.clone();
    let outcome = run_blocking(cancel, move || {
        Ok(verify_content_with(&meta, &content, &hashing, options)?)
    })
    .await;
    pool.shutdown();
    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e);
        }
    };
    progress.finish_with_message(format!("Checked {}", format_bytes(report.total_length)));

    if report.is_complete() {
        println!("{name}: all {} pieces OK", report.pieces);
        Ok(())
    } else {
        for index in &report.mismatched {
            println!("piece {index}: mismatch");
        }
        anyhow::bail!(
            "{name}: {} of {} pieces failed verification",
            report.mismatched.len(),
            report.pieces
        );
    }
}

/// Print a summary of a .torrent file
fn show_info(torrent: &Path) -> anyhow::Result<()> {
    let meta = Metainfo::read_from(torrent)
        .with_context(|| format!("reading {}", torrent.display()))?;
    let info = &meta.info;

    println!("Name: {}", info.name);
    println!("Info hash: {}", meta.info_hash_hex());
    println!(
        "Size: {} ({} bytes)",
        format_bytes(meta.total_length()),
        meta.total_length()
    );
    println!("Piece length: {}", format_bytes(info.piece_length));
    println!("Pieces: {}", meta.piece_count());
    if let Some(created_by) = &meta.created_by {
        println!("Created by: {created_by}");
    }
    if let Some(date) = meta.creation_date {
        println!("Creation date: {date} (Unix time)");
    }

    let trackers = meta.trackers();
    if !trackers.is_empty() {
        println!();
        println!("Trackers:");
        for tracker in trackers {
            println!("  {tracker}");
        }
    }

    if let FileLayout::Multi { files } = &info.layout {
        println!();
        println!("Files:");
        for file in files {
            println!("  {} ({})", file.path.join("/"), format_bytes(file.length));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pieces_algorithm() {
        let cli = Cli::try_parse_from(["piecework", "pieces", "data", "--algorithm", "blake3", "--json"])
            .unwrap();
        let Commands::Pieces { algorithm, json, .. } = cli.command else {
            panic!("expected pieces command");
        };
        assert_eq!(algorithm, DigestAlgorithm::Blake3);
        assert!(json);

        assert!(Cli::try_parse_from(["piecework", "pieces", "data", "--algorithm", "md5"]).is_err());
    }

    #[test]
    fn test_parse_repeated_announce() {
        let cli = Cli::try_parse_from([
            "piecework",
            "create",
            "album",
            "--announce",
            "http://a.example/announce",
            "--announce",
            "udp://b.example:6969",
        ])
        .unwrap();
        let Commands::Create { announce, .. } = cli.command else {
            panic!("expected create command");
        };
        assert_eq!(announce.len(), 2);
    }
}
