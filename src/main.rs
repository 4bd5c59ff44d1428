//! dirtally - disk usage analyzer.
//!
//! Usage:
//!   dirtally scan PATH...         Scan and print a size tree
//!   dirtally extensions PATH...   Scan and print totals per file extension
//!   dirtally export PATH...       Export the scanned tree to JSON
//!   dirtally --help               Show help

use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dirtally_core::{ItemKind, ItemSnapshot, NO_EXTENSION};
use dirtally_scan::{ScanConfig, ScanEvent, ScanOutcome, ScanState, Scanner};

#[derive(Parser)]
#[command(
    name = "dirtally",
    version,
    about = "Find out where your disk space goes",
    long_about = "dirtally scans one or more roots into a size tree.\n\n\
                  Whole volumes are read from the file system's metadata index \
                  where possible; everything else is enumerated directory by directory."
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ScanArgs {
    /// Roots to scan
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// Enumerate directories even where a metadata index is available
    #[arg(long)]
    no_bulk: bool,

    /// Use the metadata index for roots that are not a whole volume
    #[arg(long, conflicts_with = "no_bulk")]
    bulk_subtrees: bool,

    /// Descend into directories mounted from other filesystems
    #[arg(long)]
    cross_filesystems: bool,

    /// Worker threads for the index walk (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Additional glob patterns to skip
    #[arg(short, long)]
    ignore: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and show a size tree
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Maximum depth to display
        #[arg(short, long, default_value = "3")]
        depth: u32,

        /// Number of top entries to show per directory
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },

    /// Scan and show totals per file extension
    Extensions {
        #[command(flatten)]
        scan: ScanArgs,

        /// Number of extensions to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },

    /// Export scan results to JSON
    Export {
        #[command(flatten)]
        scan: ScanArgs,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Scan { scan, depth, top } => run_scan(&scan, depth, top),
        Command::Extensions { scan, top } => run_extensions(&scan, top),
        Command::Export { scan, output } => run_export(&scan, output),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Scan the requested roots, showing progress on stderr.
fn scan(args: &ScanArgs) -> Result<(Scanner, ScanOutcome)> {
    let config = ScanConfig::builder()
        .roots(args.paths.clone())
        .use_bulk_index(!args.no_bulk)
        .bulk_for_subtrees(args.bulk_subtrees)
        .threads(args.threads)
        .cross_filesystems(args.cross_filesystems)
        .ignore_patterns(args.ignore.clone())
        .build()
        .map_err(|e| eyre!("Invalid scan configuration: {e}"))?;

    debug!(roots = ?config.roots, bulk = config.use_bulk_index, "starting scan");
    let scanner = Scanner::native(config).context("Failed to create scanner")?;
    let mut events = scanner.subscribe();
    scanner.scan_async(|_| {}).context("Failed to start scan")?;

    let mut stderr = std::io::stderr();
    loop {
        match events.blocking_recv() {
            Ok(ScanEvent::Progress(progress)) => {
                let done = progress
                    .fraction
                    .map(|f| format!(" ({:.0}%)", f * 100.0))
                    .unwrap_or_default();
                let _ = write!(
                    stderr,
                    "\rScanned {} files, {}{done}   ",
                    progress.files_scanned,
                    format_size(progress.bytes_scanned)
                );
                let _ = stderr.flush();
            }
            Ok(ScanEvent::Completed(_)) => break,
            Ok(ScanEvent::StateChanged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = writeln!(stderr);

    let outcome = scanner
        .wait()
        .ok_or_else(|| eyre!("Scan ended without a result"))?;
    match (outcome.state, &outcome.error) {
        (ScanState::Failed, Some(err)) => bail!("Scan failed: {err}"),
        (ScanState::Failed, None) => bail!("Scan failed"),
        _ => Ok((scanner, outcome)),
    }
}

fn print_summary(outcome: &ScanOutcome, root: &ItemSnapshot) {
    println!();
    println!("{}", "─".repeat(70));
    println!(" {} - {}", root.name, format_size(root.size));
    println!(
        " {} files, {} directories",
        root.file_count, root.subdir_count
    );
    println!(
        " Scanned in {:.2}s (validation {:.2}s)",
        outcome.scan_duration.as_secs_f64(),
        outcome.validate_duration.as_secs_f64()
    );
    println!("{}", "─".repeat(70));
    println!();
}

fn print_warnings(outcome: &ScanOutcome) {
    if !outcome.warnings.is_empty() {
        println!();
        println!("{} warning(s) during scan", outcome.warnings.len());
    }
}

/// Run a scan and display the size tree.
fn run_scan(args: &ScanArgs, depth: u32, top: usize) -> Result<()> {
    let (scanner, outcome) = scan(args)?;
    let tree = scanner.tree();
    let snapshot = tree
        .root()
        .and_then(|root| tree.snapshot(root))
        .ok_or_else(|| eyre!("Scan produced no tree"))?;

    print_summary(&outcome, &snapshot);
    print_node(&snapshot, 0, depth, top, snapshot.size);
    print_warnings(&outcome);

    Ok(())
}

/// Run a scan and display the extension totals.
fn run_extensions(args: &ScanArgs, top: usize) -> Result<()> {
    let (scanner, outcome) = scan(args)?;
    let tree = scanner.tree();
    let records = tree.ledger_snapshot();
    let total: u64 = records.iter().map(|r| r.size).sum();

    println!();
    println!(" {:<16} {:>10} {:>10} {:>6}", "Extension", "Size", "Files", "Share");
    println!("{}", "─".repeat(48));
    for record in records.iter().take(top) {
        let name = if record.extension == NO_EXTENSION {
            "(none)"
        } else {
            record.extension.as_str()
        };
        let share = if total > 0 {
            record.size as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        println!(
            " {:<16} {:>10} {:>10} {:>5.1}%",
            truncate(name, 16),
            format_size(record.size),
            record.file_count,
            share
        );
    }
    if records.len() > top {
        println!("  ... and {} more", records.len() - top);
    }
    print_warnings(&outcome);

    Ok(())
}

/// Export scan results to JSON.
fn run_export(args: &ScanArgs, output: Option<PathBuf>) -> Result<()> {
    let (scanner, _) = scan(args)?;
    let tree = scanner.tree();
    let snapshot = tree
        .root()
        .and_then(|root| tree.snapshot(root))
        .ok_or_else(|| eyre!("Scan produced no tree"))?;

    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

/// Print an item and its largest children.
fn print_node(node: &ItemSnapshot, depth: u32, max_depth: u32, top_n: usize, root_size: u64) {
    let indent = "  ".repeat(depth as usize);
    let ratio = if root_size > 0 {
        node.size as f64 / root_size as f64 * 100.0
    } else {
        0.0
    };

    let is_container = node.kind.is_container();
    let name = match node.kind {
        ItemKind::Directory | ItemKind::Volume => format!("{}/", node.name),
        _ => node.name.to_string(),
    };

    println!(
        "{}{}{:<40} {:>10} {:>5.1}% {} {}",
        indent,
        if is_container { "▼ " } else { "  " },
        truncate(&name, 40),
        format_size(node.size),
        ratio,
        make_bar(ratio / 100.0, 10),
        format_time(node.last_modified)
    );

    if is_container && depth < max_depth {
        let remaining = node.children.len().saturating_sub(top_n);
        for child in node.children.iter().take(top_n) {
            print_node(child, depth + 1, max_depth, top_n, root_size);
        }

        if remaining > 0 {
            let indent = "  ".repeat((depth + 1) as usize);
            println!("{}  ... and {} more", indent, remaining);
        }
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = (ratio * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Format a modification time in local time.
fn format_time(time: SystemTime) -> String {
    if time == SystemTime::UNIX_EPOCH {
        return String::new();
    }
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}
