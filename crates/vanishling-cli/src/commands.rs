use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use tracing::{error, info};
use vanishling_crypto::KeyedHasher;
use vanishling_journal::{Journal, JournalScan};
use vanishling_reaper::{Compaction, PassReport, Reaper};
use vanishling_server::{VanishlingConfig, VanishlingServer};
use vanishling_store::ContentStore;
use vanishling_types::{format_timestamp, format_ttl, Clock, FileId, SystemClock};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::Reap => cmd_reap(&config, cli.format),
        Command::Pending => cmd_pending(&config, cli.format),
        Command::Orphans(args) => cmd_orphans(&config, args, cli.format),
    }
}

/// Defaults, then the config file, then flags and environment.
fn resolve_config(cli: &Cli) -> anyhow::Result<VanishlingConfig> {
    let mut config = match &cli.config {
        Some(path) => VanishlingConfig::load(path)?,
        None => VanishlingConfig::default(),
    };
    if let Some(root) = &cli.storage_root {
        config.storage_root = root.clone();
    }
    if let Some(root) = &cli.journal_root {
        config.journal_root = root.clone();
    }
    if let Command::Serve(ServeArgs { listen_addr: Some(addr) }) = &cli.command {
        config.listen_addr = *addr;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &VanishlingConfig) -> anyhow::Result<ContentStore> {
    ContentStore::open(&config.storage_root, KeyedHasher::new(config.hash_key()?))
        .with_context(|| format!("cannot open storage root {}", config.storage_root.display()))
}

fn open_journal(config: &VanishlingConfig) -> anyhow::Result<Arc<Journal>> {
    let journal = Journal::open(&config.journal_root)
        .with_context(|| format!("cannot open journal root {}", config.journal_root.display()))?;
    Ok(Arc::new(journal))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_serve(config: VanishlingConfig, _args: ServeArgs) -> anyhow::Result<()> {
    let server = VanishlingServer::new(config).context("failed to start vanishling")?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve(shutdown_signal()))?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn run_reaper_pass(config: &VanishlingConfig) -> anyhow::Result<PassReport> {
    let store = open_store(config)?;
    let journal = open_journal(config)?;
    let reaper = Reaper::new(journal, config.reaper_config(store.root()));
    Ok(reaper.run_pass())
}

fn cmd_reap(config: &VanishlingConfig, format: OutputFormat) -> anyhow::Result<()> {
    let report = run_reaper_pass(config)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!(
        "{} Reaper pass: {} scanned, {} deleted",
        "✓".green().bold(),
        report.scanned.to_string().bold(),
        report.deleted.to_string().green()
    );
    println!(
        "  pending: {}  already gone: {}  failed: {}  foreign: {}  malformed: {}",
        report.not_due, report.missing, report.failed, report.foreign, report.malformed
    );
    match report.compaction {
        Some(Compaction::Truncated { before_bytes }) => {
            println!("  journal truncated ({} bytes dropped)", before_bytes.to_string().yellow())
        }
        Some(Compaction::Rewritten { before_bytes, after_bytes, kept, dropped }) => println!(
            "  journal rewritten: {before_bytes} -> {after_bytes} bytes, kept {kept}, dropped {dropped}"
        ),
        None => {}
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum EntryStatus {
    Pending,
    Due,
    Gone,
}

#[derive(Debug, Serialize)]
struct PendingRow {
    path: String,
    expires_at: String,
    ttl: String,
    status: EntryStatus,
}

#[derive(Debug, Serialize)]
struct PendingListing {
    entries: Vec<PendingRow>,
    malformed: usize,
}

fn pending_listing(scan: &JournalScan, now: chrono::DateTime<chrono::Utc>) -> PendingListing {
    let entries = scan
        .entries
        .iter()
        .map(|entry| PendingRow {
            path: entry.path.display().to_string(),
            expires_at: format_timestamp(entry.expires_at),
            ttl: format_ttl(entry.ttl),
            status: if !entry.path.exists() {
                EntryStatus::Gone
            } else if entry.is_due(now) {
                EntryStatus::Due
            } else {
                EntryStatus::Pending
            },
        })
        .collect();
    PendingListing {
        entries,
        malformed: scan.malformed,
    }
}

fn cmd_pending(config: &VanishlingConfig, format: OutputFormat) -> anyhow::Result<()> {
    let journal = open_journal(config)?;
    let listing = pending_listing(&journal.read_all()?, SystemClock.now());
    if format == OutputFormat::Json {
        return print_json(&listing);
    }

    if listing.entries.is_empty() {
        println!("Journal is empty.");
    }
    for row in &listing.entries {
        let status = match row.status {
            EntryStatus::Pending => "pending".green(),
            EntryStatus::Due => "due".yellow(),
            EntryStatus::Gone => "gone".dimmed(),
        };
        println!("{:>8}  {}  {:>8}  {}", status, row.expires_at.cyan(), row.ttl, row.path);
    }
    if listing.malformed > 0 {
        println!("{} {} malformed line(s) skipped", "!".red().bold(), listing.malformed);
    }
    Ok(())
}

/// Stored objects with no journal entry pointing at them.
fn find_orphans(store: &ContentStore, scan: &JournalScan) -> anyhow::Result<Vec<FileId>> {
    let referenced: HashSet<&Path> = scan.entries.iter().map(|e| e.path.as_path()).collect();
    Ok(store
        .list()?
        .into_iter()
        .filter(|id| !referenced.contains(store.path_of(id).as_path()))
        .collect())
}

fn cmd_orphans(config: &VanishlingConfig, args: OrphansArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let journal = open_journal(config)?;
    let orphans = find_orphans(&store, &journal.read_all()?)?;

    let mut removed = 0;
    if args.delete {
        for id in &orphans {
            if store.remove(id)? {
                info!(file_id = %id, "orphan removed");
                removed += 1;
            }
        }
    }

    if format == OutputFormat::Json {
        let ids: Vec<&str> = orphans.iter().map(FileId::as_str).collect();
        return print_json(&serde_json::json!({ "orphans": ids, "removed": removed }));
    }

    if orphans.is_empty() {
        println!("{} No orphaned objects.", "✓".green().bold());
        return Ok(());
    }
    for id in &orphans {
        println!("  {} {}", "orphan:".yellow(), id);
    }
    if args.delete {
        println!("{} Removed {} object(s).", "✓".green(), removed);
    } else {
        println!("{} orphaned object(s); rerun with --delete to remove them.", orphans.len());
    }
    Ok(())
}
