use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vanishling",
    about = "Ephemeral file drop: uploads vanish when their time-to-live runs out",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "VANISHLING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding uploaded objects
    #[arg(long, global = true, env = "VANISHLING_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Directory holding the expiry journal
    #[arg(long, global = true, env = "VANISHLING_JOURNAL_ROOT")]
    pub journal_root: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP service and the reaper
    Serve(ServeArgs),
    /// Run one reaper pass and exit
    Reap,
    /// List journal entries and whether they are still pending
    Pending,
    /// Find stored objects that no journal entry will ever expire
    Orphans(OrphansArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "VANISHLING_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,
}

#[derive(Args)]
pub struct OrphansArgs {
    /// Remove the orphaned objects
    #[arg(long)]
    pub delete: bool,
}
