use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "sitegeo")]
#[command(about = "Resolve, search and export licensing site geometry")]
pub struct CliConfig {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the canonical geometry of every site as a FeatureCollection.
    Resolve(SitesArgs),
    /// Report reference areas near the sites, per dataset.
    Search {
        #[command(flatten)]
        sites: SitesArgs,
        #[arg(long = "dataset", required = true)]
        datasets: Vec<String>,
    },
    /// Print the ring payload for the downstream planning system.
    Export {
        #[command(flatten)]
        sites: SitesArgs,
        /// Overrides `[export] wkid`.
        #[arg(long)]
        wkid: Option<u32>,
    },
    /// Extract features from one uploaded file.
    Extract {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        format: String,
    },
    #[command(hide = true)]
    ParseWorker(WorkerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SitesArgs {
    /// JSON array of sites, or `-` for stdin.
    #[arg(long)]
    pub sites: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long)]
    pub format: String,
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub workdir: PathBuf,
    #[arg(long)]
    pub max_unpacked_bytes: u64,
}
