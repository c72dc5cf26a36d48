//! casedex: incremental vector-index synchronization daemon for case search

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

use casedex::config::{init_tracing, Config};
use casedex::daemon::{Components, Daemon};

#[derive(Parser)]
#[command(name = "casedex")]
#[command(about = "Incremental vector-index synchronization for case search")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "casedex.toml")]
    config: PathBuf,

    /// Data directory override
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler, health monitor, HTTP API)
    Start,
    /// Run one synchronization pass and exit
    Sync,
    /// Search the index for similar cases
    Search {
        /// Query text
        query: String,
        /// Number of results
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        /// Minimum similarity (overrides the configured threshold)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Show sync state and index statistics
    Status,
    /// Manage index backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups, newest first
    List,
    /// Create a backup of the current index pair
    Create {
        /// Backup description
        #[arg(short = 'm', long, default_value = "Manual backup")]
        description: String,
    },
    /// Restore a backup over the live index
    Restore {
        /// Backup id, e.g. 20240315_120000
        backup_id: String,
    },
    /// Delete a backup
    Delete {
        /// Backup id
        backup_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }

    init_tracing(&config.logging);

    match cli.command {
        Commands::Start => {
            let daemon = Daemon::start(config)?;
            daemon.run().await?;
        }
        Commands::Sync => {
            let components = one_shot(&config)?;
            info!("Running one synchronization pass");
            let outcome = components.engine.run().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            let components = one_shot(&config)?;
            let results = components.index.search(&query, top_k, threshold).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Status => {
            let components = one_shot(&config)?;
            let status = serde_json::json!({
                "sync": components.engine.state(),
                "index": components.index.stats(),
                "jobs": components.scheduler.list_jobs(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Backup { command } => {
            let components = one_shot(&config)?;
            match command {
                BackupCommands::List => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&components.backups.list())?
                    );
                }
                BackupCommands::Create { description } => {
                    let backup_id = components.backups.create(
                        components.index.index_path(),
                        components.index.metadata_path(),
                        &description,
                    )?;
                    println!("Created backup {}", backup_id);
                }
                BackupCommands::Restore { backup_id } => {
                    components.engine.restore_backup(&backup_id).await?;
                    println!("Restored backup {}", backup_id);
                }
                BackupCommands::Delete { backup_id } => {
                    components.backups.delete(&backup_id)?;
                    println!("Deleted backup {}", backup_id);
                }
            }
        }
    }

    Ok(())
}

/// Wire components for a one-shot command without starting any loops
fn one_shot(config: &Config) -> Result<Components> {
    let (shutdown_tx, _) = broadcast::channel(1);
    Components::init(config, shutdown_tx)
}
