use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pageforge::config::ServiceConfig;
use pageforge::logging::init_tracing;

mod cmd;

#[derive(Parser)]
#[command(name = "pageforge")]
#[command(version, about = "Turn a task brief into a published static web app")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML config file. Defaults to ./pageforge.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides HOST and the config file)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides PORT and the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect or prune the synthesis cache
    Cache {
        /// Cache directory (overrides CACHE_DIR and the config file)
        #[arg(long, global = true)]
        cache_dir: Option<PathBuf>,

        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Print the repository name for a task id and round
    Name {
        task_id: String,
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        round: u32,
    },
}

#[derive(Subcommand, Clone)]
pub enum CacheCommands {
    /// Show entry counts and size
    Info,
    /// Delete every expired entry
    ClearExpired,
    /// Delete one entry by key (a repository name such as demo-r1)
    Delete { key: String },
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    ServiceConfig::load(cli.config.as_deref()).context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Name { task_id, round } => cmd::cmd_name(task_id, *round),
        Commands::Serve { host, port } => {
            let config = load_config(&cli)?;
            let _guard = init_tracing(&config.logging, cli.verbose)?;
            cmd::cmd_serve(config, host.clone(), *port).await
        }
        Commands::Cache { cache_dir, command } => {
            let mut config = load_config(&cli)?;
            config.logging.directory = None;
            let _guard = init_tracing(&config.logging, cli.verbose)?;
            if let Some(dir) = cache_dir {
                config.cache.dir = dir.clone();
            }
            cmd::cmd_cache(&config, command).await
        }
    }
}
