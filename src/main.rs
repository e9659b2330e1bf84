use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use orgboard::config::{AppConfig, DEFAULT_CONFIG_FILE};
use orgboard::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "orgboard")]
#[command(version, about = "Multi-tenant Kanban boards and wiki for organizations")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "ORGBOARD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Enable dev mode (permissive CORS for a separately served frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Print a board's metrics and, when configured, an AI summary
    Summary {
        /// Board id
        #[arg(long)]
        board: i64,
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default orgboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_layered(&cli.config)?;
    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: {:#}; continuing without logging", e);
            None
        }
    };

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(
                &config,
                cmd::ServeOverrides {
                    host,
                    port,
                    db_path,
                    dev,
                },
            )
            .await?;
        }
        Commands::InitDb { db_path } => {
            let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
            cmd::cmd_init_db(&db_path)?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command)?,
        Commands::Summary { board, db_path } => {
            let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
            cmd::cmd_summary(&config, &db_path, board).await?;
        }
    }

    Ok(())
}
