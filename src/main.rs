//! ModelDepot CLI
//!
//! Browse the model catalog, download and verify model files, manage the local store.
//!
//! Commands:
//!   catalog  - List models available for download
//!   download - Download a model (Ctrl-C cancels)
//!   list     - List downloaded models
//!   delete   - Delete a downloaded model
//!   import   - Import a model file from disk
//!   activate - Mark a model as the active one
//!   storage  - Show storage usage
//!   cleanup  - Remove leftover partial downloads
//!   serve    - Start HTTP server
//!   config   - Show or create the config file

mod commands;
mod server;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modeldepot::{Config, ModelDepot};
use utils::expand_path;

#[derive(Parser)]
#[command(name = "modeldepot")]
#[command(about = "Download, verify and manage local LLM model files")]
#[command(version)]
struct Cli {
    /// Root directory for models and catalog cache (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List models available for download
    Catalog {
        /// Only show models carrying this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Ignore the cached catalog and fetch from the network
        #[arg(short, long)]
        refresh: bool,
    },

    /// Download a model from the catalog
    Download {
        /// Catalog model id (see 'modeldepot catalog')
        model_id: String,
    },

    /// List downloaded models
    List,

    /// Delete a downloaded model
    Delete {
        /// Local model id (see 'modeldepot list')
        model_id: String,
    },

    /// Import a model file from disk
    Import {
        /// Path to the model file
        path: PathBuf,

        /// Name to store it under (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Mark a downloaded model as active
    Activate {
        model_id: String,
    },

    /// Show storage usage
    Storage,

    /// Remove leftover partial downloads
    Cleanup,

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8010")]
        port: u16,
    },

    /// Show the config file, or create it with defaults
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, Some(Commands::Serve { .. }));
    init_logging(if serving { "info" } else { "warn" });

    let mut config = Config::load_or_default()?;
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(expand_path(dir));
    }
    let depot = ModelDepot::new(config)?;

    match cli.command {
        None | Some(Commands::List) => {
            commands::run_list(&depot).await?;
        }

        Some(Commands::Catalog { tag, refresh }) => {
            commands::run_catalog(&depot, tag.as_deref(), refresh).await?;
        }

        Some(Commands::Download { model_id }) => {
            commands::run_download(&depot, &model_id).await?;
        }

        Some(Commands::Delete { model_id }) => {
            commands::run_delete(&depot, &model_id).await?;
        }

        Some(Commands::Import { path, name }) => {
            commands::run_import(&depot, &path, name.as_deref()).await?;
        }

        Some(Commands::Activate { model_id }) => {
            commands::run_activate(&depot, &model_id).await?;
        }

        Some(Commands::Storage) => {
            commands::run_storage(&depot).await?;
        }

        Some(Commands::Cleanup) => {
            commands::run_cleanup(&depot).await?;
        }

        Some(Commands::Serve { port }) => {
            println!("Starting server on http://localhost:{}...", port);
            server::run_server(Arc::new(depot), port).await?;
        }

        Some(Commands::Config { init }) => {
            commands::run_config(init)?;
        }
    }

    Ok(())
}
