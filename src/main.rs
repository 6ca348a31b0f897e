//! # API Harness CLI (`apih`)
//!
//! Discovers APIs in documentation with generative AI, then configures and
//! executes the discovered endpoints.
//!
//! ## Usage
//!
//! ```bash
//! apih --config ./config/apih.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `apih init` | Create the SQLite database and run schema migrations |
//! | `apih serve` | Start the HTTP server |
//! | `apih analyze <path>` | Ingest a document and wait for its catalog |
//! | `apih apis <document_id>` | List discovered APIs and endpoints |
//! | `apih configure <api_id> key=value...` | Save credentials for an API |
//! | `apih execute <api_id> <endpoint_id>` | Call one endpoint |
//! | `apih auto-execute <api_id>` | Call every endpoint with token chaining |
//!
//! Log verbosity follows `RUST_LOG` (default `api_harness=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api_harness::commands;
use api_harness::config;
use api_harness::inference::InferenceSettings;
use api_harness::migrate;
use api_harness::server;

/// API Harness: AI-driven API discovery and execution.
#[derive(Parser)]
#[command(
    name = "apih",
    about = "API Harness: discover APIs in documentation and execute them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/apih.toml`. When the file is missing, built-in
    /// defaults are used.
    #[arg(long, global = true, default_value = "./config/apih.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Ingest a document and wait for the analysis to finish.
    Analyze {
        /// Document to analyze (Markdown, text, JSON, YAML, PDF, DOCX).
        path: PathBuf,

        /// Project the document belongs to.
        #[arg(long, default_value = "default")]
        project: String,

        /// Inference provider (`gemini` or `openai`).
        #[arg(long)]
        provider: Option<String>,

        /// Model identifier; defaults to the provider's configured model.
        #[arg(long)]
        model: Option<String>,
    },

    /// List the APIs and endpoints discovered in a document.
    Apis {
        document_id: String,
    },

    /// Save credentials for an API (`key=value` or `key:=json`).
    Configure {
        api_id: String,

        #[arg(required = true)]
        credentials: Vec<String>,
    },

    /// Execute one endpoint.
    Execute {
        api_id: String,
        endpoint_id: String,

        /// Parameter as `key=value` or `key:=json`. Repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Execute every endpoint of an auto-executable API in order.
    AutoExecute {
        api_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "api_harness=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
        config::Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            path,
            project,
            provider,
            model,
        } => {
            let settings = InferenceSettings { provider, model };
            commands::run_analyze(&cfg, &path, &project, settings).await?;
        }
        Commands::Apis { document_id } => {
            commands::run_apis(&cfg, &document_id).await?;
        }
        Commands::Configure {
            api_id,
            credentials,
        } => {
            commands::run_configure(&cfg, &api_id, &credentials).await?;
        }
        Commands::Execute {
            api_id,
            endpoint_id,
            params,
        } => {
            commands::run_execute(&cfg, &api_id, &endpoint_id, &params).await?;
        }
        Commands::AutoExecute { api_id } => {
            commands::run_auto_execute(&cfg, &api_id).await?;
        }
    }

    Ok(())
}
