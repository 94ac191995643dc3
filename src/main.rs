//! Pair sniper - buys into new constant-product AMM pairs and manages the exits
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Most freshly listed tokens go to zero (rug pulls, honeypots, abandonment).
//! - Other bots compete for the same blocks.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pair_sniper::cli::commands;
use pair_sniper::config::Config;

/// Pair sniper - buys new AMM pairs and sells them at a profit
#[derive(Parser)]
#[command(name = "ape")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "APE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor and the pair watcher
    Start {
        /// Log new pairs without buying
        #[arg(long)]
        dry_run: bool,
    },

    /// Sell open positions at market
    Dump {
        /// Only dump the position in this pair
        #[arg(long, value_name = "PAIR")]
        single: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show stored positions and P&L
    Status,

    /// Show current configuration (secrets masked)
    Config,

    /// Create an empty position store
    InitStore,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pair_sniper=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded configuration from {}", cli.config);

    // Execute command
    let result = match cli.command {
        Commands::Start { dry_run } => commands::start(&config, dry_run).await,
        Commands::Dump { single, force } => commands::dump(&config, single.as_deref(), force).await,
        Commands::Status => commands::status(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::InitStore => commands::init_store(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
