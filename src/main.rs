//! Liquidity Watch - wallet reconciliation and alerting for a simulated
//! Solana liquidity manager
//!
//! Devnet only. Wallet secret keys are stored unencrypted in the data
//! directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use liquidity_watch::cli::commands;
use liquidity_watch::config::Config;

/// Liquidity Watch - wallet reconciliation and alerting
#[derive(Parser)]
#[command(name = "lpwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation daemon
    Run,

    /// Reconcile wallets once
    Reconcile {
        /// Only this owner (default: every owner)
        owner: Option<String>,
    },

    /// Request faucet funds for an owner
    Faucet {
        /// Owner id
        owner: String,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC endpoints and the wallet store
    Health,

    /// Wallet management commands
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Simulated liquidity positions
    Liquidity {
        #[command(subcommand)]
        action: LiquidityAction,
    },
}

#[derive(Subcommand)]
enum WalletAction {
    /// Generate a new wallet for an owner
    Create {
        /// Owner id
        owner: String,

        /// Replace an existing wallet
        #[arg(long)]
        force: bool,
    },

    /// Import a base58-encoded 64-byte secret key
    Import {
        /// Owner id
        owner: String,

        /// Base58 secret key
        #[arg(long, env = "LPWATCH_IMPORT_KEY", hide_env_values = true)]
        secret_key: String,
    },

    /// Show an owner's wallet and last snapshot
    Show {
        /// Owner id
        owner: String,

        /// Also print the secret key
        #[arg(long)]
        reveal: bool,
    },

    /// List all registered wallets
    List,

    /// Delete an owner's wallet
    Remove {
        /// Owner id
        owner: String,
    },
}

#[derive(Subcommand)]
enum LiquidityAction {
    /// Add liquidity to a pool over a bin range
    Add {
        /// Owner id
        owner: String,

        /// Pool address
        pool: String,

        #[arg(long, allow_negative_numbers = true)]
        lower_bin: i32,

        #[arg(long, allow_negative_numbers = true)]
        upper_bin: i32,

        /// Amount of liquidity in whole coins
        #[arg(long)]
        amount: f64,
    },

    /// Remove all of an owner's liquidity from a pool
    Remove {
        /// Owner id
        owner: String,

        /// Pool address
        pool: String,
    },

    /// Credit fees to every position in a pool
    Accrue {
        /// Pool address
        pool: String,

        #[arg(long)]
        amount: f64,
    },

    /// List an owner's positions
    List {
        /// Owner id
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("liquidity_watch=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run => commands::run(&config).await,
        Commands::Reconcile { owner } => commands::reconcile(&config, owner).await,
        Commands::Faucet { owner } => commands::faucet(&config, &owner).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Wallet { action } => match action {
            WalletAction::Create { owner, force } => {
                commands::wallet_create(&config, &owner, force).await
            }
            WalletAction::Import { owner, secret_key } => {
                commands::wallet_import(&config, &owner, &secret_key).await
            }
            WalletAction::Show { owner, reveal } => {
                commands::wallet_show(&config, &owner, reveal).await
            }
            WalletAction::List => commands::wallet_list(&config).await,
            WalletAction::Remove { owner } => commands::wallet_remove(&config, &owner).await,
        },
        Commands::Liquidity { action } => match action {
            LiquidityAction::Add {
                owner,
                pool,
                lower_bin,
                upper_bin,
                amount,
            } => commands::liquidity_add(&config, &owner, &pool, lower_bin, upper_bin, amount).await,
            LiquidityAction::Remove { owner, pool } => {
                commands::liquidity_remove(&config, &owner, &pool).await
            }
            LiquidityAction::Accrue { pool, amount } => {
                commands::liquidity_accrue(&config, &pool, amount).await
            }
            LiquidityAction::List { owner } => commands::liquidity_list(&config, &owner).await,
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
