//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::faucet::{ceil_minutes, FaucetLimiter};
use crate::liquidity::{LiquidityDesk, PositionSource, SimulatedLiquidity};
use crate::reconcile::{notifier, ReconcileOutcome, ReconciliationScheduler};
use crate::rpc::{ChainEndpoint, RemoteClient, SolanaEndpoint};
use crate::wallet::{OwnerId, WalletStore};

/// Store and remote client shared by every command
async fn services(config: &Config) -> Result<(Arc<WalletStore>, Arc<RemoteClient>)> {
    let store = Arc::new(WalletStore::open(&config.storage.data_dir).await?);
    let positions = Arc::new(SimulatedLiquidity::open(&config.storage.data_dir).await?);
    let client = Arc::new(RemoteClient::from_config(config, positions));
    Ok((store, client))
}

async fn scheduler(config: &Config) -> Result<(Arc<WalletStore>, ReconciliationScheduler)> {
    let (store, client) = services(config).await?;
    let notifier = notifier::from_config(&config.notify)?;
    let scheduler =
        ReconciliationScheduler::new(store.clone(), client, notifier, config.reconcile.clone());
    Ok((store, scheduler))
}

/// Run the reconciliation daemon until Ctrl+C
pub async fn run(config: &Config) -> Result<()> {
    info!("Starting liquidity watch...");
    info!(
        "Reconciling every {}s, faucet window {}s",
        config.reconcile.interval_secs, config.faucet.window_secs
    );

    let (store, scheduler) = scheduler(config).await?;
    info!("Watching {} wallet(s)", store.owners().await.len());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let scheduler = Arc::new(scheduler);
    let mut handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::select! {
        result = &mut handle => {
            // Only a fatal error ends the loop on its own
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, waiting for the current cycle to finish...");
        }
    }

    let _ = shutdown_tx.send(());
    handle.await??;

    info!("Liquidity watch stopped");
    Ok(())
}

/// Reconcile one owner, or every owner once
pub async fn reconcile(config: &Config, owner: Option<String>) -> Result<()> {
    let (_store, scheduler) = scheduler(config).await?;

    match owner {
        Some(owner) => {
            let owner = OwnerId::new(owner);
            let outcome = scheduler.reconcile_once(&owner).await?;
            let label = match outcome {
                ReconcileOutcome::Unchanged => "no changes",
                ReconcileOutcome::Notified => "changes detected, owner alerted",
                ReconcileOutcome::Seeded => "baseline recorded",
            };
            println!("{}: {}", owner, label);
        }
        None => {
            let report = scheduler.run_cycle().await?;
            println!("\n=== RECONCILIATION CYCLE ===\n");
            println!("Processed: {}", report.processed);
            println!("Changed:   {}", report.changed);
            println!("Skipped:   {}", report.skipped);
        }
    }

    Ok(())
}

/// Request faucet funds for an owner
pub async fn faucet(config: &Config, owner: &str) -> Result<()> {
    let (store, client) = services(config).await?;
    let limiter = FaucetLimiter::new(store, client, &config.faucet);
    let owner = OwnerId::new(owner);

    match limiter.request(&owner).await {
        Ok(signature) => {
            println!("Airdropped {} SOL to {}", limiter.amount_sol(), owner);
            println!("Signature: {}", signature);
            Ok(())
        }
        Err(Error::RateLimitExceeded { remaining_minutes }) => {
            println!(
                "Faucet already used. Try again in {} minute(s).",
                remaining_minutes
            );
            Err(Error::RateLimitExceeded { remaining_minutes }.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC endpoint reachability
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Primary RPC... ");
    match check_endpoint(&config.rpc.primary_endpoint, config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    match config.rpc.fallback() {
        Some(url) => {
            print!("Fallback RPC... ");
            match check_endpoint(url, config).await {
                Ok(latency) => println!("OK ({}ms)", latency),
                Err(e) => {
                    println!("FAILED: {}", e);
                    all_healthy = false;
                }
            }
        }
        None => println!("Fallback RPC... DISABLED"),
    }

    print!("Wallet store... ");
    match WalletStore::open(&config.storage.data_dir).await {
        Ok(store) => println!("OK ({} wallet(s))", store.owners().await.len()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_endpoint(url: &str, config: &Config) -> Result<u64> {
    let endpoint = SolanaEndpoint::new(url, &config.rpc);

    let start = Instant::now();
    endpoint
        .get_balance(&solana_sdk::system_program::id())
        .await?;
    Ok(start.elapsed().as_millis() as u64)
}

// =============================================================================
// Wallet Management Commands
// =============================================================================

/// Generate a wallet for an owner
pub async fn wallet_create(config: &Config, owner: &str, force: bool) -> Result<()> {
    let store = WalletStore::open(&config.storage.data_dir).await?;
    let owner = OwnerId::new(owner);

    if let Some(existing) = store.get(&owner).await {
        if !force {
            anyhow::bail!(
                "Owner {} already has wallet {}. Use --force to replace it.",
                owner,
                existing.public_key
            );
        }
        warn!("Replacing wallet {} for owner {}", existing.public_key, owner);
    }

    let record = store.create(&owner).await?;

    println!("Created wallet for {}", owner);
    println!("  Address: {}", record.public_key);
    Ok(())
}

/// Import a base58 secret key for an owner
pub async fn wallet_import(config: &Config, owner: &str, secret_key: &str) -> Result<()> {
    let store = WalletStore::open(&config.storage.data_dir).await?;
    let owner = OwnerId::new(owner);

    let record = store.import(&owner, secret_key.trim()).await?;

    println!("Imported wallet for {}", owner);
    println!("  Address: {}", record.public_key);
    Ok(())
}

/// Show one owner's wallet and last snapshot
pub async fn wallet_show(config: &Config, owner: &str, reveal: bool) -> Result<()> {
    let store = Arc::new(WalletStore::open(&config.storage.data_dir).await?);
    let owner = OwnerId::new(owner);

    let record = store
        .get(&owner)
        .await
        .ok_or_else(|| Error::WalletNotFound(owner.to_string()))?;
    let snapshot = store.snapshot(&owner).await;

    println!("\n=== WALLET {} ===\n", owner);
    println!("Address: {}", record.public_key);
    println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if reveal {
        warn!("Printing secret key for {}", owner);
        println!("Secret key: {}", record.secret_key_base58());
    }

    println!("\n=== LAST SNAPSHOT ===\n");
    match snapshot.observed_at {
        Some(at) => println!("Observed: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Observed: never"),
    }
    println!("Balance: {:.4} SOL", snapshot.balance);

    if snapshot.positions.is_empty() {
        println!("Positions: none");
    } else {
        println!("Positions:");
        for p in &snapshot.positions {
            println!(
                "  {} bins [{}, {}] liquidity {:.4} fees {:.6}",
                p.pool, p.lower_bin, p.upper_bin, p.liquidity, p.fees_earned
            );
        }
    }

    if snapshot.signatures.is_empty() {
        println!("Recent transactions: none");
    } else {
        println!("Recent transactions:");
        for sig in &snapshot.signatures {
            println!("  {}", sig);
        }
    }

    let (_, client) = services(config).await?;
    let limiter = FaucetLimiter::new(store, client, &config.faucet);
    match limiter.time_until_next_request(&owner).await {
        Some(left) => println!(
            "\nFaucet: available in {} minute(s)",
            ceil_minutes(left)
        ),
        None => println!("\nFaucet: available"),
    }

    Ok(())
}

/// List all registered wallets
pub async fn wallet_list(config: &Config) -> Result<()> {
    let store = WalletStore::open(&config.storage.data_dir).await?;
    let records = store.list().await;

    println!("\n=== REGISTERED WALLETS ===\n");
    println!("{:<20} {:<46} {:>12}", "OWNER", "ADDRESS", "BALANCE");
    println!("{}", "-".repeat(80));

    for record in &records {
        let snapshot = store.snapshot(&record.owner_id).await;
        let balance = if snapshot.is_observed() {
            format!("{:.4} SOL", snapshot.balance)
        } else {
            "-".to_string()
        };
        println!(
            "{:<20} {:<46} {:>12}",
            record.owner_id.as_str(),
            record.public_key,
            balance
        );
    }

    println!("\n{} wallet(s) in {}", records.len(), store.data_dir().display());
    Ok(())
}

/// Delete an owner's wallet and snapshot
pub async fn wallet_remove(config: &Config, owner: &str) -> Result<()> {
    let store = WalletStore::open(&config.storage.data_dir).await?;
    let owner = OwnerId::new(owner);

    if let Err(e) = store.remove(&owner).await {
        error!("Failed to remove wallet for {}: {}", owner, e);
        return Err(e.into());
    }

    println!("Removed wallet for {}", owner);
    Ok(())
}

// =============================================================================
// Liquidity Commands
// =============================================================================

/// Owner's wallet address, for commands that act on the liquidity book
async fn owner_address(
    config: &Config,
    owner: &str,
) -> Result<(OwnerId, solana_sdk::pubkey::Pubkey)> {
    let store = WalletStore::open(&config.storage.data_dir).await?;
    let owner = OwnerId::new(owner);
    let record = store
        .get(&owner)
        .await
        .ok_or_else(|| Error::WalletNotFound(owner.to_string()))?;
    let address = record.pubkey()?;
    Ok((owner, address))
}

/// Add liquidity to a pool for an owner
pub async fn liquidity_add(
    config: &Config,
    owner: &str,
    pool: &str,
    lower_bin: i32,
    upper_bin: i32,
    amount: f64,
) -> Result<()> {
    let (owner, address) = owner_address(config, owner).await?;
    let desk = SimulatedLiquidity::open(&config.storage.data_dir).await?;

    let signature = desk
        .submit_add_liquidity(&address, pool, lower_bin, upper_bin, amount)
        .await?;

    println!(
        "Added {} liquidity to {} bins [{}, {}] for {}",
        amount, pool, lower_bin, upper_bin, owner
    );
    println!("Signature: {}", signature);
    Ok(())
}

/// Remove an owner's liquidity from a pool
pub async fn liquidity_remove(config: &Config, owner: &str, pool: &str) -> Result<()> {
    let (owner, address) = owner_address(config, owner).await?;
    let desk = SimulatedLiquidity::open(&config.storage.data_dir).await?;

    let signature = desk.submit_remove_liquidity(&address, pool).await?;

    println!("Removed liquidity from {} for {}", pool, owner);
    println!("Signature: {}", signature);
    Ok(())
}

/// Credit fees to every position in a pool
pub async fn liquidity_accrue(config: &Config, pool: &str, amount: f64) -> Result<()> {
    let desk = SimulatedLiquidity::open(&config.storage.data_dir).await?;
    let credited = desk.accrue_fees(pool, amount).await?;

    println!("Accrued {} fees on {} position(s) in {}", amount, credited, pool);
    Ok(())
}

/// List an owner's positions
pub async fn liquidity_list(config: &Config, owner: &str) -> Result<()> {
    let (owner, address) = owner_address(config, owner).await?;
    let desk = SimulatedLiquidity::open(&config.storage.data_dir).await?;
    let positions = desk.get_positions_for_address(&address).await?;

    println!("\n=== POSITIONS FOR {} ===\n", owner);
    if positions.is_empty() {
        println!("No positions");
        return Ok(());
    }

    println!(
        "{:<46} {:>8} {:>8} {:>12} {:>12}",
        "POOL", "LOWER", "UPPER", "LIQUIDITY", "FEES"
    );
    println!("{}", "-".repeat(90));
    for p in &positions {
        println!(
            "{:<46} {:>8} {:>8} {:>12.4} {:>12.6}",
            p.pool, p.lower_bin, p.upper_bin, p.liquidity, p.fees_earned
        );
    }
    Ok(())
}
