//! Periodic wallet reconciliation
//!
//! Every tick walks all registered owners in order. For each owner it reads
//! balance, positions and recent signatures, diffs them against the stored
//! snapshot, alerts the owner if anything changed, then stores the fresh
//! read as the new baseline.
//!
//! A remote failure skips that owner for the tick and moves on. A storage
//! failure stops the scheduler.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{FirstCyclePolicy, ReconcileConfig};
use crate::error::{Error, Result};
use crate::rpc::RemoteClient;
use crate::wallet::{OwnerId, StateSnapshot, WalletStore};

use super::diff::diff;
use super::notifier::Notifier;

/// Result of reconciling one owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing changed; baseline refreshed
    Unchanged,
    /// Owner was alerted; baseline refreshed
    Notified,
    /// First observation stored without an alert
    Seeded,
}

/// Tally of one reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub changed: usize,
    pub skipped: usize,
    /// The tick did not run because another was still in progress
    pub overlapped: bool,
}

pub struct ReconciliationScheduler {
    store: Arc<WalletStore>,
    client: Arc<RemoteClient>,
    notifier: Arc<dyn Notifier>,
    config: ReconcileConfig,
    cycle_guard: Mutex<()>,
}

impl ReconciliationScheduler {
    pub fn new(
        store: Arc<WalletStore>,
        client: Arc<RemoteClient>,
        notifier: Arc<dyn Notifier>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            client,
            notifier,
            config,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Refresh one owner's snapshot, alerting on change
    ///
    /// The baseline is only replaced after the alert was delivered, so a
    /// failed delivery is retried on the next tick.
    pub async fn reconcile_once(&self, owner: &OwnerId) -> Result<ReconcileOutcome> {
        let record = self
            .store
            .get(owner)
            .await
            .ok_or_else(|| Error::WalletNotFound(owner.to_string()))?;
        let address = record.pubkey()?;
        let limit = self.config.signature_limit;

        let balance = self.client.get_balance(&address).await?;
        let positions = self.client.get_positions(&address).await?;
        let signatures = self.client.get_recent_signatures(&address, limit).await?;
        let observed = StateSnapshot::observed(balance, positions, signatures, limit);

        let baseline = self.store.snapshot(owner).await;

        if !baseline.is_observed() && self.config.first_cycle == FirstCyclePolicy::SeedSilently {
            self.store
                .modify_snapshot(owner, |s| s.absorb(observed))
                .await?;
            info!("Seeded baseline for {} ({} SOL)", owner, balance);
            return Ok(ReconcileOutcome::Seeded);
        }

        let changes = diff(&baseline, &observed);
        let outcome = if changes.is_empty() {
            debug!("No changes for {}", owner);
            ReconcileOutcome::Unchanged
        } else {
            self.notifier
                .deliver_message(owner, &changes.summary())
                .await?;
            info!(
                "Alerted {}: balance={} positions={} new_signatures={}",
                owner,
                changes.balance_changed(),
                changes.positions_changed,
                changes.new_signatures.len()
            );
            ReconcileOutcome::Notified
        };

        self.store
            .modify_snapshot(owner, |s| s.absorb(observed))
            .await?;

        Ok(outcome)
    }

    /// Reconcile every registered owner once
    ///
    /// Returns immediately with `overlapped` set if a cycle is already running.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("Previous reconciliation cycle still running, skipping tick");
            return Ok(CycleReport {
                overlapped: true,
                ..Default::default()
            });
        };

        // Wallets and faucet stamps may have been written by other processes
        self.store.refresh().await?;

        let owners = self.store.owners().await;
        let mut report = CycleReport::default();

        for owner in owners {
            match self.reconcile_once(&owner).await {
                Ok(outcome) => {
                    report.processed += 1;
                    if outcome == ReconcileOutcome::Notified {
                        report.changed += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping {} this cycle: {}", owner, e);
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Reconciliation cycle done: {} processed, {} alerted, {} skipped",
            report.processed, report.changed, report.skipped
        );
        Ok(report)
    }

    /// Run cycles on a fixed interval until shutdown is signalled
    ///
    /// A cycle in progress always finishes before shutdown is observed.
    /// Ticks missed while a cycle runs long are dropped, not queued.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "Starting reconciliation every {}s",
            self.config.interval_secs
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Reconciliation scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await?;
                }
            }
        }

        Ok(())
    }
}
