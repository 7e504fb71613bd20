//! Rate-limited faucet
//!
//! Each owner may receive one airdrop per rolling window. The window is
//! only consumed by a confirmed airdrop; a failed request can be retried
//! right away. The window starts when the airdrop is confirmed.
//!
//! Requests from separate processes sharing a data directory are
//! serialized by a per-owner lock file.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::FaucetConfig;
use crate::error::{Error, Result};
use crate::persist::{FileLock, LOCKS_DIR};
use crate::rpc::RemoteClient;
use crate::wallet::{OwnerId, WalletStore};

pub struct FaucetLimiter {
    store: Arc<WalletStore>,
    client: Arc<RemoteClient>,
    window: Duration,
    amount_sol: f64,
    /// Held across check, airdrop and timestamp update
    locks: DashMap<OwnerId, Arc<Mutex<()>>>,
}

impl FaucetLimiter {
    pub fn new(store: Arc<WalletStore>, client: Arc<RemoteClient>, config: &FaucetConfig) -> Self {
        Self {
            store,
            client,
            window: Duration::seconds(config.window_secs as i64),
            amount_sol: config.amount_sol,
            locks: DashMap::new(),
        }
    }

    pub fn amount_sol(&self) -> f64 {
        self.amount_sol
    }

    /// Airdrop the fixed amount to the owner's wallet
    pub async fn request(&self, owner: &OwnerId) -> Result<String> {
        self.request_at(owner, Utc::now()).await
    }

    /// Same as [`request`](Self::request) with an explicit clock
    pub async fn request_at(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<String> {
        let lock = self
            .locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let _file = FileLock::acquire(self.lock_path(owner)).await?;

        // Another process may have granted an airdrop since we last looked
        self.store.refresh().await?;

        let record = self
            .store
            .get(owner)
            .await
            .ok_or_else(|| Error::WalletNotFound(owner.to_string()))?;

        let last = self.store.snapshot(owner).await.last_faucet_time;
        if let Some(remaining) = self.remaining(last, now) {
            let remaining_minutes = ceil_minutes(remaining);
            info!(
                "Faucet request from {} refused, {} minute(s) left",
                owner, remaining_minutes
            );
            return Err(Error::RateLimitExceeded { remaining_minutes });
        }

        let address = record.pubkey()?;
        let started = tokio::time::Instant::now();
        let signature = match self.client.request_airdrop(&address, self.amount_sol).await {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Faucet airdrop for {} failed: {}", owner, e);
                return Err(e);
            }
        };

        let latency = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        let confirmed_at = now + latency;
        self.store
            .modify_snapshot(owner, |s| s.last_faucet_time = Some(confirmed_at))
            .await?;

        info!(
            "Airdropped {} SOL to {} ({}): {}",
            self.amount_sol, owner, address, signature
        );
        Ok(signature)
    }

    /// Time left before the owner may request again; `None` if allowed now
    pub async fn time_until_next_request(&self, owner: &OwnerId) -> Option<Duration> {
        let last = self.store.snapshot(owner).await.last_faucet_time;
        self.remaining(last, Utc::now())
    }

    fn lock_path(&self, owner: &OwnerId) -> std::path::PathBuf {
        let name = bs58::encode(owner.as_str().as_bytes()).into_string();
        self.store
            .data_dir()
            .join(LOCKS_DIR)
            .join(format!("faucet-{}.lock", name))
    }

    fn remaining(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = now.signed_duration_since(last?);
        if elapsed >= self.window {
            return None;
        }
        // A timestamp from the future still only blocks for one window
        Some((self.window - elapsed).min(self.window))
    }
}

/// Whole minutes, rounded up
pub(crate) fn ceil_minutes(remaining: Duration) -> i64 {
    let ms = remaining.num_milliseconds();
    (ms + 59_999) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{remote_client, AirdropOutcome, ScriptedEndpoint, ScriptedPositions};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        store: Arc<WalletStore>,
        primary: Arc<ScriptedEndpoint>,
        fallback: Arc<ScriptedEndpoint>,
        faucet: FaucetLimiter,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(WalletStore::open(dir.path()).await.unwrap());
        let primary = ScriptedEndpoint::new("primary");
        let fallback = ScriptedEndpoint::new("fallback");
        let positions = ScriptedPositions::new();
        let client = Arc::new(remote_client(&primary, Some(&fallback), &positions));

        let config = FaucetConfig {
            window_secs: 3600,
            amount_sol: 2.0,
        };
        let faucet = FaucetLimiter::new(store.clone(), client, &config);

        Harness {
            dir,
            store,
            primary,
            fallback,
            faucet,
        }
    }

    async fn register(h: &Harness, owner: &str) -> OwnerId {
        let owner = OwnerId::new(owner);
        h.store.create(&owner).await.unwrap();
        owner
    }

    #[test]
    fn test_ceil_minutes() {
        assert_eq!(ceil_minutes(Duration::minutes(30)), 30);
        assert_eq!(ceil_minutes(Duration::seconds(29 * 60 + 1)), 30);
        assert_eq!(ceil_minutes(Duration::seconds(1)), 1);
        assert_eq!(ceil_minutes(Duration::milliseconds(60_001)), 2);
        // Sub-second remainders still count as a minute
        assert_eq!(ceil_minutes(Duration::milliseconds(500)), 1);
        assert_eq!(ceil_minutes(Duration::zero()), 0);
    }

    #[tokio::test]
    async fn test_first_request_records_time() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        let now = Utc::now();

        let sig = h.faucet.request_at(&owner, now).await.unwrap();

        assert_eq!(sig, "primary-airdrop");
        let stamped = h.store.snapshot(&owner).await.last_faucet_time.unwrap();
        assert!(stamped >= now && stamped < now + Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_second_request_within_window_is_refused() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        let t0 = Utc::now();
        h.faucet.request_at(&owner, t0).await.unwrap();
        let stamped = h.store.snapshot(&owner).await.last_faucet_time;

        let later = t0 + Duration::minutes(30) + Duration::seconds(1);
        let err = h.faucet.request_at(&owner, later).await.unwrap_err();

        assert!(matches!(
            err,
            Error::RateLimitExceeded {
                remaining_minutes: 30
            }
        ));
        assert_eq!(h.store.snapshot(&owner).await.last_faucet_time, stamped);
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_allowed_after_window() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        let t0 = Utc::now();
        h.faucet.request_at(&owner, t0).await.unwrap();

        let first = h.store.snapshot(&owner).await.last_faucet_time.unwrap();

        let later = first + Duration::seconds(3600);
        assert!(h.faucet.request_at(&owner, later).await.is_ok());
        assert!(h.store.snapshot(&owner).await.last_faucet_time.unwrap() >= later);
    }

    #[tokio::test]
    async fn test_failed_airdrop_does_not_consume_window() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        h.primary.set_airdrop(AirdropOutcome::Reject);

        let err = h.faucet.request(&owner).await.unwrap_err();
        assert!(matches!(err, Error::TransactionRejected { .. }));
        assert_eq!(h.store.snapshot(&owner).await.last_faucet_time, None);

        h.primary
            .set_airdrop(AirdropOutcome::Confirm("retry-sig".into()));
        assert_eq!(h.faucet.request(&owner).await.unwrap(), "retry-sig");
    }

    #[tokio::test]
    async fn test_request_uses_fallback_endpoint() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        h.primary.set_airdrop(AirdropOutcome::Transient);

        let sig = h.faucet.request(&owner).await.unwrap();

        assert_eq!(sig, "fallback-airdrop");
        assert_eq!(h.fallback.airdrop_calls.load(Ordering::SeqCst), 1);
        assert!(h.store.snapshot(&owner).await.last_faucet_time.is_some());
    }

    #[tokio::test]
    async fn test_unknown_owner() {
        let h = harness().await;
        let err = h.faucet.request(&OwnerId::new("ghost")).await.unwrap_err();

        assert!(matches!(err, Error::WalletNotFound(_)));
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_grant_one_airdrop() {
        let h = harness().await;
        let owner = register(&h, "alice").await;

        let (a, b) = tokio::join!(h.faucet.request(&owner), h.faucet.request(&owner));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_time_until_next_request() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        assert!(h.faucet.time_until_next_request(&owner).await.is_none());

        h.faucet.request(&owner).await.unwrap();
        let remaining = h.faucet.time_until_next_request(&owner).await.unwrap();
        assert!(remaining > Duration::minutes(59));
        assert!(remaining <= Duration::minutes(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_starts_at_confirmation() {
        let h = harness().await;
        let owner = register(&h, "alice").await;
        h.primary.set_latency(std::time::Duration::from_secs(90));
        let t0 = Utc::now();

        h.faucet.request_at(&owner, t0).await.unwrap();

        let stamped = h.store.snapshot(&owner).await.last_faucet_time.unwrap();
        assert!(stamped >= t0 + Duration::seconds(90));
        assert!(stamped < t0 + Duration::seconds(91));

        // A full window after the request, but not after confirmation
        let err = h
            .faucet
            .request_at(&owner, t0 + Duration::seconds(3600))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RateLimitExceeded {
                remaining_minutes: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_stale_daemon_write_keeps_window_for_next_command() {
        let h = harness().await;
        let owner = register(&h, "alice").await;

        // Daemon opened the directory before the faucet was used
        let daemon = WalletStore::open(h.dir.path()).await.unwrap();

        let t0 = Utc::now();
        h.faucet.request_at(&owner, t0).await.unwrap();

        daemon
            .modify_snapshot(&owner, |s| {
                s.absorb(crate::wallet::StateSnapshot::observed(2.0, vec![], vec![], 5))
            })
            .await
            .unwrap();

        // A fresh command process
        let store = Arc::new(WalletStore::open(h.dir.path()).await.unwrap());
        let positions = ScriptedPositions::new();
        let client = Arc::new(remote_client(&h.primary, None, &positions));
        let config = FaucetConfig {
            window_secs: 3600,
            amount_sol: 2.0,
        };
        let next = FaucetLimiter::new(store, client, &config);

        let err = next
            .request_at(&owner, t0 + Duration::minutes(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { .. }));
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_limiter_with_stale_cache_still_refuses() {
        let h = harness().await;
        let owner = register(&h, "alice").await;

        // The daemon's limiter loaded the store before another command funded the owner
        let daemon_store = Arc::new(WalletStore::open(h.dir.path()).await.unwrap());
        let positions = ScriptedPositions::new();
        let client = Arc::new(remote_client(&h.primary, None, &positions));
        let config = FaucetConfig {
            window_secs: 3600,
            amount_sol: 2.0,
        };
        let daemon_faucet = FaucetLimiter::new(daemon_store, client, &config);

        let t0 = Utc::now();
        h.faucet.request_at(&owner, t0).await.unwrap();

        let err = daemon_faucet
            .request_at(&owner, t0 + Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded { .. }));
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_limiters_on_shared_directory_grant_one_airdrop() {
        let h = harness().await;
        let owner = register(&h, "alice").await;

        let other_store = Arc::new(WalletStore::open(h.dir.path()).await.unwrap());
        let positions = ScriptedPositions::new();
        let client = Arc::new(remote_client(&h.primary, None, &positions));
        let config = FaucetConfig {
            window_secs: 3600,
            amount_sol: 2.0,
        };
        let other = FaucetLimiter::new(other_store, client, &config);

        let (a, b) = tokio::join!(h.faucet.request(&owner), other.request(&owner));

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(h.primary.airdrop_calls.load(Ordering::SeqCst), 1);
    }
}
