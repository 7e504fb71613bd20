//! Scripted collaborators for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::config::{BackoffShape, RetryConfig, RetryPolicy};
use crate::error::{Error, Result};
use crate::liquidity::{Position, PositionSource};
use crate::reconcile::notifier::Notifier;
use crate::rpc::client::RemoteClient;
use crate::rpc::endpoint::ChainEndpoint;
use crate::wallet::OwnerId;

/// How a scripted endpoint answers airdrop requests
#[derive(Debug, Clone, PartialEq)]
pub enum AirdropOutcome {
    Confirm(String),
    Transient,
    Reject,
}

pub struct ScriptedEndpoint {
    url: String,
    balances: Mutex<HashMap<Pubkey, u64>>,
    signatures: Mutex<HashMap<Pubkey, Vec<String>>>,
    failing: Mutex<HashSet<Pubkey>>,
    airdrop: Mutex<AirdropOutcome>,
    latency: Mutex<Duration>,
    pub balance_calls: AtomicU32,
    pub signature_calls: AtomicU32,
    pub airdrop_calls: AtomicU32,
}

impl ScriptedEndpoint {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            balances: Mutex::new(HashMap::new()),
            signatures: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            airdrop: Mutex::new(AirdropOutcome::Confirm(format!("{}-airdrop", url))),
            latency: Mutex::new(Duration::ZERO),
            balance_calls: AtomicU32::new(0),
            signature_calls: AtomicU32::new(0),
            airdrop_calls: AtomicU32::new(0),
        })
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.balances.lock().unwrap().insert(address, lamports);
    }

    pub fn set_signatures(&self, address: Pubkey, signatures: &[&str]) {
        self.signatures
            .lock()
            .unwrap()
            .insert(address, signatures.iter().map(|s| s.to_string()).collect());
    }

    /// Make every read for this address fail transiently
    pub fn fail_reads_for(&self, address: Pubkey) {
        self.failing.lock().unwrap().insert(address);
    }

    pub fn set_airdrop(&self, outcome: AirdropOutcome) {
        *self.airdrop.lock().unwrap() = outcome;
    }

    /// Delay every call by this much before answering
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check(&self, address: &Pubkey) -> Result<()> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(Error::TransientNetwork(format!("{} timed out", self.url)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainEndpoint for ScriptedEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check(address)?;
        Ok(self.balances.lock().unwrap().get(address).copied().unwrap_or(0))
    }

    async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>> {
        self.signature_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check(address)?;
        let mut sigs = self
            .signatures
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default();
        sigs.truncate(limit);
        Ok(sigs)
    }

    async fn request_airdrop(&self, _address: &Pubkey, _lamports: u64) -> Result<String> {
        self.airdrop_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let outcome = self.airdrop.lock().unwrap().clone();
        match outcome {
            AirdropOutcome::Confirm(sig) => Ok(sig),
            AirdropOutcome::Transient => {
                Err(Error::TransientNetwork(format!("{} airdrop failed", self.url)))
            }
            AirdropOutcome::Reject => Err(Error::TransactionRejected {
                signature: "rejected-sig".to_string(),
                reason: "InstructionError".to_string(),
            }),
        }
    }
}

/// Position source with an optional outage per address
#[derive(Default)]
pub struct ScriptedPositions {
    positions: Mutex<HashMap<Pubkey, Vec<Position>>>,
    failing: Mutex<HashSet<Pubkey>>,
}

impl ScriptedPositions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, address: Pubkey, positions: Vec<Position>) {
        self.positions.lock().unwrap().insert(address, positions);
    }

    pub fn fail_for(&self, address: Pubkey) {
        self.failing.lock().unwrap().insert(address);
    }
}

#[async_trait]
impl PositionSource for ScriptedPositions {
    async fn get_positions_for_address(&self, address: &Pubkey) -> Result<Vec<Position>> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(Error::UpstreamService("position service unavailable".into()));
        }
        Ok(self
            .positions
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

/// Notifier that records deliveries and can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(OwnerId, String)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(OwnerId, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver_message(&self, owner: &OwnerId, text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Notification("chat transport down".into()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((owner.clone(), text.to_string()));
        Ok(())
    }
}

/// Retry policies with millisecond delays so tests stay fast
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        read: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            shape: BackoffShape::Fixed,
        },
        airdrop: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            shape: BackoffShape::Exponential,
        },
    }
}

pub fn remote_client(
    primary: &Arc<ScriptedEndpoint>,
    fallback: Option<&Arc<ScriptedEndpoint>>,
    positions: &Arc<ScriptedPositions>,
) -> RemoteClient {
    RemoteClient::new(
        primary.clone(),
        fallback.map(|f| f.clone() as Arc<dyn ChainEndpoint>),
        positions.clone(),
        &fast_retry(),
    )
}
