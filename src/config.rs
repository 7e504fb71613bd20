//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::rpc::retry::{BackoffShape, RetryPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    pub retry: RetryConfig,
    pub reconcile: ReconcileConfig,
    pub faucet: FaucetConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_primary_endpoint")]
    pub primary_endpoint: String,
    /// Empty disables airdrop failover
    #[serde(default = "default_fallback_endpoint")]
    pub fallback_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

impl RpcConfig {
    pub fn fallback(&self) -> Option<&str> {
        let url = self.fallback_endpoint.trim();
        (!url.is_empty()).then_some(url)
    }
}

/// Retry policies per call path
///
/// Reads and airdrops default to different backoff shapes; both are configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_read_policy")]
    pub read: RetryPolicy,
    #[serde(default = "default_airdrop_policy")]
    pub airdrop: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How many recent signatures a snapshot keeps
    #[serde(default = "default_signature_limit")]
    pub signature_limit: usize,
    #[serde(default)]
    pub first_cycle: FirstCyclePolicy,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// What the first reconciliation of a never-observed wallet compares against
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirstCyclePolicy {
    /// Diff against the zero snapshot; a funded wallet alerts on its first cycle
    #[default]
    ZeroBaseline,
    /// Store the first observation as the baseline without alerting
    SeedSilently,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    #[serde(default = "default_faucet_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_faucet_amount_sol")]
    pub amount_sol: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// POST alerts here as JSON; empty means log only
    #[serde(default)]
    pub webhook_url: String,
}

// RPC defaults
fn default_primary_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.devnet.solana.com".into())
}

fn default_fallback_endpoint() -> String {
    std::env::var("RPC_FALLBACK_ENDPOINT")
        .unwrap_or_else(|_| "https://rpc.ankr.com/solana_devnet".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_confirm_poll_ms() -> u64 {
    500
}

fn default_confirm_timeout_ms() -> u64 {
    60000
}

// Retry defaults
fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_read_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: default_retry_attempts(),
        base_delay_ms: default_retry_base_delay_ms(),
        shape: BackoffShape::Fixed,
    }
}

fn default_airdrop_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: default_retry_attempts(),
        base_delay_ms: default_retry_base_delay_ms(),
        shape: BackoffShape::Exponential,
    }
}

// Reconciliation defaults
fn default_interval_secs() -> u64 {
    300
}

fn default_signature_limit() -> usize {
    5
}

// Faucet defaults
fn default_faucet_window_secs() -> u64 {
    3600
}

fn default_faucet_amount_sol() -> f64 {
    2.0
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let read = default_read_policy();
        let airdrop = default_airdrop_policy();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.primary_endpoint", default_primary_endpoint())?
            .set_default("rpc.fallback_endpoint", default_fallback_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.confirm_poll_ms", default_confirm_poll_ms() as i64)?
            .set_default("rpc.confirm_timeout_ms", default_confirm_timeout_ms() as i64)?
            .set_default("retry.read.max_attempts", read.max_attempts as i64)?
            .set_default("retry.read.base_delay_ms", read.base_delay_ms as i64)?
            .set_default("retry.read.shape", read.shape.as_str())?
            .set_default("retry.airdrop.max_attempts", airdrop.max_attempts as i64)?
            .set_default("retry.airdrop.base_delay_ms", airdrop.base_delay_ms as i64)?
            .set_default("retry.airdrop.shape", airdrop.shape.as_str())?
            .set_default("reconcile.interval_secs", default_interval_secs() as i64)?
            .set_default("reconcile.signature_limit", default_signature_limit() as i64)?
            .set_default("reconcile.first_cycle", "zero_baseline")?
            .set_default("faucet.window_secs", default_faucet_window_secs() as i64)?
            .set_default("faucet.amount_sol", default_faucet_amount_sol())?
            .set_default("storage.data_dir", "data")?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix LPWATCH__)
            .add_source(
                config::Environment::with_prefix("LPWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.primary_endpoint.trim().is_empty() {
            anyhow::bail!("rpc.primary_endpoint must be set");
        }

        if self.rpc.fallback() == Some(self.rpc.primary_endpoint.trim()) {
            tracing::warn!("Fallback endpoint equals primary endpoint - failover adds no resilience");
        }

        if self.rpc.confirm_poll_ms == 0 {
            anyhow::bail!("rpc.confirm_poll_ms must be positive");
        }

        for (name, policy) in [("read", &self.retry.read), ("airdrop", &self.retry.airdrop)] {
            if policy.max_attempts == 0 {
                anyhow::bail!("retry.{}.max_attempts must be at least 1", name);
            }
            if policy.max_attempts > 16 {
                anyhow::bail!(
                    "retry.{}.max_attempts cannot exceed 16, got {}",
                    name,
                    policy.max_attempts
                );
            }
        }

        if self.reconcile.interval_secs == 0 {
            anyhow::bail!("reconcile.interval_secs must be positive");
        }

        if self.reconcile.signature_limit == 0 {
            anyhow::bail!("reconcile.signature_limit must be at least 1");
        }

        if !(self.faucet.amount_sol.is_finite() && self.faucet.amount_sol > 0.0) {
            anyhow::bail!("faucet.amount_sol must be positive");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    primary: {}
    fallback: {}
    timeout: {}ms
    confirm_timeout: {}ms
  Retry:
    read: {} attempts, {}ms {}
    airdrop: {} attempts, {}ms {}
  Reconcile:
    interval: {}s
    signature_limit: {}
    first_cycle: {:?}
  Faucet:
    window: {}s
    amount: {} SOL
  Storage:
    data_dir: {}
  Notify:
    webhook: {}
"#,
            mask_url(&self.rpc.primary_endpoint),
            self.rpc.fallback().map(mask_url).unwrap_or_else(|| "(disabled)".into()),
            self.rpc.timeout_ms,
            self.rpc.confirm_timeout_ms,
            self.retry.read.max_attempts,
            self.retry.read.base_delay_ms,
            self.retry.read.shape.as_str(),
            self.retry.airdrop.max_attempts,
            self.retry.airdrop.base_delay_ms,
            self.retry.airdrop.shape.as_str(),
            self.reconcile.interval_secs,
            self.reconcile.signature_limit,
            self.reconcile.first_cycle,
            self.faucet.window_secs,
            self.faucet.amount_sol,
            self.storage.data_dir.display(),
            if self.notify.webhook_url.is_empty() {
                "(not set)".to_string()
            } else {
                mask_url(&self.notify.webhook_url)
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                primary_endpoint: default_primary_endpoint(),
                fallback_endpoint: default_fallback_endpoint(),
                timeout_ms: default_timeout_ms(),
                confirm_poll_ms: default_confirm_poll_ms(),
                confirm_timeout_ms: default_confirm_timeout_ms(),
            },
            retry: RetryConfig {
                read: default_read_policy(),
                airdrop: default_airdrop_policy(),
            },
            reconcile: ReconcileConfig {
                interval_secs: default_interval_secs(),
                signature_limit: default_signature_limit(),
                first_cycle: FirstCyclePolicy::default(),
            },
            faucet: FaucetConfig {
                window_secs: default_faucet_window_secs(),
                amount_sol: default_faucet_amount_sol(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
            },
            notify: NotifyConfig::default(),
        }
    }
}
