//! Remote client with retry and airdrop failover
//!
//! Reads (balance, signatures) retry against the primary endpoint only.
//! Airdrops retry against the primary, then get one full retry budget on
//! the fallback endpoint. Position queries go to the position source and
//! are not retried.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::liquidity::{Position, PositionSource};

use super::endpoint::{ChainEndpoint, SolanaEndpoint};
use super::retry::RetryExecutor;
use super::{lamports_to_sol, sol_to_lamports};

pub struct RemoteClient {
    primary: Arc<dyn ChainEndpoint>,
    fallback: Option<Arc<dyn ChainEndpoint>>,
    positions: Arc<dyn PositionSource>,
    read_retry: RetryExecutor,
    airdrop_retry: RetryExecutor,
}

impl RemoteClient {
    pub fn new(
        primary: Arc<dyn ChainEndpoint>,
        fallback: Option<Arc<dyn ChainEndpoint>>,
        positions: Arc<dyn PositionSource>,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            positions,
            read_retry: RetryExecutor::new(retry.read.clone()),
            airdrop_retry: RetryExecutor::new(retry.airdrop.clone()),
        }
    }

    /// Build Solana JSON-RPC endpoints from configuration
    pub fn from_config(config: &Config, positions: Arc<dyn PositionSource>) -> Self {
        let primary: Arc<dyn ChainEndpoint> =
            Arc::new(SolanaEndpoint::new(&config.rpc.primary_endpoint, &config.rpc));
        let fallback = config
            .rpc
            .fallback()
            .map(|url| Arc::new(SolanaEndpoint::new(url, &config.rpc)) as Arc<dyn ChainEndpoint>);

        info!(
            "Remote client: primary {}, fallback {}",
            primary.url(),
            fallback.as_ref().map(|f| f.url()).unwrap_or("(none)")
        );

        Self::new(primary, fallback, positions, &config.retry)
    }

    /// Balance in whole-coin units
    pub async fn get_balance(&self, address: &Pubkey) -> Result<f64> {
        let primary = self.primary.as_ref();
        let lamports = self
            .read_retry
            .execute("get_balance", move || primary.get_balance(address))
            .await?;
        Ok(lamports_to_sol(lamports))
    }

    /// Positions from the position source; every failure is an upstream error
    pub async fn get_positions(&self, address: &Pubkey) -> Result<Vec<Position>> {
        self.positions
            .get_positions_for_address(address)
            .await
            .map_err(|e| match e {
                Error::UpstreamService(_) => e,
                other => Error::UpstreamService(other.to_string()),
            })
    }

    /// Recent signatures, most recent first
    pub async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>> {
        let primary = self.primary.as_ref();
        self.read_retry
            .execute("get_recent_signatures", move || {
                primary.get_recent_signatures(address, limit)
            })
            .await
    }

    /// Airdrop `amount_sol` and wait for confirmation
    ///
    /// Falls over to the fallback endpoint only after the primary exhausts
    /// its budget on retryable errors. A rejected transaction is returned
    /// as-is.
    pub async fn request_airdrop(&self, address: &Pubkey, amount_sol: f64) -> Result<String> {
        let lamports = sol_to_lamports(amount_sol);
        let primary = self.primary.as_ref();

        let err = match self
            .airdrop_retry
            .execute("request_airdrop", move || {
                primary.request_airdrop(address, lamports)
            })
            .await
        {
            Ok(signature) => return Ok(signature),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        let Some(fallback) = self.fallback.as_deref() else {
            return Err(err);
        };

        warn!(
            "Airdrop via {} exhausted retries ({}), failing over to {}",
            primary.url(),
            err,
            fallback.url()
        );

        self.airdrop_retry
            .execute("request_airdrop (fallback)", move || {
                fallback.request_airdrop(address, lamports)
            })
            .await
    }
}
