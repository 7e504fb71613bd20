//! Single-endpoint RPC access
//!
//! One `ChainEndpoint` per RPC URL. Endpoints make exactly one attempt per
//! call; retry and failover live in [`super::client::RemoteClient`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use crate::config::RpcConfig;
use crate::error::{Error, Result};

/// Chain operations against one RPC endpoint
#[async_trait]
pub trait ChainEndpoint: Send + Sync {
    /// Endpoint URL, for logging
    fn url(&self) -> &str;

    /// Balance in lamports
    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;

    /// Recent transaction signatures, most recent first
    async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>>;

    /// Request an airdrop and wait until it is confirmed
    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<String>;
}

/// JSON-RPC endpoint backed by the nonblocking Solana client
pub struct SolanaEndpoint {
    url: String,
    client: RpcClient,
    commitment: CommitmentConfig,
    confirm_poll: Duration,
    confirm_timeout: Duration,
}

impl SolanaEndpoint {
    pub fn new(url: impl Into<String>, config: &RpcConfig) -> Self {
        let url = url.into();
        let commitment = CommitmentConfig::confirmed();
        let client = RpcClient::new_with_timeout_and_commitment(
            url.clone(),
            Duration::from_millis(config.timeout_ms),
            commitment,
        );

        Self {
            url,
            client,
            commitment,
            confirm_poll: Duration::from_millis(config.confirm_poll_ms),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
        }
    }

    /// Map a client error onto the retryable taxonomy
    fn classify(&self, operation: &str, e: ClientError) -> Error {
        let unreachable = match e.kind() {
            ClientErrorKind::Io(_) => true,
            ClientErrorKind::Reqwest(err) => err.is_connect(),
            _ => false,
        };

        if unreachable {
            Error::EndpointUnavailable {
                endpoint: self.url.clone(),
                reason: format!("{}: {}", operation, e),
            }
        } else {
            Error::TransientNetwork(format!("{} via {}: {}", operation, self.url, e))
        }
    }
}

#[async_trait]
impl ChainEndpoint for SolanaEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        self.client
            .get_balance(address)
            .await
            .map_err(|e| self.classify("get_balance", e))
    }

    async fn get_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<String>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            commitment: Some(self.commitment),
            ..Default::default()
        };

        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| self.classify("get_signatures_for_address", e))?;

        Ok(statuses.into_iter().map(|s| s.signature).collect())
    }

    async fn request_airdrop(&self, address: &Pubkey, lamports: u64) -> Result<String> {
        let signature = self
            .client
            .request_airdrop(address, lamports)
            .await
            .map_err(|e| self.classify("request_airdrop", e))?;

        info!(
            "Airdrop of {} lamports to {} submitted via {} (sig: {})",
            lamports, address, self.url, signature
        );

        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            match self
                .client
                .get_signature_status_with_commitment(&signature, self.commitment)
                .await
            {
                Ok(Some(Ok(()))) => return Ok(signature.to_string()),
                Ok(Some(Err(tx_err))) => {
                    return Err(Error::TransactionRejected {
                        signature: signature.to_string(),
                        reason: tx_err.to_string(),
                    })
                }
                Ok(None) => {}
                Err(e) => debug!("Status poll for {} failed: {}", signature, e),
            }

            if Instant::now() >= deadline {
                return Err(Error::TransientNetwork(format!(
                    "airdrop {} not confirmed within {:?}",
                    signature, self.confirm_timeout
                )));
            }

            tokio::time::sleep(self.confirm_poll).await;
        }
    }
}
