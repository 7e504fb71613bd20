//! Core types for wallet management
//!
//! Defines owner identities, wallet records and per-owner state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::fmt;

use crate::error::{Error, Result};
use crate::liquidity::Position;

/// Length of an ed25519 keypair: 32-byte seed followed by 32-byte public key
pub const SECRET_KEY_LEN: usize = 64;

/// Identity of the client a wallet belongs to (a chat user id, for instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<i64> for OwnerId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A registered wallet
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub owner_id: OwnerId,

    /// Base58 public key
    pub public_key: String,

    /// Full 64-byte keypair, stored base58 encoded
    #[serde(with = "base58_bytes")]
    pub secret_key: Vec<u8>,

    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    /// Build a record from a keypair
    pub fn from_keypair(owner_id: OwnerId, keypair: &Keypair) -> Self {
        use solana_sdk::signer::Signer;

        Self {
            owner_id,
            public_key: keypair.pubkey().to_string(),
            secret_key: keypair.to_bytes().to_vec(),
            created_at: Utc::now(),
        }
    }

    /// Parsed public key
    pub fn pubkey(&self) -> Result<Pubkey> {
        self.public_key
            .parse()
            .map_err(|e| Error::InvalidKey(format!("stored public key {}: {}", self.public_key, e)))
    }

    /// Rebuild the signing keypair
    pub fn keypair(&self) -> Result<Keypair> {
        Keypair::from_bytes(&self.secret_key)
            .map_err(|e| Error::InvalidKey(format!("stored secret key: {}", e)))
    }

    /// Secret key in the encoding `import` accepts
    pub fn secret_key_base58(&self) -> String {
        bs58::encode(&self.secret_key).into_string()
    }
}

impl fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRecord")
            .field("owner_id", &self.owner_id)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Last observed on-chain state for one owner, used as the diff baseline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Balance in whole-coin units
    pub balance: f64,

    pub positions: Vec<Position>,

    /// Recent signatures, most recent first
    pub signatures: Vec<String>,

    /// When the faucet last paid out to this owner
    #[serde(default)]
    pub last_faucet_time: Option<DateTime<Utc>>,

    /// When a reconciliation last wrote this snapshot; `None` = never observed
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// Snapshot built from a fresh remote read
    pub fn observed(balance: f64, positions: Vec<Position>, mut signatures: Vec<String>, limit: usize) -> Self {
        signatures.truncate(limit);
        Self {
            balance,
            positions,
            signatures,
            last_faucet_time: None,
            observed_at: Some(Utc::now()),
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed_at.is_some()
    }

    /// Replace the on-chain view, keeping faucet bookkeeping
    pub fn absorb(&mut self, observed: StateSnapshot) {
        self.balance = observed.balance;
        self.positions = observed.positions;
        self.signatures = observed.signatures;
        self.observed_at = observed.observed_at;
    }
}

/// Wallet registry file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRegistry {
    /// Registry format version
    #[serde(default = "default_version")]
    pub version: String,

    pub wallets: Vec<WalletRecord>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self {
            version: default_version(),
            wallets: Vec::new(),
        }
    }
}

/// Serde adapter: byte vector <-> base58 string
mod base58_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(bytes).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        bs58::decode(&encoded)
            .into_vec()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signer::Signer;

    #[test]
    fn test_record_roundtrips_keypair() {
        let keypair = Keypair::new();
        let record = WalletRecord::from_keypair(OwnerId::from(42), &keypair);

        assert_eq!(record.secret_key.len(), SECRET_KEY_LEN);
        assert_eq!(record.pubkey().unwrap(), keypair.pubkey());
        assert_eq!(record.keypair().unwrap().pubkey(), keypair.pubkey());
        assert_eq!(record.secret_key_base58(), keypair.to_base58_string());
    }

    #[test]
    fn test_record_serializes_secret_as_base58() {
        let keypair = Keypair::new();
        let record = WalletRecord::from_keypair(OwnerId::new("alice"), &keypair);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["owner_id"], "alice");
        assert_eq!(json["secret_key"], keypair.to_base58_string());

        let back: WalletRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.secret_key, record.secret_key);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let record = WalletRecord::from_keypair(OwnerId::new("alice"), &Keypair::new());
        let printed = format!("{:?}", record);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&record.secret_key_base58()));
    }

    #[test]
    fn test_observed_truncates_signatures() {
        let sigs: Vec<String> = (0..8).map(|i| format!("sig{}", i)).collect();
        let snapshot = StateSnapshot::observed(1.0, vec![], sigs, 5);
        assert_eq!(snapshot.signatures.len(), 5);
        assert_eq!(snapshot.signatures[0], "sig0");
        assert!(snapshot.is_observed());
        assert!(!StateSnapshot::default().is_observed());
    }

    #[test]
    fn test_absorb_keeps_faucet_time() {
        let faucet_time = Utc::now();
        let mut stored = StateSnapshot {
            last_faucet_time: Some(faucet_time),
            ..Default::default()
        };

        stored.absorb(StateSnapshot::observed(3.0, vec![], vec!["a".into()], 5));

        assert_eq!(stored.balance, 3.0);
        assert_eq!(stored.signatures, vec!["a".to_string()]);
        assert_eq!(stored.last_faucet_time, Some(faucet_time));
    }
}
