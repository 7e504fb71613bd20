//! Durable wallet registry and snapshot store
//!
//! Two human-readable files live under the data directory:
//! `wallets.json` (owner -> keypair) and `snapshots.json` (owner -> last
//! observed state). Every write replaces the whole file through a temp file
//! and a rename, so a crash leaves either the old or the new contents.
//!
//! The daemon and one-shot CLI commands open the same directory. Each write
//! takes the store lock file, re-reads the file from disk, applies its
//! change there and writes the result back, so a change made by another
//! process is never overwritten with a stale in-memory copy. Reads are
//! served from memory; call [`WalletStore::refresh`] to pick up other
//! processes' writes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use solana_sdk::signature::Keypair;
use solana_sdk::signer::keypair::keypair_from_seed;
use solana_sdk::signer::Signer;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic, FileLock, LOCKS_DIR};

use super::types::{OwnerId, StateSnapshot, WalletRecord, WalletRegistry, SECRET_KEY_LEN};

const WALLETS_FILE: &str = "wallets.json";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const STORE_LOCK: &str = "store.lock";

type Wallets = HashMap<OwnerId, WalletRecord>;
type Snapshots = HashMap<OwnerId, StateSnapshot>;

/// Registry of wallets and their snapshots
pub struct WalletStore {
    data_dir: PathBuf,
    wallets: RwLock<Wallets>,
    snapshots: RwLock<Snapshots>,
    /// Serializes writers inside this process before they queue on the file lock
    write_lock: Mutex<()>,
}

impl WalletStore {
    /// Open the store, loading any existing files
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(data_dir.join(LOCKS_DIR))
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", data_dir.display(), e)))?;

        let wallets = load_wallets(&data_dir).await?;
        let snapshots = load_snapshots(&data_dir).await?;

        let orphaned = snapshots.keys().filter(|o| !wallets.contains_key(o)).count();
        if orphaned > 0 {
            warn!("{} snapshot(s) have no matching wallet", orphaned);
        }

        info!(
            "Loaded {} wallet(s) and {} snapshot(s) from {}",
            wallets.len(),
            snapshots.len(),
            data_dir.display()
        );

        Ok(Self {
            data_dir,
            wallets: RwLock::new(wallets),
            snapshots: RwLock::new(snapshots),
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reload both files, picking up writes from other processes
    pub async fn refresh(&self) -> Result<()> {
        let wallets = load_wallets(&self.data_dir).await?;
        let snapshots = load_snapshots(&self.data_dir).await?;

        let mut current = self.wallets.write().await;
        if current.len() != wallets.len() {
            debug!("Wallet registry now holds {} wallet(s)", wallets.len());
        }
        *current = wallets;
        drop(current);

        *self.snapshots.write().await = snapshots;
        Ok(())
    }

    /// Generate and store a fresh wallet, replacing any existing one
    pub async fn create(&self, owner: &OwnerId) -> Result<WalletRecord> {
        let keypair = Keypair::new();
        let record = WalletRecord::from_keypair(owner.clone(), &keypair);
        self.put(record.clone()).await?;

        info!("Created wallet {} for owner {}", record.public_key, owner);
        Ok(record)
    }

    /// Import a base58-encoded 64-byte secret key, replacing any existing wallet
    pub async fn import(&self, owner: &OwnerId, secret_base58: &str) -> Result<WalletRecord> {
        let keypair = decode_secret_key(secret_base58)?;
        let record = WalletRecord::from_keypair(owner.clone(), &keypair);
        self.put(record.clone()).await?;

        info!("Imported wallet {} for owner {}", record.public_key, owner);
        Ok(record)
    }

    pub async fn get(&self, owner: &OwnerId) -> Option<WalletRecord> {
        self.wallets.read().await.get(owner).cloned()
    }

    /// All registered owners, in stable order
    pub async fn owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.wallets.read().await.keys().cloned().collect();
        owners.sort();
        owners
    }

    /// All wallet records, ordered by owner
    pub async fn list(&self) -> Vec<WalletRecord> {
        let mut records: Vec<WalletRecord> = self.wallets.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        records
    }

    /// Delete an owner's wallet and snapshot
    pub async fn remove(&self, owner: &OwnerId) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let _file = self.lock_files().await?;

        let mut wallets = load_wallets(&self.data_dir).await?;
        if wallets.remove(owner).is_none() {
            *self.wallets.write().await = wallets;
            return Err(Error::WalletNotFound(owner.to_string()));
        }
        let mut snapshots = load_snapshots(&self.data_dir).await?;
        snapshots.remove(owner);

        self.save_wallets(wallets).await?;
        self.save_snapshots(snapshots).await?;

        info!("Removed wallet for owner {}", owner);
        Ok(())
    }

    /// Stored snapshot, or the zero snapshot for an owner never seen before
    pub async fn snapshot(&self, owner: &OwnerId) -> StateSnapshot {
        self.snapshots
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Atomically replace an owner's snapshot and persist it
    pub async fn update_snapshot(&self, owner: &OwnerId, snapshot: StateSnapshot) -> Result<()> {
        self.modify_snapshot(owner, move |s| *s = snapshot).await?;
        Ok(())
    }

    /// Read-modify-write an owner's snapshot against the file on disk
    ///
    /// `f` sees the latest persisted snapshot, including fields written by
    /// other processes since this store last read the file.
    pub async fn modify_snapshot<F>(&self, owner: &OwnerId, f: F) -> Result<StateSnapshot>
    where
        F: FnOnce(&mut StateSnapshot),
    {
        let _write = self.write_lock.lock().await;
        let _file = self.lock_files().await?;

        let mut snapshots = load_snapshots(&self.data_dir).await?;
        let updated = {
            let snapshot = snapshots.entry(owner.clone()).or_default();
            f(snapshot);
            snapshot.clone()
        };
        self.save_snapshots(snapshots).await?;

        Ok(updated)
    }

    async fn put(&self, record: WalletRecord) -> Result<()> {
        let owner = record.owner_id.clone();
        let _write = self.write_lock.lock().await;
        let _file = self.lock_files().await?;

        let mut wallets = load_wallets(&self.data_dir).await?;
        if let Some(old) = wallets.insert(owner.clone(), record) {
            debug!("Replacing wallet {} for owner {}", old.public_key, owner);
        }

        self.save_wallets(wallets).await
    }

    async fn lock_files(&self) -> Result<FileLock> {
        FileLock::acquire(self.data_dir.join(LOCKS_DIR).join(STORE_LOCK)).await
    }

    /// Persist, then adopt the written state as the in-memory view
    async fn save_wallets(&self, wallets: Wallets) -> Result<()> {
        let mut records: Vec<WalletRecord> = wallets.values().cloned().collect();
        records.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));

        let registry = WalletRegistry {
            wallets: records,
            ..Default::default()
        };
        write_json_atomic(&self.data_dir.join(WALLETS_FILE), &registry).await?;

        debug!("Saved {} wallet(s)", registry.wallets.len());
        *self.wallets.write().await = wallets;
        Ok(())
    }

    async fn save_snapshots(&self, snapshots: Snapshots) -> Result<()> {
        let ordered: BTreeMap<&OwnerId, &StateSnapshot> = snapshots.iter().collect();
        write_json_atomic(&self.data_dir.join(SNAPSHOTS_FILE), &ordered).await?;

        debug!("Saved {} snapshot(s)", snapshots.len());
        *self.snapshots.write().await = snapshots;
        Ok(())
    }
}

async fn load_wallets(data_dir: &Path) -> Result<Wallets> {
    match read_json::<WalletRegistry>(&data_dir.join(WALLETS_FILE)).await? {
        Some(registry) => Ok(registry
            .wallets
            .into_iter()
            .map(|w| (w.owner_id.clone(), w))
            .collect()),
        None => {
            debug!("{} not found, starting empty registry", WALLETS_FILE);
            Ok(HashMap::new())
        }
    }
}

async fn load_snapshots(data_dir: &Path) -> Result<Snapshots> {
    Ok(read_json::<Snapshots>(&data_dir.join(SNAPSHOTS_FILE))
        .await?
        .unwrap_or_default())
}

/// Decode and validate an imported secret key
///
/// The public half must match the key derived from the seed half.
pub fn decode_secret_key(secret_base58: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret_base58.trim())
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("not valid base58: {}", e)))?;

    if bytes.len() != SECRET_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "expected {} bytes, got {}",
            SECRET_KEY_LEN,
            bytes.len()
        )));
    }

    let keypair = keypair_from_seed(&bytes[..32])
        .map_err(|e| Error::InvalidKey(format!("bad seed: {}", e)))?;

    if keypair.pubkey().to_bytes()[..] != bytes[32..] {
        return Err(Error::InvalidKey(
            "public key does not match secret seed".to_string(),
        ));
    }

    Ok(keypair)
}
