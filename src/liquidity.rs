//! Liquidity positions and the liquidity-management collaborator
//!
//! The position math and transaction signing are simulated: submissions
//! return synthetic transaction signatures and update a book that the
//! position query reads back. `lpwatch liquidity` commands and the daemon
//! share the book through `positions.json` in the data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic, FileLock, LOCKS_DIR};

const POSITIONS_FILE: &str = "positions.json";
const POSITIONS_LOCK: &str = "positions.lock";

/// A concentrated-liquidity position in one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Pool address
    pub pool: String,
    pub lower_bin: i32,
    pub upper_bin: i32,
    /// Liquidity in whole-coin units
    pub liquidity: f64,
    /// Accrued fees in whole-coin units
    pub fees_earned: f64,
}

impl Position {
    /// Build a validated position
    pub fn new(
        pool: impl Into<String>,
        lower_bin: i32,
        upper_bin: i32,
        liquidity: f64,
        fees_earned: f64,
    ) -> Result<Self> {
        let pool = pool.into();
        if pool.is_empty() {
            return Err(Error::InvalidPosition("empty pool address".into()));
        }
        if lower_bin > upper_bin {
            return Err(Error::InvalidPosition(format!(
                "lower bin {} above upper bin {}",
                lower_bin, upper_bin
            )));
        }
        if !(liquidity.is_finite() && liquidity >= 0.0) {
            return Err(Error::InvalidPosition(format!("liquidity {}", liquidity)));
        }
        if !(fees_earned.is_finite() && fees_earned >= 0.0) {
            return Err(Error::InvalidPosition(format!("fees earned {}", fees_earned)));
        }

        Ok(Self {
            pool,
            lower_bin,
            upper_bin,
            liquidity,
            fees_earned,
        })
    }

    /// The fields that make a position "the same" across reads
    ///
    /// Fees accrue continuously and are left out.
    pub fn structure(&self) -> (&str, i32, i32, f64) {
        (&self.pool, self.lower_bin, self.upper_bin, self.liquidity)
    }
}

/// Query side: positions currently held by an address
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn get_positions_for_address(&self, address: &Pubkey) -> Result<Vec<Position>>;
}

/// Submission side: add or remove liquidity, returning a transaction signature
#[async_trait]
pub trait LiquidityDesk: Send + Sync {
    async fn submit_add_liquidity(
        &self,
        owner: &Pubkey,
        pool: &str,
        lower_bin: i32,
        upper_bin: i32,
        amount: f64,
    ) -> Result<String>;

    async fn submit_remove_liquidity(&self, owner: &Pubkey, pool: &str) -> Result<String>;
}

/// Positions keyed by base58 owner address
type Book = BTreeMap<String, Vec<Position>>;

#[derive(Debug)]
struct BookFiles {
    path: PathBuf,
    lock: PathBuf,
}

/// Liquidity book with synthetic signatures
///
/// Built with [`new`](Self::new) the book lives in memory only; built with
/// [`open`](Self::open) every query reads the file and every submission
/// rewrites it under a lock file.
#[derive(Debug, Default)]
pub struct SimulatedLiquidity {
    files: Option<BookFiles>,
    book: RwLock<Book>,
    write_lock: Mutex<()>,
}

impl SimulatedLiquidity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the book stored in a data directory
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir.join(LOCKS_DIR))
            .await
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", data_dir.display(), e)))?;

        let files = BookFiles {
            path: data_dir.join(POSITIONS_FILE),
            lock: data_dir.join(LOCKS_DIR).join(POSITIONS_LOCK),
        };
        let book: Book = read_json(&files.path).await?.unwrap_or_default();
        debug!("Loaded positions for {} address(es)", book.len());

        Ok(Self {
            files: Some(files),
            book: RwLock::new(book),
            write_lock: Mutex::new(()),
        })
    }

    /// Accrue fees on every position in a pool (simulates passage of time)
    ///
    /// Returns the number of positions credited.
    pub async fn accrue_fees(&self, pool: &str, amount: f64) -> Result<usize> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(Error::InvalidPosition(format!("fee amount {}", amount)));
        }

        let credited = self
            .mutate(|book| {
                let mut credited = 0;
                for position in book.values_mut().flatten().filter(|p| p.pool == pool) {
                    position.fees_earned += amount;
                    credited += 1;
                }
                Ok(credited)
            })
            .await?;

        info!("Accrued {} fees on {} position(s) in {}", amount, credited, pool);
        Ok(credited)
    }

    /// Latest book, re-read from disk when persisted
    async fn current(&self) -> Result<Book> {
        match &self.files {
            Some(files) => {
                let book: Book = read_json(&files.path).await?.unwrap_or_default();
                *self.book.write().await = book.clone();
                Ok(book)
            }
            None => Ok(self.book.read().await.clone()),
        }
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Book) -> Result<T>,
    {
        let _write = self.write_lock.lock().await;
        let _file = match &self.files {
            Some(files) => Some(FileLock::acquire(&files.lock).await?),
            None => None,
        };

        let mut book = self.current().await?;
        let out = f(&mut book)?;
        book.retain(|_, positions| !positions.is_empty());

        if let Some(files) = &self.files {
            write_json_atomic(&files.path, &book).await?;
        }
        *self.book.write().await = book;
        Ok(out)
    }
}

/// A random 64-byte signature, base58 encoded like a real one
fn synthetic_signature() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}

#[async_trait]
impl PositionSource for SimulatedLiquidity {
    async fn get_positions_for_address(&self, address: &Pubkey) -> Result<Vec<Position>> {
        let book = self
            .current()
            .await
            .map_err(|e| Error::UpstreamService(format!("position book unreadable: {}", e)))?;
        Ok(book.get(&address.to_string()).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl LiquidityDesk for SimulatedLiquidity {
    async fn submit_add_liquidity(
        &self,
        owner: &Pubkey,
        pool: &str,
        lower_bin: i32,
        upper_bin: i32,
        amount: f64,
    ) -> Result<String> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(Error::InvalidPosition(format!("amount {}", amount)));
        }
        let added = Position::new(pool, lower_bin, upper_bin, amount, 0.0)?;

        self.mutate(|book| {
            let positions = book.entry(owner.to_string()).or_default();
            match positions
                .iter_mut()
                .find(|p| p.pool == pool && p.lower_bin == lower_bin && p.upper_bin == upper_bin)
            {
                Some(existing) => existing.liquidity += amount,
                None => positions.push(added),
            }
            Ok(())
        })
        .await?;

        let signature = synthetic_signature();
        info!(
            "Added {} liquidity to {} [{}, {}] for {} (sig: {})",
            amount, pool, lower_bin, upper_bin, owner, signature
        );
        Ok(signature)
    }

    async fn submit_remove_liquidity(&self, owner: &Pubkey, pool: &str) -> Result<String> {
        self.mutate(|book| {
            let positions = book
                .get_mut(&owner.to_string())
                .ok_or_else(|| Error::UpstreamService(format!("no positions for {}", owner)))?;

            let before = positions.len();
            positions.retain(|p| p.pool != pool);
            if positions.len() == before {
                return Err(Error::UpstreamService(format!(
                    "no position in pool {} for {}",
                    pool, owner
                )));
            }
            Ok(())
        })
        .await?;

        let signature = synthetic_signature();
        debug!("Removed liquidity from {} for {} (sig: {})", pool, owner, signature);
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_validation() {
        assert!(Position::new("pool", 0, 10, 1.0, 0.0).is_ok());
        assert!(Position::new("pool", 10, 0, 1.0, 0.0).is_err());
        assert!(Position::new("pool", 0, 10, -1.0, 0.0).is_err());
        assert!(Position::new("pool", 0, 10, 1.0, f64::NAN).is_err());
        assert!(Position::new("", 0, 10, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_structure_ignores_fees() {
        let a = Position::new("pool", -5, 5, 2.5, 0.1).unwrap();
        let b = Position::new("pool", -5, 5, 2.5, 9.9).unwrap();
        assert_eq!(a.structure(), b.structure());
    }

    #[tokio::test]
    async fn test_add_then_query() {
        let desk = SimulatedLiquidity::new();
        let owner = Pubkey::new_unique();

        let sig = desk
            .submit_add_liquidity(&owner, "poolA", -10, 10, 1.5)
            .await
            .unwrap();
        assert!(bs58::decode(&sig).into_vec().unwrap().len() == 64);

        desk.submit_add_liquidity(&owner, "poolA", -10, 10, 0.5)
            .await
            .unwrap();

        let positions = desk.get_positions_for_address(&owner).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].liquidity, 2.0);
    }

    #[tokio::test]
    async fn test_remove_unknown_pool_fails() {
        let desk = SimulatedLiquidity::new();
        let owner = Pubkey::new_unique();
        desk.submit_add_liquidity(&owner, "poolA", 0, 1, 1.0)
            .await
            .unwrap();

        assert!(desk.submit_remove_liquidity(&owner, "poolB").await.is_err());
        assert!(desk.submit_remove_liquidity(&owner, "poolA").await.is_ok());
        assert!(desk
            .get_positions_for_address(&owner)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_accrue_fees_changes_only_fees() {
        let desk = SimulatedLiquidity::new();
        let owner = Pubkey::new_unique();
        desk.submit_add_liquidity(&owner, "poolA", 0, 1, 1.0)
            .await
            .unwrap();

        assert_eq!(desk.accrue_fees("poolA", 0.25).await.unwrap(), 1);
        assert_eq!(desk.accrue_fees("poolB", 0.25).await.unwrap(), 0);
        assert!(desk.accrue_fees("poolA", -1.0).await.is_err());

        let positions = desk.get_positions_for_address(&owner).await.unwrap();
        assert_eq!(positions[0].fees_earned, 0.25);
        assert_eq!(positions[0].liquidity, 1.0);
    }

    #[tokio::test]
    async fn test_persisted_book_is_shared_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Pubkey::new_unique();

        // The daemon's view, opened before the command ran
        let daemon = SimulatedLiquidity::open(dir.path()).await.unwrap();
        let command = SimulatedLiquidity::open(dir.path()).await.unwrap();

        command
            .submit_add_liquidity(&owner, "poolA", -3, 3, 4.0)
            .await
            .unwrap();
        let positions = daemon.get_positions_for_address(&owner).await.unwrap();
        assert_eq!(positions, vec![Position::new("poolA", -3, 3, 4.0, 0.0).unwrap()]);

        // A stale writer still builds on the other instance's positions
        daemon
            .submit_add_liquidity(&owner, "poolB", 0, 2, 1.0)
            .await
            .unwrap();
        command.accrue_fees("poolA", 0.5).await.unwrap();

        let reopened = SimulatedLiquidity::open(dir.path()).await.unwrap();
        let positions = reopened.get_positions_for_address(&owner).await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].fees_earned, 0.5);
        assert_eq!(positions[1].pool, "poolB");
    }

    #[tokio::test]
    async fn test_remove_last_position_drops_address() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Pubkey::new_unique();
        let desk = SimulatedLiquidity::open(dir.path()).await.unwrap();

        desk.submit_add_liquidity(&owner, "poolA", 0, 1, 1.0)
            .await
            .unwrap();
        desk.submit_remove_liquidity(&owner, "poolA").await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(POSITIONS_FILE)).unwrap();
        assert!(!raw.contains(&owner.to_string()));
        assert!(desk.submit_remove_liquidity(&owner, "poolA").await.is_err());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_range() {
        let desk = SimulatedLiquidity::new();
        let owner = Pubkey::new_unique();

        assert!(desk
            .submit_add_liquidity(&owner, "poolA", 5, -5, 1.0)
            .await
            .is_err());
        assert!(desk
            .submit_add_liquidity(&owner, "poolA", 0, 5, 0.0)
            .await
            .is_err());
        assert!(desk
            .get_positions_for_address(&owner)
            .await
            .unwrap()
            .is_empty());
    }
}
