//! Wallet management module
//!
//! Owns every registered wallet and its last observed state:
//! - Wallet registry (create, import, lookup) in `wallets.json`
//! - Per-owner state snapshots in `snapshots.json`
//!
//! # Architecture
//!
//! ```text
//! ReconciliationScheduler ─┐
//!                          ├─→ WalletStore ─→ wallets.json / snapshots.json
//! FaucetLimiter ───────────┘
//! ```
//!
//! No other component mutates records or snapshots directly.

pub mod store;
pub mod types;

pub use store::{decode_secret_key, WalletStore};
pub use types::{OwnerId, StateSnapshot, WalletRecord, WalletRegistry, SECRET_KEY_LEN};
