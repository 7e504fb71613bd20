//! Liquidity Watch Library
//!
//! Wallet reconciliation and alerting for a simulated Solana liquidity manager.

pub mod cli;
pub mod config;
pub mod error;
pub mod faucet;
pub mod liquidity;
pub mod persist;
pub mod reconcile;
pub mod rpc;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
