//! Remote chain access
//!
//! ```text
//! RemoteClient ─→ RetryExecutor ─→ ChainEndpoint (primary)
//!      │                      └──→ ChainEndpoint (fallback, airdrop only)
//!      └─→ PositionSource
//! ```

pub mod client;
pub mod endpoint;
pub mod retry;

pub use client::RemoteClient;
pub use endpoint::{ChainEndpoint, SolanaEndpoint};
pub use retry::{BackoffShape, RetryExecutor, RetryPolicy};

use solana_sdk::native_token::LAMPORTS_PER_SOL;

/// Convert SOL to lamports
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamports_conversion() {
        assert_eq!(sol_to_lamports(2.0), 2_000_000_000);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
        assert_eq!(sol_to_lamports(0.001), 1_000_000);

        assert_eq!(lamports_to_sol(1_000_000_000), 1.0);
        assert_eq!(lamports_to_sol(500_000_000), 0.5);
        assert_eq!(lamports_to_sol(1_000_000), 0.001);
    }
}
