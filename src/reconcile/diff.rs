//! Snapshot comparison
//!
//! Pure functions only; nothing here touches the store or the network.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

use crate::wallet::StateSnapshot;

/// Balance movement between two snapshots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceChange {
    pub old: f64,
    pub new: f64,
}

/// What changed between the stored baseline and a fresh read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub balance: Option<BalanceChange>,
    pub positions_changed: bool,
    pub new_signatures: BTreeSet<String>,
}

impl ChangeSet {
    pub fn balance_changed(&self) -> bool {
        self.balance.is_some()
    }

    /// No dimension changed: no alert
    pub fn is_empty(&self) -> bool {
        self.balance.is_none() && !self.positions_changed && self.new_signatures.is_empty()
    }

    /// Alert text naming each changed dimension
    pub fn summary(&self) -> String {
        let mut text = String::from("Wallet update:");

        if let Some(change) = self.balance {
            let _ = write!(
                text,
                "\n- Balance changed: {:.4} SOL -> {:.4} SOL",
                change.old, change.new
            );
        }

        if self.positions_changed {
            text.push_str("\n- Liquidity positions changed");
        }

        if !self.new_signatures.is_empty() {
            let _ = write!(text, "\n- {} new transaction(s):", self.new_signatures.len());
            for sig in &self.new_signatures {
                let _ = write!(text, "\n  {}", sig);
            }
        }

        text
    }
}

/// Round to 4 decimal places, as an integer count of 0.0001 units
///
/// Repeated float balance reads wobble below this precision.
fn round4(value: f64) -> i64 {
    (value * 10_000.0).round() as i64
}

/// Compare two snapshots
///
/// - balance: differs after rounding to 4 decimals
/// - positions: ordered (pool, lower_bin, upper_bin, liquidity) tuples differ;
///   fees are ignored
/// - signatures: entries of `new` missing from `old`
pub fn diff(old: &StateSnapshot, new: &StateSnapshot) -> ChangeSet {
    let balance = (round4(old.balance) != round4(new.balance)).then_some(BalanceChange {
        old: old.balance,
        new: new.balance,
    });

    let positions_changed = !old
        .positions
        .iter()
        .map(|p| p.structure())
        .eq(new.positions.iter().map(|p| p.structure()));

    let seen: HashSet<&str> = old.signatures.iter().map(String::as_str).collect();
    let new_signatures = new
        .signatures
        .iter()
        .filter(|s| !seen.contains(s.as_str()))
        .cloned()
        .collect();

    ChangeSet {
        balance,
        positions_changed,
        new_signatures,
    }
}
