//! Pool registry built from the protocol's pool list.
//!
//! Pool ids are the pool's index in the on-ledger list. Retired slots
//! (null mint) keep their index but are not registered.

use liquidator_ledger::{PoolListEntry, Pubkey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a pool in the pool list.
pub type PoolId = u8;

/// Static parameters of one lending pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    /// Asset mint
    pub mint: Pubkey,
    /// Loan-to-value as a fraction (0.8 = 80%)
    pub ltv: f64,
    /// Decimals of the asset's native unit
    pub decimals: u8,
}

impl Pool {
    pub fn from_entry(id: PoolId, entry: &PoolListEntry) -> Self {
        Self {
            id,
            mint: entry.mint,
            ltv: entry.ltv_bps as f64 / 10_000.0,
            decimals: entry.decimals,
        }
    }

    /// Native units per whole token (`10^decimals`).
    pub fn scale(&self) -> f64 {
        10f64.powi(self.decimals as i32)
    }
}

/// All live pools, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, Pool>,
}

impl PoolRegistry {
    /// Build from decoded pool list entries. Entries past id 255 are ignored.
    pub fn from_entries(entries: &[PoolListEntry]) -> Self {
        let pools = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.mint.is_null())
            .filter_map(|(idx, e)| {
                let id = PoolId::try_from(idx).ok()?;
                Some((id, Pool::from_entry(id, e)))
            })
            .collect();
        Self { pools }
    }

    pub fn get(&self, id: PoolId) -> Option<&Pool> {
        self.pools.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn ids(&self) -> Vec<PoolId> {
        self.pools.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
