//! Latest USD price per pool.
//!
//! Written by price watchers, read by the sweep. A pool without an entry
//! has no price yet.

use dashmap::DashMap;
use liquidator_ledger::PriceRecord;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::pool::PoolId;

/// Cached price of one pool.
#[derive(Debug, Clone, Copy)]
pub struct PriceEntry {
    pub record: PriceRecord,
    /// Price in USD per whole token
    pub usd: f64,
    /// When the update was applied locally
    pub updated_at: Instant,
}

#[derive(Debug, Default)]
pub struct PriceTable {
    prices: DashMap<PoolId, PriceEntry>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest price of a pool. Returns the previous USD price.
    pub fn update(&self, pool_id: PoolId, record: PriceRecord) -> Option<f64> {
        let entry = PriceEntry {
            record,
            usd: record.price_usd(),
            updated_at: Instant::now(),
        };
        let previous = self.prices.insert(pool_id, entry).map(|p| p.usd);

        debug!(
            pool = pool_id,
            price = entry.usd,
            slot = record.slot,
            "Updated price cache"
        );
        previous
    }

    pub fn get(&self, pool_id: PoolId) -> Option<PriceEntry> {
        self.prices.get(&pool_id).map(|p| *p)
    }

    pub fn price_usd(&self, pool_id: PoolId) -> Option<f64> {
        self.prices.get(&pool_id).map(|p| p.usd)
    }

    pub fn has_price(&self, pool_id: PoolId) -> bool {
        self.prices.contains_key(&pool_id)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Consistent copy for one sweep.
    pub fn snapshot(&self) -> HashMap<PoolId, f64> {
        self.prices.iter().map(|e| (*e.key(), e.value().usd)).collect()
    }

    /// Pools among `ids` that have no price yet.
    pub fn missing(&self, ids: &[PoolId]) -> Vec<PoolId> {
        ids.iter().copied().filter(|id| !self.has_price(*id)).collect()
    }
}
