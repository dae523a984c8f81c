//! Ledger scenario replayed by the in-process ledger.
//!
//! A scenario lists pools with their starting prices, users with their
//! balances and page, and optional scripted price moves.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use liquidator_ledger::codec::{
    encode_index_page, encode_pool_list, encode_price, encode_user_record, MAX_USER_ASSETS,
    PRICE_SCALE,
};
use liquidator_ledger::{
    AddressDeriver, AddressKind, MemoryLedger, PoolListEntry, PriceRecord, Pubkey, UserRecord,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Wallet the dry-run submitter signs as
    pub liquidator: Pubkey,
    pub pools: Vec<ScenarioPool>,
    #[serde(default)]
    pub users: Vec<ScenarioUser>,
    #[serde(default)]
    pub price_moves: Vec<PriceMove>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioPool {
    pub mint: Pubkey,
    pub ltv_bps: u16,
    pub decimals: u8,
    /// Starting USD price
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioUser {
    pub wallet: Pubkey,
    pub page: u32,
    #[serde(default)]
    pub assets: Vec<ScenarioAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAsset {
    pub pool: u8,
    #[serde(default)]
    pub deposit: u64,
    #[serde(default)]
    pub borrow: u64,
}

/// Price change applied `after_secs` into the run.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceMove {
    pub after_secs: u64,
    pub pool: u8,
    pub price: f64,
}

fn price_e8(price: f64) -> u64 {
    (price * PRICE_SCALE).round().max(0.0) as u64
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Reading scenario {}", path.display()))?;
        let scenario: Self = toml::from_str(&content)
            .with_context(|| format!("Parsing scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        for user in &self.users {
            if user.assets.len() > MAX_USER_ASSETS {
                anyhow::bail!(
                    "User {} has {} assets, a record holds at most {}",
                    user.wallet,
                    user.assets.len(),
                    MAX_USER_ASSETS
                );
            }
            for asset in &user.assets {
                if self.pools.get(asset.pool as usize).is_none() {
                    anyhow::bail!("User {} references unknown pool {}", user.wallet, asset.pool);
                }
            }
        }
        for change in &self.price_moves {
            if self.pools.get(change.pool as usize).is_none() {
                anyhow::bail!("Price move references unknown pool {}", change.pool);
            }
        }
        Ok(())
    }

    /// Write pool list, prices, user records and pages.
    pub fn seed(&self, ledger: &MemoryLedger, deriver: &dyn AddressDeriver) {
        let entries: Vec<PoolListEntry> = self
            .pools
            .iter()
            .map(|p| PoolListEntry {
                mint: p.mint,
                ltv_bps: p.ltv_bps,
                decimals: p.decimals,
            })
            .collect();
        ledger.set_account(
            deriver.derive_address(&AddressKind::PoolList),
            encode_pool_list(&entries),
        );

        for pool in &self.pools {
            write_price(ledger, deriver, pool.mint, pool.price, 1);
        }

        let mut pages: BTreeMap<u32, Vec<Pubkey>> = BTreeMap::new();
        for user in &self.users {
            let mut record = UserRecord::new(user.wallet, user.page);
            for asset in &user.assets {
                record = record.with_asset(asset.pool, asset.deposit, asset.borrow);
            }
            ledger.set_account(
                deriver.derive_address(&AddressKind::UserRecord {
                    wallet: user.wallet,
                }),
                encode_user_record(&record),
            );
            pages.entry(user.page).or_default().push(user.wallet);
        }

        for (page_id, wallets) in &pages {
            ledger.set_account(
                deriver.derive_address(&AddressKind::UsersPage { page_id: *page_id }),
                encode_index_page(wallets),
            );
        }

        info!(
            pools = self.pools.len(),
            users = self.users.len(),
            pages = pages.len(),
            "Scenario seeded"
        );
    }

    /// Apply the scripted price moves in order until shutdown.
    pub fn spawn_price_moves(
        &self,
        ledger: Arc<MemoryLedger>,
        deriver: Arc<dyn AddressDeriver>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut moves: Vec<(PriceMove, Pubkey)> = self
            .price_moves
            .iter()
            .filter_map(|m| {
                self.pools
                    .get(m.pool as usize)
                    .map(|p| (m.clone(), p.mint))
            })
            .collect();
        moves.sort_by_key(|(m, _)| m.after_secs);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for (slot, (change, mint)) in (2u64..).zip(moves) {
                let at = start + Duration::from_secs(change.after_secs);
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = shutdown.changed() => return,
                }
                info!(pool = change.pool, price = change.price, "Scripted price move");
                write_price(&ledger, deriver.as_ref(), mint, change.price, slot);
            }
        })
    }
}

fn write_price(ledger: &MemoryLedger, deriver: &dyn AddressDeriver, mint: Pubkey, price: f64, slot: u64) {
    ledger.set_account(
        deriver.derive_address(&AddressKind::AssetPrice { mint }),
        encode_price(&PriceRecord {
            mint,
            price_e8: price_e8(price),
            slot,
        }),
    );
}
