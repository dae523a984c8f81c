//! Position health and liquidation sizing.
//!
//! Pure computation over a user record, the pool registry and a price
//! snapshot. Values are in USD, amounts in native units.
//!
//! For a liquidatable position the planner seizes from the largest deposit
//! and repays the largest borrow. The USD size `X` is chosen so that the
//! borrow-limit-used ratio lands on `post_factor`:
//!
//! ```text
//! (B - X) / (L - X * ltv) = post_factor
//! X = (B - L * post_factor) / (1 - post_factor * ltv)
//! ```

use liquidator_ledger::UserRecord;
use smallvec::SmallVec;
use std::collections::HashMap;

use crate::config::LiquidationConfig;
use crate::pool::{PoolId, PoolRegistry};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    /// Target borrow-limit-used ratio after liquidation
    pub post_factor: f64,
    /// Fraction of the ideal collateral accepted as minimum output
    pub collateral_haircut: f64,
    /// Fraction of the ideal borrowed amount offered for repayment
    pub repay_haircut: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from(&LiquidationConfig::default())
    }
}

impl From<&LiquidationConfig> for PlannerConfig {
    fn from(config: &LiquidationConfig) -> Self {
        Self {
            post_factor: config.post_factor,
            collateral_haircut: config.collateral_haircut,
            repay_haircut: config.repay_haircut,
        }
    }
}

/// Amount and USD value held in one pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolValue {
    pub pool_id: PoolId,
    /// Native units
    pub amount: u64,
    pub value_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionHealth {
    pub deposits: SmallVec<[PoolValue; 4]>,
    pub borrows: SmallVec<[PoolValue; 4]>,
    pub total_deposit_value: f64,
    pub total_borrow_value: f64,
    /// Sum of deposit values weighted by each pool's LTV
    pub total_borrow_limit: f64,
    /// `total_borrow_value / total_borrow_limit`; `None` when either is zero
    pub borrow_limit_used_ratio: Option<f64>,
    /// `total_deposit_value / total_borrow_value * 100`; `None` without borrows
    pub collateral_ratio: Option<f64>,
}

impl PositionHealth {
    pub fn is_liquidatable(&self) -> bool {
        self.borrow_limit_used_ratio.is_some_and(|r| r > 1.0)
    }

    /// Highest-value deposit; the first one wins a tie.
    pub fn largest_deposit(&self) -> Option<PoolValue> {
        largest(&self.deposits)
    }

    /// Highest-value borrow; the first one wins a tie.
    pub fn largest_borrow(&self) -> Option<PoolValue> {
        largest(&self.borrows)
    }
}

fn largest(values: &[PoolValue]) -> Option<PoolValue> {
    let mut best: Option<PoolValue> = None;
    for value in values {
        if best.map_or(true, |b| value.value_usd > b.value_usd) {
            best = Some(*value);
        }
    }
    best
}

/// Parameters of one liquidation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidationPlan {
    pub collateral_pool: PoolId,
    /// Minimum collateral to receive, native units
    pub min_collateral_out: u64,
    pub borrowed_pool: PoolId,
    /// Maximum borrowed asset to repay, native units
    pub max_borrowed_in: u64,
    /// USD size before haircuts
    pub size_usd: f64,
    /// Borrow-limit-used ratio at planning time
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("no price for pool {pool_id}")]
    MissingPrice { pool_id: PoolId },

    #[error("position references unknown pool {pool_id}")]
    UnknownPool { pool_id: PoolId },

    #[error("no position to evaluate (zero borrows or zero borrow limit)")]
    NoPosition,

    #[error("position is healthy (ratio {ratio:.4})")]
    Healthy { ratio: f64 },

    #[error("position has no collateral value")]
    NoCollateral,

    #[error("position has no borrow value")]
    NoBorrow,

    #[error("sizing undefined for post_factor {post_factor} and ltv {ltv}")]
    IllDefined { post_factor: f64, ltv: f64 },

    #[error("liquidation size is not positive ({size_usd})")]
    NonPositiveSize { size_usd: f64 },
}

/// USD amount to move from borrow to repaid so the ratio lands on
/// `post_factor`. `None` when `1 - post_factor * ltv <= 0`.
pub fn liquidation_size_usd(
    total_borrow_value: f64,
    total_borrow_limit: f64,
    post_factor: f64,
    ltv: f64,
) -> Option<f64> {
    let denominator = 1.0 - post_factor * ltv;
    if !(denominator > 0.0) {
        return None;
    }
    Some((total_borrow_value - total_borrow_limit * post_factor) / denominator)
}

#[derive(Debug, Clone, Default)]
pub struct LiquidationPlanner {
    config: PlannerConfig,
}

impl LiquidationPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Value a position. Entries in the same pool are summed.
    pub fn assess(
        &self,
        record: &UserRecord,
        pools: &PoolRegistry,
        prices: &HashMap<PoolId, f64>,
    ) -> Result<PositionHealth, PlanError> {
        let mut deposits: SmallVec<[PoolValue; 4]> = SmallVec::new();
        let mut borrows: SmallVec<[PoolValue; 4]> = SmallVec::new();
        let mut total_deposit_value = 0.0;
        let mut total_borrow_value = 0.0;
        let mut total_borrow_limit = 0.0;

        for asset in &record.assets {
            if asset.deposit_amount == 0 && asset.borrow_amount == 0 {
                continue;
            }
            let pool = pools.get(asset.pool_id).ok_or(PlanError::UnknownPool {
                pool_id: asset.pool_id,
            })?;
            let price = *prices.get(&asset.pool_id).ok_or(PlanError::MissingPrice {
                pool_id: asset.pool_id,
            })?;

            if asset.deposit_amount > 0 {
                let value = price * asset.deposit_amount as f64 / pool.scale();
                total_deposit_value += value;
                total_borrow_limit += value * pool.ltv;
                accumulate(&mut deposits, pool.id, asset.deposit_amount, value);
            }
            if asset.borrow_amount > 0 {
                let value = price * asset.borrow_amount as f64 / pool.scale();
                total_borrow_value += value;
                accumulate(&mut borrows, pool.id, asset.borrow_amount, value);
            }
        }

        let borrow_limit_used_ratio = (total_borrow_value != 0.0 && total_borrow_limit != 0.0)
            .then(|| total_borrow_value / total_borrow_limit);
        let collateral_ratio =
            (total_borrow_value != 0.0).then(|| total_deposit_value / total_borrow_value * 100.0);

        Ok(PositionHealth {
            deposits,
            borrows,
            total_deposit_value,
            total_borrow_value,
            total_borrow_limit,
            borrow_limit_used_ratio,
            collateral_ratio,
        })
    }

    /// Assess and, if liquidatable, size a liquidation.
    pub fn plan(
        &self,
        record: &UserRecord,
        pools: &PoolRegistry,
        prices: &HashMap<PoolId, f64>,
    ) -> Result<LiquidationPlan, PlanError> {
        let health = self.assess(record, pools, prices)?;
        self.plan_for(&health, pools, prices)
    }

    /// Size a liquidation for an already assessed position.
    pub fn plan_for(
        &self,
        health: &PositionHealth,
        pools: &PoolRegistry,
        prices: &HashMap<PoolId, f64>,
    ) -> Result<LiquidationPlan, PlanError> {
        let ratio = health.borrow_limit_used_ratio.ok_or(PlanError::NoPosition)?;
        if ratio <= 1.0 {
            return Err(PlanError::Healthy { ratio });
        }

        let collateral = health
            .largest_deposit()
            .filter(|d| d.value_usd > 0.0)
            .ok_or(PlanError::NoCollateral)?;
        let borrowed = health
            .largest_borrow()
            .filter(|b| b.value_usd > 0.0)
            .ok_or(PlanError::NoBorrow)?;

        let collateral_pool = pools.get(collateral.pool_id).ok_or(PlanError::UnknownPool {
            pool_id: collateral.pool_id,
        })?;
        let borrowed_pool = pools.get(borrowed.pool_id).ok_or(PlanError::UnknownPool {
            pool_id: borrowed.pool_id,
        })?;

        let post_factor = self.config.post_factor;
        let ltv = collateral_pool.ltv;
        let ideal = liquidation_size_usd(
            health.total_borrow_value,
            health.total_borrow_limit,
            post_factor,
            ltv,
        )
        .ok_or(PlanError::IllDefined { post_factor, ltv })?;

        let size_usd = ideal.min(collateral.value_usd).min(borrowed.value_usd);
        if !(size_usd > 0.0) {
            return Err(PlanError::NonPositiveSize { size_usd });
        }

        let collateral_price = price_of(prices, collateral.pool_id)?;
        let borrowed_price = price_of(prices, borrowed.pool_id)?;

        let collateral_native = size_usd / collateral_price * collateral_pool.scale();
        let borrowed_native = size_usd / borrowed_price * borrowed_pool.scale();

        let min_collateral_out =
            to_native(collateral_native * self.config.collateral_haircut).min(collateral.amount);
        let max_borrowed_in =
            to_native(borrowed_native * self.config.repay_haircut).min(borrowed.amount);

        if min_collateral_out == 0 || max_borrowed_in == 0 {
            return Err(PlanError::NonPositiveSize { size_usd });
        }

        Ok(LiquidationPlan {
            collateral_pool: collateral.pool_id,
            min_collateral_out,
            borrowed_pool: borrowed.pool_id,
            max_borrowed_in,
            size_usd,
            ratio,
        })
    }
}

fn accumulate(values: &mut SmallVec<[PoolValue; 4]>, pool_id: PoolId, amount: u64, value: f64) {
    match values.iter_mut().find(|v| v.pool_id == pool_id) {
        Some(existing) => {
            existing.amount = existing.amount.saturating_add(amount);
            existing.value_usd += value;
        }
        None => values.push(PoolValue {
            pool_id,
            amount,
            value_usd: value,
        }),
    }
}

fn price_of(prices: &HashMap<PoolId, f64>, pool_id: PoolId) -> Result<f64, PlanError> {
    prices
        .get(&pool_id)
        .copied()
        .filter(|p| *p > 0.0)
        .ok_or(PlanError::MissingPrice { pool_id })
}

/// Round down to whole native units, saturating at the `u64` range.
fn to_native(amount: f64) -> u64 {
    if !(amount > 0.0) {
        return 0;
    }
    amount.floor() as u64
}
