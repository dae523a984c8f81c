//! Liquidation transaction submission.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pubkey::Pubkey;

/// Parameters of one liquidation call. Amounts are native (base) units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationRequest {
    /// Wallet being liquidated
    pub target_wallet: Pubkey,
    /// Liquidator's token account receiving collateral
    pub collateral_account: Pubkey,
    /// Liquidator's token account paying the borrowed asset
    pub borrowed_account: Pubkey,
    pub collateral_mint: Pubkey,
    pub borrowed_mint: Pubkey,
    /// Minimum collateral the liquidator accepts
    pub min_collateral_out: u64,
    /// Maximum borrowed amount the liquidator repays
    pub max_borrowed_in: u64,
}

/// Signs and sends liquidation transactions.
#[async_trait]
pub trait LiquidationSubmitter: Send + Sync {
    /// Wallet of the liquidator (owner of the token accounts).
    fn liquidator(&self) -> Pubkey;

    /// Submit one liquidation. Returns an opaque receipt (e.g. a signature).
    async fn submit_liquidation(&self, request: &LiquidationRequest) -> Result<String>;
}

/// A request captured by [`DryRunSubmitter`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordedLiquidation {
    pub request: LiquidationRequest,
    pub submitted_at: DateTime<Utc>,
}

/// Submitter that records requests instead of sending them.
pub struct DryRunSubmitter {
    liquidator: Pubkey,
    /// Reject every request with this message (failure drills)
    reject_with: Option<String>,
    recorded: Mutex<Vec<RecordedLiquidation>>,
}

impl DryRunSubmitter {
    pub fn new(liquidator: Pubkey) -> Self {
        Self {
            liquidator,
            reject_with: None,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Record requests but report every submission as failed.
    pub fn rejecting(liquidator: Pubkey, message: impl Into<String>) -> Self {
        Self {
            reject_with: Some(message.into()),
            ..Self::new(liquidator)
        }
    }

    pub fn recorded(&self) -> Vec<RecordedLiquidation> {
        self.recorded.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.recorded.lock().len()
    }
}

#[async_trait]
impl LiquidationSubmitter for DryRunSubmitter {
    fn liquidator(&self) -> Pubkey {
        self.liquidator
    }

    async fn submit_liquidation(&self, request: &LiquidationRequest) -> Result<String> {
        let receipt = {
            let mut recorded = self.recorded.lock();
            recorded.push(RecordedLiquidation {
                request: request.clone(),
                submitted_at: Utc::now(),
            });
            format!("dry-run-{}", recorded.len())
        };

        info!(
            wallet = %request.target_wallet,
            collateral_mint = %request.collateral_mint,
            borrowed_mint = %request.borrowed_mint,
            min_collateral_out = request.min_collateral_out,
            max_borrowed_in = request.max_borrowed_in,
            receipt = %receipt,
            "Dry-run liquidation recorded"
        );

        if let Some(message) = &self.reject_with {
            anyhow::bail!("{}", message);
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LiquidationRequest {
        LiquidationRequest {
            target_wallet: Pubkey::repeat_byte(1),
            collateral_account: Pubkey::repeat_byte(2),
            borrowed_account: Pubkey::repeat_byte(3),
            collateral_mint: Pubkey::repeat_byte(4),
            borrowed_mint: Pubkey::repeat_byte(5),
            min_collateral_out: 642,
            max_borrowed_in: 636,
        }
    }

    #[tokio::test]
    async fn test_dry_run_records() {
        let submitter = DryRunSubmitter::new(Pubkey::repeat_byte(9));
        let receipt = submitter.submit_liquidation(&request()).await.unwrap();
        assert_eq!(receipt, "dry-run-1");
        assert_eq!(submitter.count(), 1);
        assert_eq!(submitter.recorded()[0].request.min_collateral_out, 642);
    }

    #[tokio::test]
    async fn test_rejecting_still_records() {
        let submitter = DryRunSubmitter::rejecting(Pubkey::repeat_byte(9), "slippage exceeded");
        let err = submitter.submit_liquidation(&request()).await.unwrap_err();
        assert!(err.to_string().contains("slippage"));
        assert_eq!(submitter.count(), 1);
    }
}
