//! Account access: one-shot fetches and push subscriptions.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::pubkey::Pubkey;

/// Raw account payload. `None` means the address is not allocated on the ledger.
pub type AccountData = Option<Vec<u8>>;

/// Callback invoked with the new payload whenever a subscribed account changes.
pub type AccountCallback = Arc<dyn Fn(AccountData) + Send + Sync>;

/// Handle of an active account subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Read access to ledger accounts.
///
/// Implementations must deliver subscription changes through the callback
/// only; fetch and subscribe results for the same account may arrive in any
/// order, so consumers treat deliveries as idempotent snapshots.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the current payload of an account.
    async fn fetch_account(&self, address: Pubkey) -> Result<AccountData>;

    /// Subscribe to future changes of an account.
    async fn subscribe_account(
        &self,
        address: Pubkey,
        on_change: AccountCallback,
    ) -> Result<SubscriptionId>;

    /// Release a subscription. Unknown ids are not an error.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
