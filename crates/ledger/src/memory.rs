//! In-process ledger with push notifications.
//!
//! Writes through [`MemoryLedger::set_account`] / [`MemoryLedger::remove_account`]
//! are delivered synchronously to every subscriber of that address. Used for
//! scenario replays and tests.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use crate::client::{AccountCallback, AccountData, LedgerClient, SubscriptionId};
use crate::pubkey::Pubkey;

#[derive(Default)]
pub struct MemoryLedger {
    accounts: DashMap<Pubkey, Vec<u8>>,
    subscribers: DashMap<SubscriptionId, (Pubkey, AccountCallback)>,
    next_subscription: AtomicU64,
    fetches: AtomicUsize,
    /// Number of upcoming fetches that fail (transient-error drills)
    failing_fetches: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an account and notify its subscribers.
    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.insert(address, data.clone());
        self.notify(address, Some(data));
    }

    /// Delete an account and notify its subscribers with `None`.
    pub fn remove_account(&self, address: Pubkey) {
        self.accounts.remove(&address);
        self.notify(address, None);
    }

    pub fn account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.accounts.get(address).map(|d| d.clone())
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Total fetch calls served (including failed ones).
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether any live subscription watches `address`.
    pub fn is_subscribed(&self, address: &Pubkey) -> bool {
        self.subscribers.iter().any(|e| &e.value().0 == address)
    }

    fn notify(&self, address: Pubkey, data: AccountData) {
        // Collect first: callbacks must not run while a shard lock is held
        let callbacks: Vec<AccountCallback> = self
            .subscribers
            .iter()
            .filter(|e| e.value().0 == address)
            .map(|e| e.value().1.clone())
            .collect();

        for callback in callbacks {
            callback(data.clone());
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn fetch_account(&self, address: Pubkey) -> Result<AccountData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("simulated transient error fetching {}", address);
        }

        Ok(self.account(&address))
    }

    async fn subscribe_account(
        &self,
        address: Pubkey,
        on_change: AccountCallback,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        self.subscribers.insert(id, (address, on_change));
        debug!(address = %address, subscription = %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscription = %id, "Unsubscribed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_missing_is_none() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.fetch_account(Pubkey::repeat_byte(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscription_delivers_changes() {
        let ledger = MemoryLedger::new();
        let address = Pubkey::repeat_byte(1);
        let seen: Arc<Mutex<Vec<AccountData>>> = Arc::default();

        let sink = seen.clone();
        let id = ledger
            .subscribe_account(address, Arc::new(move |data| sink.lock().push(data)))
            .await
            .unwrap();

        ledger.set_account(address, vec![1, 2, 3]);
        ledger.set_account(Pubkey::repeat_byte(2), vec![9]);
        ledger.remove_account(address);
        assert_eq!(*seen.lock(), vec![Some(vec![1, 2, 3]), None]);

        ledger.unsubscribe(id).await.unwrap();
        ledger.set_account(address, vec![4]);
        assert_eq!(seen.lock().len(), 2);

        // Releasing twice is harmless
        ledger.unsubscribe(id).await.unwrap();
        assert_eq!(ledger.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_fetch_failures() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_fetches(1);
        assert!(ledger.fetch_account(Pubkey::repeat_byte(1)).await.is_err());
        assert!(ledger.fetch_account(Pubkey::repeat_byte(1)).await.is_ok());
        assert_eq!(ledger.fetch_count(), 2);
    }
}
