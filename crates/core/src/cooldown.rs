//! Per-wallet liquidation cooldown.
//!
//! Observed state can run ahead of finality, so a wallet that was just
//! liquidated may still look liquidatable for a while. Attempts on the same
//! wallet are spaced by at least the cooldown.

use dashmap::DashMap;
use liquidator_ledger::Pubkey;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_attempt: DashMap<Pubkey, Instant>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_attempt: DashMap::new(),
        }
    }

    /// Whether a new attempt on `wallet` is allowed at `now`.
    pub fn is_ready(&self, wallet: &Pubkey, now: Instant) -> bool {
        match self.last_attempt.get(wallet) {
            Some(last) => now.saturating_duration_since(*last) > self.cooldown,
            None => true,
        }
    }

    pub fn record(&self, wallet: Pubkey, now: Instant) {
        self.last_attempt.insert(wallet, now);
    }

    /// Time left before `wallet` may be attempted again.
    pub fn remaining(&self, wallet: &Pubkey, now: Instant) -> Option<Duration> {
        let last = *self.last_attempt.get(wallet)?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed <= self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Forget wallets whose cooldown has expired.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.last_attempt.len();
        self.last_attempt
            .retain(|_, last| now.saturating_duration_since(*last) <= self.cooldown);
        before - self.last_attempt.len()
    }

    pub fn len(&self) -> usize {
        self.last_attempt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_attempt.is_empty()
    }
}
