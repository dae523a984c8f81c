//! Drives watchers against a ledger client.
//!
//! Fetches, subscriptions and releases go through the rate-limited queue.
//! Deliveries from both fetches and push callbacks land on one multiplexed
//! channel tagged by watcher id and are applied by a single loop, so a
//! watcher's update handler never runs concurrently with itself.

use anyhow::Context;
use liquidator_ledger::{AccountCallback, AccountData, LedgerClient, Pubkey, SubscriptionId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{Effect, WatcherId, WatcherKind, WatcherTree};
use crate::queue::RateLimitedQueue;

/// One delivery for one watcher.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub id: WatcherId,
    pub data: AccountData,
}

pub struct WatcherRuntime {
    tree: Arc<WatcherTree>,
    queue: Arc<RateLimitedQueue>,
    client: Arc<dyn LedgerClient>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<WatcherEvent>>>,
}

impl WatcherRuntime {
    pub fn new(
        tree: Arc<WatcherTree>,
        queue: Arc<RateLimitedQueue>,
        client: Arc<dyn LedgerClient>,
    ) -> Self {
        let (events, inbox) = mpsc::unbounded_channel();
        Self {
            tree,
            queue,
            client,
            events,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    pub fn tree(&self) -> &Arc<WatcherTree> {
        &self.tree
    }

    /// Create a process-lifetime watcher and bind it.
    pub fn watch(&self, kind: WatcherKind) -> WatcherId {
        let id = self.tree.add_root(kind);
        self.bind(id);
        id
    }

    /// Tear down a watcher and its descendants. Safe to repeat.
    pub fn unsubscribe(&self, id: WatcherId) {
        for subscription in self.tree.unsubscribe(id) {
            self.release(subscription);
        }
    }

    /// Apply one delivery and schedule the remote work it implies.
    pub fn handle_event(&self, event: WatcherEvent) {
        let effects = self.tree.apply_update(event.id, event.data);
        self.apply_effects(effects);
    }

    fn apply_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Bind(id) => self.bind(id),
                Effect::Release(subscription) => self.release(subscription),
            }
        }
    }

    /// Queue the initial fetch, then the push subscription.
    fn bind(&self, id: WatcherId) {
        let Some(address) = self.tree.begin_bind(id) else {
            return;
        };

        let tree = self.tree.clone();
        let client = self.client.clone();
        let events = self.events.clone();
        self.queue.submit_retrying(format!("fetch {}", id), move || {
            let tree = tree.clone();
            let client = client.clone();
            let events = events.clone();
            async move {
                if !tree.is_live(id) {
                    return Ok(());
                }
                let data = client
                    .fetch_account(address)
                    .await
                    .with_context(|| format!("fetching {}", address))?;
                let _ = events.send(WatcherEvent { id, data });
                Ok(())
            }
        });

        let tree = self.tree.clone();
        let client = self.client.clone();
        let events = self.events.clone();
        let queue = self.queue.clone();
        self.queue.submit_retrying(format!("subscribe {}", id), move || {
            subscribe_task(
                tree.clone(),
                client.clone(),
                events.clone(),
                queue.clone(),
                id,
                address,
            )
        });
    }

    fn release(&self, subscription: SubscriptionId) {
        let client = self.client.clone();
        self.queue
            .submit(format!("unsubscribe {}", subscription), move || async move {
                client
                    .unsubscribe(subscription)
                    .await
                    .with_context(|| format!("releasing {}", subscription))
            });
    }

    /// Apply deliveries until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut inbox) = self.inbox.lock().take() else {
            warn!("Watcher event loop already running");
            return;
        };
        info!("Watcher event loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Watcher event loop stopped");
    }
}

async fn subscribe_task(
    tree: Arc<WatcherTree>,
    client: Arc<dyn LedgerClient>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    queue: Arc<RateLimitedQueue>,
    id: WatcherId,
    address: Pubkey,
) -> anyhow::Result<()> {
    if !tree.is_live(id) {
        return Ok(());
    }

    let on_change: AccountCallback = Arc::new(move |data| {
        let _ = events.send(WatcherEvent { id, data });
    });
    let subscription = client
        .subscribe_account(address, on_change)
        .await
        .with_context(|| format!("subscribing to {}", address))?;

    if !tree.attach_subscription(id, subscription) {
        debug!(watcher = %id, subscription = %subscription, "Watcher removed while subscribing");
        queue.submit(format!("unsubscribe {}", subscription), move || async move {
            client.unsubscribe(subscription).await
        });
    }
    Ok(())
}
