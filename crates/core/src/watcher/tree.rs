//! Arena of watchers and the page -> user reconciliation.
//!
//! Every watcher lives in one arena keyed by [`WatcherId`]. Parents hold
//! their children as `wallet -> id` maps, teardown is a breadth-first walk
//! over ids. All mutation happens under one write lock, so a sweep taking a
//! snapshot never sees a half-applied page diff.

use liquidator_ledger::{AccountData, AddressDeriver, Pubkey, SubscriptionId, UserRecord};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{UpdateContext, WatchedValue, WatcherId, WatcherKind, WatcherState};
use crate::price_table::PriceTable;

/// Remote work requested by a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Resolve the watcher's address, fetch and subscribe
    Bind(WatcherId),
    /// Tear down a push subscription
    Release(SubscriptionId),
}

pub(crate) struct WatcherNode {
    pub kind: WatcherKind,
    pub parent: Option<WatcherId>,
    pub children: BTreeMap<Pubkey, WatcherId>,
    pub address: Option<Pubkey>,
    pub state: WatcherState,
    pub value: Option<WatchedValue>,
    pub subscription: Option<SubscriptionId>,
    pub updates: u64,
    pub decode_failures: u64,
}

impl WatcherNode {
    fn new(kind: WatcherKind, parent: Option<WatcherId>) -> Self {
        Self {
            kind,
            parent,
            children: BTreeMap::new(),
            address: None,
            state: WatcherState::Unbound,
            value: None,
            subscription: None,
            updates: 0,
            decode_failures: 0,
        }
    }
}

#[derive(Default)]
pub(crate) struct Arena {
    nodes: HashMap<WatcherId, WatcherNode>,
    next_id: u64,
    /// Owner of each live user-record watcher
    wallets: HashMap<Pubkey, WatcherId>,
    roots: Vec<WatcherId>,
}

impl Arena {
    pub fn node_mut(&mut self, id: WatcherId) -> Option<&mut WatcherNode> {
        self.nodes.get_mut(&id)
    }

    fn insert(&mut self, node: WatcherNode) -> WatcherId {
        self.next_id += 1;
        let id = WatcherId(self.next_id);
        self.nodes.insert(id, node);
        id
    }

    /// Make the page's children exactly the non-sentinel wallets in `slots`.
    pub fn reconcile(&mut self, page: WatcherId, slots: &[Pubkey], ctx: &mut UpdateContext<'_>) {
        let Some(node) = self.nodes.get(&page) else {
            return;
        };
        let page_id = match node.kind {
            WatcherKind::IndexPage { page_id } => page_id,
            _ => return,
        };

        let current: BTreeSet<Pubkey> = node.children.keys().copied().collect();
        let observed: BTreeSet<Pubkey> = slots.iter().filter(|k| !k.is_null()).copied().collect();

        let removed: Vec<Pubkey> = current.difference(&observed).copied().collect();
        let added: Vec<Pubkey> = observed.difference(&current).copied().collect();

        let mut handed_over = 0usize;
        for wallet in &removed {
            let child = self
                .nodes
                .get_mut(&page)
                .and_then(|n| n.children.remove(wallet));
            let Some(child) = child else {
                continue;
            };
            // Another page's latest content still lists it: hand it over
            match self.page_listing(wallet, page) {
                Some(other) => {
                    if let Some(n) = self.nodes.get_mut(&child) {
                        n.parent = Some(other);
                    }
                    if let Some(n) = self.nodes.get_mut(&other) {
                        n.children.insert(*wallet, child);
                    }
                    handed_over += 1;
                }
                None => self.teardown(child, ctx),
            }
        }

        let mut moved = 0usize;
        for wallet in &added {
            let child = match self.wallets.get(wallet).copied() {
                Some(existing) => {
                    // Already watched under another page: move it here
                    self.detach_from_parent(existing, wallet);
                    if let Some(n) = self.nodes.get_mut(&existing) {
                        n.parent = Some(page);
                    }
                    moved += 1;
                    existing
                }
                None => {
                    let kind = WatcherKind::UserRecord { wallet: *wallet };
                    let id = self.insert(WatcherNode::new(kind, Some(page)));
                    self.wallets.insert(*wallet, id);
                    ctx.effects.push(Effect::Bind(id));
                    id
                }
            };
            if let Some(n) = self.nodes.get_mut(&page) {
                n.children.insert(*wallet, child);
            }
        }

        if !added.is_empty() || !removed.is_empty() {
            info!(
                page = page_id,
                added = added.len() - moved,
                moved,
                removed = removed.len() - handed_over,
                handed_over,
                total = observed.len(),
                "Reconciled users page"
            );
        }
    }

    /// Live page other than `except` whose latest content lists `wallet`.
    fn page_listing(&self, wallet: &Pubkey, except: WatcherId) -> Option<WatcherId> {
        self.nodes
            .iter()
            .filter(|(id, node)| {
                **id != except
                    && node.state != WatcherState::Unsubscribed
                    && matches!(node.kind, WatcherKind::IndexPage { .. })
                    && matches!(&node.value, Some(WatchedValue::IndexPage(slots)) if slots.contains(wallet))
            })
            .map(|(id, _)| *id)
            .min()
    }

    fn detach_from_parent(&mut self, id: WatcherId, wallet: &Pubkey) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.remove(wallet);
        }
    }

    /// Unsubscribe `id` and its whole subtree.
    ///
    /// Descendants leave the arena; the starting watcher stays as an
    /// `Unsubscribed` tombstone if it is a root. Safe to repeat.
    pub fn teardown(&mut self, id: WatcherId, ctx: &mut UpdateContext<'_>) {
        let is_root = self.roots.contains(&id);
        if !is_root {
            let parent = self.nodes.get(&id).and_then(|n| n.parent);
            if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
                parent.children.retain(|_, child| *child != id);
            }
        }

        let mut pending = VecDeque::from([id]);
        while let Some(current) = pending.pop_front() {
            let node = if current == id && is_root {
                self.nodes.get_mut(&current).map(|n| {
                    n.state = WatcherState::Unsubscribed;
                    (n.kind, n.subscription.take(), std::mem::take(&mut n.children))
                })
            } else {
                self.nodes
                    .remove(&current)
                    .map(|mut n| (n.kind, n.subscription.take(), std::mem::take(&mut n.children)))
            };
            let Some((kind, subscription, children)) = node else {
                continue;
            };

            if let WatcherKind::UserRecord { wallet } = kind {
                if self.wallets.get(&wallet) == Some(&current) {
                    self.wallets.remove(&wallet);
                }
            }
            if let Some(subscription) = subscription {
                ctx.effects.push(Effect::Release(subscription));
            }
            pending.extend(children.into_values());
        }
    }
}

/// Snapshot of a user watcher.
#[derive(Debug, Clone)]
pub struct UserView {
    pub wallet: Pubkey,
    pub watcher: WatcherId,
    /// `None` until the record has been observed
    pub record: Option<Arc<UserRecord>>,
}

/// Snapshot of a page watcher and its users.
#[derive(Debug, Clone)]
pub struct PageView {
    pub page_id: u32,
    pub users: Vec<UserView>,
}

impl PageView {
    /// Users whose record is known.
    pub fn received(&self) -> usize {
        self.users.iter().filter(|u| u.record.is_some()).count()
    }
}

/// Watcher counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCounts {
    pub prices: usize,
    pub pages: usize,
    pub users: usize,
}

pub struct WatcherTree {
    inner: RwLock<Arena>,
    prices: Arc<PriceTable>,
    deriver: Arc<dyn AddressDeriver>,
}

impl WatcherTree {
    pub fn new(prices: Arc<PriceTable>, deriver: Arc<dyn AddressDeriver>) -> Self {
        Self {
            inner: RwLock::new(Arena::default()),
            prices,
            deriver,
        }
    }

    pub fn prices(&self) -> &Arc<PriceTable> {
        &self.prices
    }

    /// Add a process-lifetime watcher (price or page).
    pub fn add_root(&self, kind: WatcherKind) -> WatcherId {
        let mut arena = self.inner.write();
        let id = arena.insert(WatcherNode::new(kind, None));
        arena.roots.push(id);
        id
    }

    /// Resolve the address of an unbound watcher and mark it subscribing.
    ///
    /// Returns `None` when the watcher is gone or already bound.
    pub fn begin_bind(&self, id: WatcherId) -> Option<Pubkey> {
        let mut arena = self.inner.write();
        let node = arena.node_mut(id)?;
        if node.state != WatcherState::Unbound {
            return None;
        }
        let address = self.deriver.derive_address(&node.kind.address_kind());
        node.address = Some(address);
        node.state = WatcherState::Subscribing;
        debug!(watcher = %id, kind = node.kind.name(), address = %address, "Binding watcher");
        Some(address)
    }

    /// Whether the watcher still exists and is not torn down.
    pub fn is_live(&self, id: WatcherId) -> bool {
        self.state(id)
            .is_some_and(|s| s != WatcherState::Unsubscribed)
    }

    /// Record an established subscription.
    ///
    /// Returns false when the watcher was torn down meanwhile; the caller
    /// then owns the subscription and must release it.
    pub fn attach_subscription(&self, id: WatcherId, subscription: SubscriptionId) -> bool {
        let mut arena = self.inner.write();
        match arena.node_mut(id) {
            Some(node) if node.state != WatcherState::Unsubscribed => {
                node.subscription = Some(subscription);
                true
            }
            _ => false,
        }
    }

    /// Deliver a raw update (fetch result or push notification).
    pub fn apply_update(&self, id: WatcherId, data: AccountData) -> Vec<Effect> {
        let mut arena = self.inner.write();
        let Some(node) = arena.node_mut(id) else {
            return Vec::new();
        };
        if node.state == WatcherState::Unsubscribed {
            return Vec::new();
        }

        node.updates += 1;
        if node.state != WatcherState::Active {
            node.state = WatcherState::Active;
        }
        let ops = node.kind.ops();

        let value = match data {
            None => None,
            Some(bytes) => match (ops.decode)(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    node.decode_failures += 1;
                    warn!(
                        watcher = %id,
                        kind = ops.name,
                        len = bytes.len(),
                        error = %e,
                        "Skipping undecodable update"
                    );
                    return Vec::new();
                }
            },
        };

        debug!(
            watcher = %id,
            kind = ops.name,
            present = value.is_some(),
            "Observed update"
        );

        let mut ctx = UpdateContext {
            prices: &self.prices,
            effects: Vec::new(),
        };
        (ops.on_update)(&mut *arena, id, value, &mut ctx);
        ctx.effects
    }

    /// Tear down a watcher and its descendants. Returns subscriptions to release.
    pub fn unsubscribe(&self, id: WatcherId) -> Vec<SubscriptionId> {
        let mut arena = self.inner.write();
        let mut ctx = UpdateContext {
            prices: &self.prices,
            effects: Vec::new(),
        };
        arena.teardown(id, &mut ctx);
        ctx.effects
            .into_iter()
            .filter_map(|e| match e {
                Effect::Release(sub) => Some(sub),
                Effect::Bind(_) => None,
            })
            .collect()
    }

    pub fn state(&self, id: WatcherId) -> Option<WatcherState> {
        self.inner.read().nodes.get(&id).map(|n| n.state)
    }

    pub fn value(&self, id: WatcherId) -> Option<WatchedValue> {
        self.inner.read().nodes.get(&id).and_then(|n| n.value.clone())
    }

    pub fn child_keys(&self, id: WatcherId) -> Vec<Pubkey> {
        self.inner
            .read()
            .nodes
            .get(&id)
            .map(|n| n.children.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: WatcherId) -> Option<WatcherId> {
        self.inner.read().nodes.get(&id).and_then(|n| n.parent)
    }

    /// Watcher currently mirroring `wallet`.
    pub fn watcher_for_wallet(&self, wallet: &Pubkey) -> Option<WatcherId> {
        self.inner.read().wallets.get(wallet).copied()
    }

    pub fn address(&self, id: WatcherId) -> Option<Pubkey> {
        self.inner.read().nodes.get(&id).and_then(|n| n.address)
    }

    /// Updates delivered so far, including null and undecodable ones.
    pub fn update_count(&self, id: WatcherId) -> u64 {
        self.inner.read().nodes.get(&id).map(|n| n.updates).unwrap_or(0)
    }

    pub fn decode_failures(&self, id: WatcherId) -> u64 {
        self.inner
            .read()
            .nodes
            .get(&id)
            .map(|n| n.decode_failures)
            .unwrap_or(0)
    }

    pub fn counts(&self) -> TreeCounts {
        let arena = self.inner.read();
        let mut counts = TreeCounts::default();
        for node in arena.nodes.values() {
            if node.state == WatcherState::Unsubscribed {
                continue;
            }
            match node.kind {
                WatcherKind::Price { .. } => counts.prices += 1,
                WatcherKind::IndexPage { .. } => counts.pages += 1,
                WatcherKind::UserRecord { .. } => counts.users += 1,
            }
        }
        counts
    }

    /// Stable copy of every live page and its users, ordered by page id.
    pub fn snapshot_pages(&self) -> Vec<PageView> {
        let arena = self.inner.read();
        let mut pages: Vec<PageView> = arena
            .roots
            .iter()
            .filter_map(|id| arena.nodes.get(id))
            .filter(|n| n.state != WatcherState::Unsubscribed)
            .filter_map(|n| match n.kind {
                WatcherKind::IndexPage { page_id } => Some((page_id, n)),
                _ => None,
            })
            .map(|(page_id, n)| PageView {
                page_id,
                users: n
                    .children
                    .iter()
                    .map(|(wallet, child)| UserView {
                        wallet: *wallet,
                        watcher: *child,
                        record: arena.nodes.get(child).and_then(|c| match &c.value {
                            Some(WatchedValue::UserRecord(r)) => Some(r.clone()),
                            _ => None,
                        }),
                    })
                    .collect(),
            })
            .collect();
        pages.sort_by_key(|p| p.page_id);
        pages
    }
}
