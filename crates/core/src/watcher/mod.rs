//! Watchers mirror single ledger records.
//!
//! One concrete watcher type covers every record kind. Behaviour that
//! differs per kind lives in a static capability table ([`WatcherOps`]):
//! how to decode the raw payload and what to do with the decoded value.
//!
//! Lifecycle: `Unbound` -> `Subscribing` (fetch + subscribe queued) ->
//! `Active` (first update seen) -> `Unsubscribed` (terminal).

mod runtime;
mod tree;

use liquidator_ledger::{
    decode_index_page, decode_price, decode_user_record, AddressKind, DecodeError, PriceRecord,
    Pubkey, UserRecord,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::pool::PoolId;
use crate::price_table::PriceTable;

pub use runtime::{WatcherEvent, WatcherRuntime};
pub use tree::{Effect, PageView, TreeCounts, UserView, WatcherTree};

use tree::Arena;

/// Arena handle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Created, address not resolved yet
    Unbound,
    /// Initial fetch and subscription queued
    Subscribing,
    /// At least one update received
    Active,
    /// Torn down
    Unsubscribed,
}

/// Which record a watcher mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherKind {
    Price { pool_id: PoolId, mint: Pubkey },
    UserRecord { wallet: Pubkey },
    IndexPage { page_id: u32 },
}

impl WatcherKind {
    pub fn address_kind(&self) -> AddressKind {
        match *self {
            Self::Price { mint, .. } => AddressKind::AssetPrice { mint },
            Self::UserRecord { wallet } => AddressKind::UserRecord { wallet },
            Self::IndexPage { page_id } => AddressKind::UsersPage { page_id },
        }
    }

    pub(crate) fn ops(&self) -> &'static WatcherOps {
        match self {
            Self::Price { .. } => &PRICE_OPS,
            Self::UserRecord { .. } => &USER_RECORD_OPS,
            Self::IndexPage { .. } => &INDEX_PAGE_OPS,
        }
    }

    pub fn name(&self) -> &'static str {
        self.ops().name
    }
}

/// Last decoded value of a watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchedValue {
    Price(PriceRecord),
    UserRecord(Arc<UserRecord>),
    IndexPage(Arc<Vec<Pubkey>>),
}

/// Side-channel handed to update handlers.
pub(crate) struct UpdateContext<'a> {
    pub prices: &'a PriceTable,
    pub effects: Vec<Effect>,
}

/// Per-kind behaviour.
pub(crate) struct WatcherOps {
    pub name: &'static str,
    pub decode: fn(&[u8]) -> Result<WatchedValue, DecodeError>,
    /// `None` means the record does not exist on the ledger (yet).
    pub on_update: fn(&mut Arena, WatcherId, Option<WatchedValue>, &mut UpdateContext<'_>),
}

static PRICE_OPS: WatcherOps = WatcherOps {
    name: "price",
    decode: decode_price_value,
    on_update: price_updated,
};

static USER_RECORD_OPS: WatcherOps = WatcherOps {
    name: "user_record",
    decode: decode_user_value,
    on_update: user_record_updated,
};

static INDEX_PAGE_OPS: WatcherOps = WatcherOps {
    name: "index_page",
    decode: decode_page_value,
    on_update: index_page_updated,
};

fn decode_price_value(data: &[u8]) -> Result<WatchedValue, DecodeError> {
    decode_price(data).map(WatchedValue::Price)
}

fn decode_user_value(data: &[u8]) -> Result<WatchedValue, DecodeError> {
    decode_user_record(data).map(|r| WatchedValue::UserRecord(Arc::new(r)))
}

fn decode_page_value(data: &[u8]) -> Result<WatchedValue, DecodeError> {
    decode_index_page(data).map(|p| WatchedValue::IndexPage(Arc::new(p)))
}

fn price_updated(
    arena: &mut Arena,
    id: WatcherId,
    value: Option<WatchedValue>,
    ctx: &mut UpdateContext<'_>,
) {
    let Some(node) = arena.node_mut(id) else {
        return;
    };
    let WatcherKind::Price { pool_id, .. } = node.kind else {
        return;
    };

    match value {
        Some(WatchedValue::Price(record)) => {
            node.value = Some(WatchedValue::Price(record));
            ctx.prices.update(pool_id, record);
        }
        // Keep the last known price
        _ => debug!(watcher = %id, pool = pool_id, "Price record not allocated"),
    }
}

fn user_record_updated(
    arena: &mut Arena,
    id: WatcherId,
    value: Option<WatchedValue>,
    _ctx: &mut UpdateContext<'_>,
) {
    let Some(node) = arena.node_mut(id) else {
        return;
    };
    // Replaced wholesale; a missing record means "unknown", not "empty"
    node.value = value.filter(|v| matches!(v, WatchedValue::UserRecord(_)));
}

fn index_page_updated(
    arena: &mut Arena,
    id: WatcherId,
    value: Option<WatchedValue>,
    ctx: &mut UpdateContext<'_>,
) {
    let Some(WatchedValue::IndexPage(slots)) = value else {
        // Page not allocated yet: leave children alone
        return;
    };
    if let Some(node) = arena.node_mut(id) {
        node.value = Some(WatchedValue::IndexPage(slots.clone()));
    }
    arena.reconcile(id, &slots, ctx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_table_dispatch() {
        let page = WatcherKind::IndexPage { page_id: 1 };
        let user = WatcherKind::UserRecord {
            wallet: Pubkey::repeat_byte(1),
        };
        assert_eq!(page.name(), "index_page");
        assert_eq!(user.name(), "user_record");
        assert_eq!(page.address_kind(), AddressKind::UsersPage { page_id: 1 });

        // Decoders reject payloads of the wrong kind
        assert!((page.ops().decode)(&[0u8; 31]).is_err());
        assert!((page.ops().decode)(&[0u8; 64]).is_ok());
        assert!((user.ops().decode)(&[0u8; 64]).is_err());
        assert!((user.ops().decode)(&[0u8; 37]).is_ok());
    }
}
