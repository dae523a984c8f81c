//! Ledger access layer for the liquidator.
//!
//! This crate provides:
//! - 32-byte ledger addresses
//! - Binary layouts of the protocol's pool list, price, user and users-page records
//! - Account fetch/subscribe client abstraction
//! - Derivation of well-known record addresses
//! - Liquidation submission abstraction
//! - An in-process ledger for replays and tests

mod client;
pub mod codec;
mod derive;
mod memory;
mod pubkey;
mod submit;

pub use client::{AccountCallback, AccountData, LedgerClient, SubscriptionId};
pub use codec::{
    decode_index_page, decode_pool_list, decode_price, decode_user_record, DecodeError,
    PoolListEntry, PriceRecord, UserAsset, UserRecord,
};
pub use derive::{AddressDeriver, AddressKind, SeedDeriver};
pub use memory::MemoryLedger;
pub use pubkey::{ParsePubkeyError, Pubkey};
pub use submit::{DryRunSubmitter, LiquidationRequest, LiquidationSubmitter, RecordedLiquidation};
