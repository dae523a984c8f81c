//! Liquidator core logic.
//!
//! This crate provides the core liquidation bot functionality:
//! - Pool registry and live price table
//! - Rate-limited request queue shared by all remote calls
//! - Watchers mirroring price, user and users-page records, kept in an
//!   arena tree reconciled against the pages
//! - Position health and liquidation sizing
//! - Scanner orchestration (bootstrap + periodic sweep)
//!
//! Ledger access, address derivation and submission come from
//! `liquidator-ledger`.

pub mod config;
mod cooldown;
mod journal;
pub mod planner;
mod pool;
mod price_table;
mod queue;
mod scanner;
pub mod watcher;

pub use config::{BotConfig, LedgerConfig, LiquidationConfig, QueueConfig, ScannerTimingConfig};
pub use cooldown::CooldownTracker;
pub use journal::{ActionJournal, AttemptOutcome, JournalEntry};
pub use planner::{
    liquidation_size_usd, LiquidationPlan, LiquidationPlanner, PlanError, PlannerConfig,
    PositionHealth, PoolValue,
};
pub use pool::{Pool, PoolId, PoolRegistry};
pub use price_table::{PriceEntry, PriceTable};
pub use queue::{QueueStats, RateLimitedQueue, TaskFailure};
pub use scanner::{Scanner, SweepReport};
pub use watcher::{
    PageView, UserView, WatchedValue, WatcherEvent, WatcherId, WatcherKind, WatcherRuntime,
    WatcherState, WatcherTree,
};
