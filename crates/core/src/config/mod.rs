//! Configuration system for the liquidator.
//!
//! This module provides:
//! - Bot runtime configuration (profiles, queue pacing, sweep timing, liquidation thresholds)
//! - `${VAR}` expansion for TOML configuration files

mod bot;
mod loader;

pub use bot::{
    BotConfig, LedgerConfig, LiquidationConfig, QueueConfig, ScannerTimingConfig,
};
pub use loader::expand_env;
