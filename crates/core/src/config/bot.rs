//! Configuration management with profile support.
//!
//! Provides centralized configuration for all bot parameters with
//! support for different profiles (devnet, mainnet).

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure containing all bot parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Outbound request queue
    #[serde(default)]
    pub queue: QueueConfig,

    /// Bootstrap and sweep timing
    #[serde(default)]
    pub scanner: ScannerTimingConfig,

    /// Liquidation decision parameters
    #[serde(default)]
    pub liquidation: LiquidationConfig,

    /// Ledger addressing
    #[serde(default)]
    pub ledger: LedgerConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Rate-limited queue parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Minimum delay between the start of consecutive tasks (milliseconds)
    #[serde(default = "default_min_gap")]
    pub min_gap_ms: u64,

    /// Per-task execution timeout (milliseconds)
    #[serde(default = "default_task_timeout")]
    pub task_timeout_ms: u64,

    /// Attempts for retryable remote calls (fetch/subscribe)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_min_gap() -> u64 {
    250
}
fn default_task_timeout() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_gap_ms: default_min_gap(),
            task_timeout_ms: default_task_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl QueueConfig {
    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Scanner timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerTimingConfig {
    /// Sweep period (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Poll period while waiting for initial prices (milliseconds)
    #[serde(default = "default_price_poll_interval")]
    pub price_poll_interval_ms: u64,

    /// Give up waiting for initial prices after this many seconds (0 = never)
    #[serde(default = "default_price_wait_timeout")]
    pub price_wait_timeout_secs: u64,

    /// First users page to watch (inclusive)
    #[serde(default)]
    pub page_start: u32,

    /// Last users page to watch (exclusive)
    #[serde(default = "default_page_end")]
    pub page_end: u32,
}

fn default_sweep_interval() -> u64 {
    10
}
fn default_price_poll_interval() -> u64 {
    1000
}
fn default_price_wait_timeout() -> u64 {
    120
}
fn default_page_end() -> u32 {
    100
}

impl Default for ScannerTimingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            price_poll_interval_ms: default_price_poll_interval(),
            price_wait_timeout_secs: default_price_wait_timeout(),
            page_start: 0,
            page_end: default_page_end(),
        }
    }
}

impl ScannerTimingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_millis(self.price_poll_interval_ms)
    }
    pub fn price_wait_timeout(&self) -> Option<Duration> {
        (self.price_wait_timeout_secs > 0).then(|| Duration::from_secs(self.price_wait_timeout_secs))
    }
    pub fn page_range(&self) -> Range<u32> {
        self.page_start..self.page_end
    }
}

/// Liquidation decision parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Target borrow-limit-used ratio after liquidation
    #[serde(default = "default_post_factor")]
    pub post_factor: f64,

    /// Fraction of the ideal collateral amount accepted as minimum output
    #[serde(default = "default_collateral_haircut")]
    pub collateral_haircut: f64,

    /// Fraction of the ideal borrowed amount offered for repayment
    #[serde(default = "default_repay_haircut")]
    pub repay_haircut: f64,

    /// Minimum time between attempts on the same wallet (seconds)
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Skip new liquidations while the queue holds this many tasks
    #[serde(default = "default_backpressure_depth")]
    pub backpressure_depth: usize,

    /// Log positions whose ratio exceeds this value
    #[serde(default = "default_watch_ratio")]
    pub watch_ratio: f64,

    /// Optional JSON-lines journal of liquidation attempts
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
}

fn default_post_factor() -> f64 {
    0.9
}
fn default_collateral_haircut() -> f64 {
    0.999
}
fn default_repay_haircut() -> f64 {
    0.99
}
fn default_cooldown() -> u64 {
    20
}
fn default_backpressure_depth() -> usize {
    100
}
fn default_watch_ratio() -> f64 {
    0.97
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            post_factor: default_post_factor(),
            collateral_haircut: default_collateral_haircut(),
            repay_haircut: default_repay_haircut(),
            cooldown_secs: default_cooldown(),
            backpressure_depth: default_backpressure_depth(),
            watch_ratio: default_watch_ratio(),
            journal_path: None,
        }
    }
}

impl LiquidationConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Ledger addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Lending program id (hex), seeds address derivation
    #[serde(default = "default_program_id")]
    pub program_id: String,
}

fn default_program_id() -> String {
    "0x6170726963f7000000000000000000000000000000000000000000000000000a".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
        }
    }
}

impl LedgerConfig {
    pub fn program_id(&self) -> anyhow::Result<liquidator_ledger::Pubkey> {
        self.program_id
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid program id '{}': {}", self.program_id, e))
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            queue: QueueConfig::default(),
            scanner: ScannerTimingConfig::default(),
            liquidation: LiquidationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, expanding `${VAR}` references.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = super::loader::expand_env(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Devnet profile: public endpoint accepts ~2 requests per second.
    pub fn devnet() -> Self {
        Self {
            profile: "devnet".to_string(),
            queue: QueueConfig {
                min_gap_ms: 500,
                task_timeout_ms: 15_000,
                max_attempts: 5,
            },
            scanner: ScannerTimingConfig {
                sweep_interval_secs: 10,
                price_poll_interval_ms: 1000,
                price_wait_timeout_secs: 300,
                page_start: 0,
                page_end: 100,
            },
            liquidation: LiquidationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }

    /// Mainnet profile: dedicated endpoint at ~4 requests per second.
    pub fn mainnet() -> Self {
        Self {
            profile: "mainnet".to_string(),
            queue: QueueConfig {
                min_gap_ms: 250,
                task_timeout_ms: 10_000,
                max_attempts: 3,
            },
            scanner: ScannerTimingConfig::default(),
            liquidation: LiquidationConfig {
                cooldown_secs: 20,
                backpressure_depth: 100,
                ..Default::default()
            },
            ledger: LedgerConfig::default(),
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or a file named by BOT_CONFIG.
    /// Supported profiles: devnet, mainnet
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = if let Ok(path) = std::env::var("BOT_CONFIG") {
            Self::from_file(&path)?
        } else {
            let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
            match profile.to_lowercase().as_str() {
                "devnet" | "dev" => Self::devnet(),
                "mainnet" | "main" | "prod" => Self::mainnet(),
                _ => Self::default(),
            }
        };

        // Page range overrides (the range each instance watches)
        if let Some(start) = env_u32("PAGE_START")? {
            config.scanner.page_start = start;
        }
        if let Some(end) = env_u32("PAGE_END")? {
            config.scanner.page_end = end;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the planner or sweep cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let liq = &self.liquidation;
        if !(liq.post_factor > 0.0 && liq.post_factor < 1.0) {
            anyhow::bail!("liquidation.post_factor must be in (0, 1), got {}", liq.post_factor);
        }
        for (name, value) in [
            ("collateral_haircut", liq.collateral_haircut),
            ("repay_haircut", liq.repay_haircut),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!("liquidation.{} must be in (0, 1], got {}", name, value);
            }
        }
        if self.scanner.page_start > self.scanner.page_end {
            anyhow::bail!(
                "scanner page range is empty: {}..{}",
                self.scanner.page_start,
                self.scanner.page_end
            );
        }
        if self.queue.min_gap_ms == 0 {
            anyhow::bail!("queue.min_gap_ms must be positive");
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Bot configuration loaded");
        tracing::info!(
            min_gap_ms = self.queue.min_gap_ms,
            task_timeout_ms = self.queue.task_timeout_ms,
            max_attempts = self.queue.max_attempts,
            "Queue parameters"
        );
        tracing::info!(
            sweep_interval_secs = self.scanner.sweep_interval_secs,
            page_start = self.scanner.page_start,
            page_end = self.scanner.page_end,
            "Scanner parameters"
        );
        tracing::info!(
            post_factor = self.liquidation.post_factor,
            cooldown_secs = self.liquidation.cooldown_secs,
            backpressure_depth = self.liquidation.backpressure_depth,
            watch_ratio = self.liquidation.watch_ratio,
            "Liquidation parameters"
        );
    }
}

fn env_u32(name: &str) -> anyhow::Result<Option<u32>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, value, e)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.queue.min_gap_ms, 250);
        assert_eq!(config.liquidation.post_factor, 0.9);
        assert_eq!(config.liquidation.cooldown(), Duration::from_secs(20));
        assert_eq!(config.scanner.page_range(), 0..100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_devnet_profile() {
        let config = BotConfig::devnet();
        assert_eq!(config.profile, "devnet");
        assert_eq!(config.queue.min_gap(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = BotConfig::from_toml_str(
            r#"
            profile = "custom"
            [liquidation]
            post_factor = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.profile, "custom");
        assert_eq!(config.liquidation.post_factor, 0.8);
        assert_eq!(config.liquidation.repay_haircut, 0.99);
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[test]
    fn test_invalid_post_factor_rejected() {
        let result = BotConfig::from_toml_str("[liquidation]\npost_factor = 1.2\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_price_wait_timeout_zero_means_forever() {
        let mut timing = ScannerTimingConfig::default();
        assert_eq!(timing.price_wait_timeout(), Some(Duration::from_secs(120)));
        timing.price_wait_timeout_secs = 0;
        assert_eq!(timing.price_wait_timeout(), None);
    }

    #[test]
    fn test_serialization() {
        let config = BotConfig::devnet();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"devnet\""));

        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, "devnet");
        assert_eq!(parsed.queue.min_gap_ms, 500);
    }

    #[test]
    fn test_program_id_parses() {
        assert!(LedgerConfig::default().program_id().is_ok());
    }
}
