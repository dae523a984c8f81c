//! Append-only JSON-lines log of liquidation attempts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liquidator_ledger::Pubkey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::planner::LiquidationPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Submitted { receipt: String },
    Failed { error: String },
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub wallet: Pubkey,
    pub ratio: f64,
    pub size_usd: f64,
    pub collateral_pool: u8,
    pub collateral_mint: Pubkey,
    pub min_collateral_out: u64,
    pub borrowed_pool: u8,
    pub borrowed_mint: Pubkey,
    pub max_borrowed_in: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl JournalEntry {
    pub fn new(
        wallet: Pubkey,
        plan: &LiquidationPlan,
        collateral_mint: Pubkey,
        borrowed_mint: Pubkey,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            wallet,
            ratio: plan.ratio,
            size_usd: plan.size_usd,
            collateral_pool: plan.collateral_pool,
            collateral_mint,
            min_collateral_out: plan.min_collateral_out,
            borrowed_pool: plan.borrowed_pool,
            borrowed_mint,
            max_borrowed_in: plan.max_borrowed_in,
            outcome,
        }
    }
}

pub struct ActionJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl ActionJournal {
    /// Open (or create) the journal for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening action journal {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.file
            .lock()
            .write_all(line.as_bytes())
            .with_context(|| format!("writing action journal {}", self.path.display()))
    }

    /// Read every entry back.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("parsing journal line"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> LiquidationPlan {
        LiquidationPlan {
            collateral_pool: 0,
            min_collateral_out: 642,
            borrowed_pool: 1,
            max_borrowed_in: 636,
            size_usd: 642.86,
            ratio: 1.125,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let path = std::env::temp_dir().join(format!("liq-journal-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let journal = ActionJournal::open(&path).unwrap();
        let ok = JournalEntry::new(
            Pubkey::repeat_byte(1),
            &plan(),
            Pubkey::repeat_byte(0xa),
            Pubkey::repeat_byte(0xb),
            AttemptOutcome::Submitted {
                receipt: "dry-run-1".into(),
            },
        );
        let failed = JournalEntry {
            outcome: AttemptOutcome::Failed {
                error: "slippage".into(),
            },
            ..ok.clone()
        };
        journal.append(&ok).unwrap();
        journal.append(&failed).unwrap();

        let entries = ActionJournal::read_all(&path).unwrap();
        assert_eq!(entries, vec![ok, failed]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.lines().next().unwrap().contains("\"status\":\"submitted\""));
        let _ = std::fs::remove_file(&path);
    }
}
