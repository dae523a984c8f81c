//! Scanner orchestration for the liquidator.
//!
//! Boot sequence: load the pool list, start one price watcher per pool,
//! wait until every pool has a price, then start the users-page watchers.
//! After that a periodic sweep evaluates every known position and queues
//! liquidations for the ones past the threshold.

use anyhow::{Context, Result};
use liquidator_ledger::{
    decode_pool_list, AddressDeriver, AddressKind, LedgerClient, LiquidationRequest,
    LiquidationSubmitter, Pubkey,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::BotConfig;
use crate::cooldown::CooldownTracker;
use crate::journal::{ActionJournal, AttemptOutcome, JournalEntry};
use crate::planner::{LiquidationPlan, LiquidationPlanner, PlanError, PlannerConfig};
use crate::pool::{PoolId, PoolRegistry};
use crate::price_table::PriceTable;
use crate::queue::RateLimitedQueue;
use crate::watcher::{WatcherKind, WatcherRuntime, WatcherTree};

/// Outcome counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pages: usize,
    /// User watchers across all pages
    pub users: usize,
    /// Users with a known record that were assessed
    pub evaluated: usize,
    pub near_threshold: usize,
    pub liquidatable: usize,
    pub submitted: usize,
    pub skipped_cooldown: usize,
    pub skipped_backpressure: usize,
    /// Positions that could not be valued (missing price, unknown pool)
    pub unpriced: usize,
}

/// Main scanner orchestrating watchers, planner and submission.
pub struct Scanner {
    config: BotConfig,
    client: Arc<dyn LedgerClient>,
    submitter: Arc<dyn LiquidationSubmitter>,
    deriver: Arc<dyn AddressDeriver>,
    queue: Arc<RateLimitedQueue>,
    prices: Arc<PriceTable>,
    runtime: Arc<WatcherRuntime>,
    planner: LiquidationPlanner,
    cooldown: CooldownTracker,
    journal: Option<Arc<ActionJournal>>,
    pools: RwLock<Arc<PoolRegistry>>,
}

impl Scanner {
    /// Create a new scanner.
    pub fn new(
        config: BotConfig,
        client: Arc<dyn LedgerClient>,
        submitter: Arc<dyn LiquidationSubmitter>,
        deriver: Arc<dyn AddressDeriver>,
    ) -> Result<Self> {
        let queue = Arc::new(RateLimitedQueue::new(&config.queue));
        let prices = Arc::new(PriceTable::new());
        let tree = Arc::new(WatcherTree::new(prices.clone(), deriver.clone()));
        let runtime = Arc::new(WatcherRuntime::new(tree, queue.clone(), client.clone()));

        let journal = match &config.liquidation.journal_path {
            Some(path) => Some(Arc::new(ActionJournal::open(path)?)),
            None => None,
        };

        Ok(Self {
            planner: LiquidationPlanner::new(PlannerConfig::from(&config.liquidation)),
            cooldown: CooldownTracker::new(config.liquidation.cooldown()),
            config,
            client,
            submitter,
            deriver,
            queue,
            prices,
            runtime,
            journal,
            pools: RwLock::new(Arc::new(PoolRegistry::default())),
        })
    }

    pub fn queue(&self) -> &Arc<RateLimitedQueue> {
        &self.queue
    }

    pub fn prices(&self) -> &Arc<PriceTable> {
        &self.prices
    }

    pub fn tree(&self) -> &Arc<WatcherTree> {
        self.runtime.tree()
    }

    pub fn runtime(&self) -> &Arc<WatcherRuntime> {
        &self.runtime
    }

    pub fn pools(&self) -> Arc<PoolRegistry> {
        self.pools.read().clone()
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Start the queue drain loop and the watcher event loop.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let queue = self.queue.clone();
        let runtime = self.runtime.clone();
        let events_shutdown = shutdown.clone();
        vec![
            tokio::spawn(queue.run(shutdown)),
            tokio::spawn(async move { runtime.run(events_shutdown).await }),
        ]
    }

    /// Bootstrap the scanner: pools, prices, then pages.
    #[instrument(skip_all)]
    pub async fn bootstrap(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting bootstrap...");

        // 1. Pool list
        let registry = self.load_pools(&mut shutdown).await?;
        let pool_ids = registry.ids();
        *self.pools.write() = registry.clone();

        // 2. One price watcher per pool
        for pool in registry.iter() {
            self.runtime.watch(WatcherKind::Price {
                pool_id: pool.id,
                mint: pool.mint,
            });
        }
        info!(count = pool_ids.len(), "Price watchers started");

        // 3. Planning needs every price
        self.wait_for_prices(&pool_ids, &mut shutdown).await?;

        // 4. Users pages
        let range = self.config.scanner.page_range();
        for page_id in range.clone() {
            self.runtime.watch(WatcherKind::IndexPage { page_id });
        }
        info!(
            page_start = range.start,
            page_end = range.end,
            "Users page watchers started"
        );

        info!("Bootstrap complete");
        Ok(())
    }

    async fn load_pools(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Arc<PoolRegistry>> {
        let address = self.deriver.derive_address(&AddressKind::PoolList);
        let client = self.client.clone();
        let fetch = self.queue.call("fetch pool list", move || {
            let client = client.clone();
            async move { client.fetch_account(address).await }
        });

        let data = tokio::select! {
            data = fetch => data?,
            _ = shutdown.changed() => anyhow::bail!("Shutdown while loading pool list"),
        };
        let Some(bytes) = data else {
            anyhow::bail!("Pool list {} is not allocated", address);
        };

        let entries = decode_pool_list(&bytes).context("Decoding pool list")?;
        let registry = PoolRegistry::from_entries(&entries);
        if registry.is_empty() {
            anyhow::bail!("Pool list has no live pools");
        }

        for pool in registry.iter() {
            debug!(
                pool = pool.id,
                mint = %pool.mint,
                ltv = pool.ltv,
                decimals = pool.decimals,
                "Pool loaded"
            );
        }
        info!(
            pools = registry.len(),
            retired = entries.len() - registry.len(),
            "Loaded pool list"
        );
        Ok(Arc::new(registry))
    }

    async fn wait_for_prices(
        &self,
        pool_ids: &[PoolId],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = self.config.scanner.price_wait_timeout().map(|t| started + t);

        loop {
            let missing = self.prices.missing(pool_ids);
            if missing.is_empty() {
                info!(
                    pools = pool_ids.len(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "All prices known"
                );
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                anyhow::bail!("Timed out waiting for prices of pools {:?}", missing);
            }

            info!(missing = ?missing, "Waiting for prices");
            tokio::select! {
                _ = sleep(self.config.scanner.price_poll_interval()) => {}
                _ = shutdown.changed() => anyhow::bail!("Shutdown while waiting for prices"),
            }
        }
    }

    /// Run the periodic sweep until shutdown.
    ///
    /// A sweep that is under way when shutdown arrives completes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_secs = self.config.scanner.sweep_interval_secs,
            "Starting sweep loop..."
        );
        let mut ticker = interval(self.config.scanner.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(Instant::now());
                    info!(
                        users = report.users,
                        evaluated = report.evaluated,
                        liquidatable = report.liquidatable,
                        submitted = report.submitted,
                        queue_depth = self.queue.depth(),
                        "Sweep complete"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Sweep loop stopped");
        Ok(())
    }

    /// Evaluate every known position once.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let pages = self.tree().snapshot_pages();
        let prices = self.prices.snapshot();
        let pools = self.pools();
        let watch_ratio = self.config.liquidation.watch_ratio;

        self.cooldown.prune(now);

        for page in &pages {
            report.pages += 1;
            report.users += page.users.len();
            debug!(
                page = page.page_id,
                progress = %format!("{}/{}", page.received(), page.users.len()),
                "Page users received"
            );

            for user in &page.users {
                // Unknown until the first record arrives
                let Some(record) = &user.record else {
                    continue;
                };

                let health = match self.planner.assess(record, &pools, &prices) {
                    Ok(health) => health,
                    Err(e) => {
                        report.unpriced += 1;
                        debug!(wallet = %user.wallet, error = %e, "Cannot value position");
                        continue;
                    }
                };
                report.evaluated += 1;

                let Some(ratio) = health.borrow_limit_used_ratio else {
                    continue;
                };
                if ratio > watch_ratio {
                    report.near_threshold += 1;
                    info!(
                        wallet = %user.wallet,
                        page = page.page_id,
                        ratio = ratio,
                        collateral_ratio = health.collateral_ratio.unwrap_or_default(),
                        borrow_usd = health.total_borrow_value,
                        limit_usd = health.total_borrow_limit,
                        "Position near liquidation threshold"
                    );
                }
                if !health.is_liquidatable() {
                    continue;
                }
                report.liquidatable += 1;

                if !self.cooldown.is_ready(&user.wallet, now) {
                    report.skipped_cooldown += 1;
                    debug!(
                        wallet = %user.wallet,
                        remaining_ms = self
                            .cooldown
                            .remaining(&user.wallet, now)
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or(0),
                        "Liquidation on cooldown"
                    );
                    continue;
                }

                let depth = self.queue.depth();
                if depth >= self.config.liquidation.backpressure_depth {
                    report.skipped_backpressure += 1;
                    warn!(wallet = %user.wallet, depth, "Queue too deep, deferring liquidation");
                    continue;
                }

                match self.planner.plan_for(&health, &pools, &prices) {
                    Ok(plan) => match self.fire(user.wallet, &plan, &pools, now) {
                        Ok(()) => report.submitted += 1,
                        Err(e) => error!(wallet = %user.wallet, error = %e, "Failed to queue liquidation"),
                    },
                    Err(e @ PlanError::IllDefined { .. }) | Err(e @ PlanError::NonPositiveSize { .. }) => {
                        warn!(wallet = %user.wallet, ratio, error = %e, "Liquidation not sizable");
                    }
                    Err(e) => debug!(wallet = %user.wallet, error = %e, "No liquidation planned"),
                }
            }
        }

        report
    }

    /// Queue one liquidation and start the wallet's cooldown.
    #[instrument(skip_all, fields(wallet = %wallet))]
    fn fire(
        &self,
        wallet: Pubkey,
        plan: &LiquidationPlan,
        pools: &PoolRegistry,
        now: Instant,
    ) -> Result<()> {
        let collateral_mint = pools
            .get(plan.collateral_pool)
            .map(|p| p.mint)
            .with_context(|| format!("Unknown collateral pool {}", plan.collateral_pool))?;
        let borrowed_mint = pools
            .get(plan.borrowed_pool)
            .map(|p| p.mint)
            .with_context(|| format!("Unknown borrowed pool {}", plan.borrowed_pool))?;

        let liquidator = self.submitter.liquidator();
        let request = LiquidationRequest {
            target_wallet: wallet,
            collateral_account: self.deriver.derive_address(&AddressKind::TokenAccount {
                owner: liquidator,
                mint: collateral_mint,
            }),
            borrowed_account: self.deriver.derive_address(&AddressKind::TokenAccount {
                owner: liquidator,
                mint: borrowed_mint,
            }),
            collateral_mint,
            borrowed_mint,
            min_collateral_out: plan.min_collateral_out,
            max_borrowed_in: plan.max_borrowed_in,
        };

        info!(
            ratio = plan.ratio,
            size_usd = plan.size_usd,
            collateral_pool = plan.collateral_pool,
            min_collateral_out = plan.min_collateral_out,
            borrowed_pool = plan.borrowed_pool,
            max_borrowed_in = plan.max_borrowed_in,
            "Submitting liquidation"
        );

        // Cooldown starts now whatever the outcome
        self.cooldown.record(wallet, now);

        let submitter = self.submitter.clone();
        let journal = self.journal.clone();
        let plan = *plan;
        self.queue.submit(format!("liquidate {}", wallet), move || async move {
            let result = submitter.submit_liquidation(&request).await;
            let outcome = match &result {
                Ok(receipt) => {
                    info!(wallet = %wallet, receipt = %receipt, "Liquidation submitted");
                    AttemptOutcome::Submitted {
                        receipt: receipt.clone(),
                    }
                }
                Err(e) => {
                    error!(
                        wallet = %wallet,
                        collateral_mint = %collateral_mint,
                        min_collateral_out = plan.min_collateral_out,
                        borrowed_mint = %borrowed_mint,
                        max_borrowed_in = plan.max_borrowed_in,
                        error = %e,
                        "Liquidation failed"
                    );
                    AttemptOutcome::Failed {
                        error: format!("{:#}", e),
                    }
                }
            };

            if let Some(journal) = journal {
                let entry = JournalEntry::new(wallet, &plan, collateral_mint, borrowed_mint, outcome);
                if let Err(e) = journal.append(&entry) {
                    warn!(error = %e, "Failed to write action journal");
                }
            }
            result.map(|_| ())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_ledger::codec::{encode_index_page, encode_pool_list, encode_price, encode_user_record};
    use liquidator_ledger::{
        DryRunSubmitter, MemoryLedger, PoolListEntry, PriceRecord, SeedDeriver, UserRecord,
    };
    use std::time::Duration;

    const MINT_A: Pubkey = Pubkey::repeat_byte(0xa);
    const MINT_B: Pubkey = Pubkey::repeat_byte(0xb);

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        deriver: SeedDeriver,
        submitter: Arc<DryRunSubmitter>,
        scanner: Scanner,
        shutdown: watch::Sender<bool>,
    }

    fn config() -> BotConfig {
        let mut config = BotConfig::default();
        config.queue.min_gap_ms = 10;
        config.scanner.page_end = 2;
        config
    }

    fn fixture(config: BotConfig) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let deriver = SeedDeriver::new(Pubkey::repeat_byte(0x77));
        let submitter = Arc::new(DryRunSubmitter::new(Pubkey::repeat_byte(0x99)));
        let scanner = Scanner::new(
            config,
            ledger.clone(),
            submitter.clone(),
            Arc::new(deriver),
        )
        .unwrap();
        let (shutdown, rx) = watch::channel(false);
        scanner.spawn_workers(rx);
        Fixture {
            ledger,
            deriver,
            submitter,
            scanner,
            shutdown,
        }
    }

    impl Fixture {
        fn set(&self, kind: AddressKind, data: Vec<u8>) {
            self.ledger.set_account(self.deriver.derive_address(&kind), data);
        }

        fn seed_pools(&self) {
            self.set(
                AddressKind::PoolList,
                encode_pool_list(&[
                    PoolListEntry {
                        mint: MINT_A,
                        ltv_bps: 8000,
                        decimals: 0,
                    },
                    PoolListEntry {
                        mint: MINT_B,
                        ltv_bps: 5000,
                        decimals: 0,
                    },
                ]),
            );
        }

        fn set_price(&self, mint: Pubkey, price_e8: u64) {
            self.set(
                AddressKind::AssetPrice { mint },
                encode_price(&PriceRecord {
                    mint,
                    price_e8,
                    slot: 1,
                }),
            );
        }

        fn set_user(&self, record: &UserRecord) {
            self.set(
                AddressKind::UserRecord {
                    wallet: record.wallet,
                },
                encode_user_record(record),
            );
        }

        fn set_page(&self, page_id: u32, wallets: &[Pubkey]) {
            self.set(AddressKind::UsersPage { page_id }, encode_index_page(wallets));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_fails_without_pool_list() {
        let mut cfg = config();
        cfg.queue.max_attempts = 1;
        let f = fixture(cfg);
        let err = f.scanner.bootstrap(f.shutdown.subscribe()).await.unwrap_err();
        assert!(err.to_string().contains("not allocated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_wait_times_out() {
        let mut cfg = config();
        cfg.scanner.price_wait_timeout_secs = 5;
        let f = fixture(cfg);
        f.seed_pools();
        f.set_price(MINT_A, 100_000_000);

        let err = f.scanner.bootstrap(f.shutdown.subscribe()).await.unwrap_err();
        assert!(err.to_string().contains("Timed out waiting for prices"));
        assert_eq!(f.scanner.prices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_fires_once_per_cooldown() {
        let f = fixture(config());
        f.seed_pools();
        f.set_price(MINT_A, 100_000_000);
        f.set_price(MINT_B, 100_000_000);
        let risky = Pubkey::repeat_byte(1);
        let safe = Pubkey::repeat_byte(2);
        f.set_user(&UserRecord::new(risky, 0).with_asset(0, 1000, 0).with_asset(1, 0, 900));
        f.set_user(&UserRecord::new(safe, 0).with_asset(0, 1000, 0).with_asset(1, 0, 100));
        f.set_page(0, &[risky, Pubkey::NULL, safe]);

        f.scanner.bootstrap(f.shutdown.subscribe()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let report = f.scanner.sweep(Instant::now());
        assert_eq!(report.users, 2);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.liquidatable, 1);
        assert_eq!(report.submitted, 1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let recorded = f.submitter.recorded();
        assert_eq!(recorded.len(), 1);
        let request = &recorded[0].request;
        assert_eq!(request.target_wallet, risky);
        assert_eq!(request.collateral_mint, MINT_A);
        assert_eq!(request.borrowed_mint, MINT_B);
        assert_eq!(request.min_collateral_out, 642);
        assert_eq!(request.max_borrowed_in, 636);

        // Second sweep inside the cooldown does not fire again
        let report = f.scanner.sweep(Instant::now());
        assert_eq!(report.liquidatable, 1);
        assert_eq!(report.skipped_cooldown, 1);
        assert_eq!(report.submitted, 0);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(f.scanner.sweep(Instant::now()).submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_defers() {
        let mut cfg = config();
        cfg.liquidation.backpressure_depth = 0;
        let f = fixture(cfg);
        f.seed_pools();
        f.set_price(MINT_A, 100_000_000);
        f.set_price(MINT_B, 100_000_000);
        let risky = Pubkey::repeat_byte(1);
        f.set_user(&UserRecord::new(risky, 0).with_asset(0, 1000, 0).with_asset(1, 0, 900));
        f.set_page(1, &[risky]);

        f.scanner.bootstrap(f.shutdown.subscribe()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let report = f.scanner.sweep(Instant::now());
        assert_eq!(report.skipped_backpressure, 1);
        assert_eq!(report.submitted, 0);
        assert!(f.scanner.cooldown().is_ready(&risky, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(config());
        let rx = f.shutdown.subscribe();
        let scanner = Arc::new(f.scanner);
        let runner = scanner.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });

        tokio::time::sleep(Duration::from_secs(25)).await;
        f.shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
