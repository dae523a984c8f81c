//! Full liquidator flow against the in-process ledger.

use std::sync::Arc;
use std::time::Duration;

use liquidator_core::{ActionJournal, AttemptOutcome, BotConfig, Scanner};
use liquidator_ledger::codec::{
    encode_index_page, encode_pool_list, encode_price, encode_user_record,
};
use liquidator_ledger::{
    AddressDeriver, AddressKind, DryRunSubmitter, MemoryLedger, PoolListEntry, PriceRecord,
    Pubkey, SeedDeriver, UserRecord,
};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

const STABLE: Pubkey = Pubkey::repeat_byte(0x0a);
const VOLATILE: Pubkey = Pubkey::repeat_byte(0x0b);
const LIQUIDATOR: Pubkey = Pubkey::repeat_byte(0x99);

struct World {
    ledger: Arc<MemoryLedger>,
    deriver: SeedDeriver,
    submitter: Arc<DryRunSubmitter>,
    scanner: Arc<Scanner>,
    shutdown: watch::Sender<bool>,
}

fn config() -> BotConfig {
    let mut config = BotConfig::default();
    config.queue.min_gap_ms = 10;
    config.scanner.page_end = 2;
    config
}

fn world(config: BotConfig, submitter: DryRunSubmitter) -> World {
    let ledger = Arc::new(MemoryLedger::new());
    let deriver = SeedDeriver::new(Pubkey::repeat_byte(0x42));
    let submitter = Arc::new(submitter);
    let scanner = Arc::new(
        Scanner::new(config, ledger.clone(), submitter.clone(), Arc::new(deriver)).unwrap(),
    );
    let (shutdown, rx) = watch::channel(false);
    scanner.spawn_workers(rx);

    let world = World {
        ledger,
        deriver,
        submitter,
        scanner,
        shutdown,
    };
    world.set(
        AddressKind::PoolList,
        encode_pool_list(&[
            PoolListEntry {
                mint: STABLE,
                ltv_bps: 8000,
                decimals: 0,
            },
            PoolListEntry {
                mint: VOLATILE,
                ltv_bps: 5000,
                decimals: 0,
            },
        ]),
    );
    world.set_price(STABLE, 1.0);
    world.set_price(VOLATILE, 100.0);
    world
}

impl World {
    fn set(&self, kind: AddressKind, data: Vec<u8>) {
        self.ledger.set_account(self.deriver.derive_address(&kind), data);
    }

    fn set_price(&self, mint: Pubkey, usd: f64) {
        self.set(
            AddressKind::AssetPrice { mint },
            encode_price(&PriceRecord {
                mint,
                price_e8: (usd * 1e8) as u64,
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

    fn user_subscribed(&self, wallet: Pubkey) -> bool {
        self.ledger.is_subscribed(
            &self
                .deriver
                .derive_address(&AddressKind::UserRecord { wallet }),
        )
    }

    async fn boot(&self) {
        self.scanner
            .bootstrap(self.shutdown.subscribe())
            .await
            .unwrap();
        sleep(Duration::from_secs(2)).await;
    }
}

/// 1000 of the stable asset deposited against 7 of the volatile one borrowed.
fn borrower(wallet: Pubkey, page: u32) -> UserRecord {
    UserRecord::new(wallet, page)
        .with_asset(0, 1000, 0)
        .with_asset(1, 0, 7)
}

#[tokio::test(start_paused = true)]
async fn test_price_move_makes_position_liquidatable() {
    let w = world(config(), DryRunSubmitter::new(LIQUIDATOR));
    let alice = Pubkey::repeat_byte(1);
    w.set_user(&borrower(alice, 0));
    w.set_page(0, &[alice]);
    w.boot().await;

    // 700 borrowed against a limit of 800
    let report = w.scanner.sweep(Instant::now());
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.liquidatable, 0);

    // 840 borrowed
    w.set_price(VOLATILE, 120.0);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(w.scanner.prices().price_usd(1), Some(120.0));

    let report = w.scanner.sweep(Instant::now());
    assert_eq!(report.liquidatable, 1);
    assert_eq!(report.submitted, 1);
    sleep(Duration::from_secs(1)).await;

    let recorded = w.submitter.recorded();
    assert_eq!(recorded.len(), 1);
    let request = &recorded[0].request;
    assert_eq!(request.target_wallet, alice);
    assert_eq!(request.collateral_mint, STABLE);
    assert_eq!(request.borrowed_mint, VOLATILE);
    assert!(request.min_collateral_out > 0);
    assert!(request.max_borrowed_in > 0);
    assert_eq!(
        request.collateral_account,
        w.deriver.derive_address(&AddressKind::TokenAccount {
            owner: LIQUIDATOR,
            mint: STABLE,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_page_rewrites_follow_latest_contents() {
    let w = world(config(), DryRunSubmitter::new(LIQUIDATOR));
    let a = Pubkey::repeat_byte(1);
    let b = Pubkey::repeat_byte(2);
    let c = Pubkey::repeat_byte(3);
    w.set_page(0, &[a, b]);
    w.set_page(1, &[c]);
    w.boot().await;

    // 2 prices + 2 pages + 3 users
    assert_eq!(w.ledger.subscription_count(), 7);
    assert_eq!(w.scanner.tree().counts().users, 3);

    // a moves from page 0 to page 1
    w.set_page(0, &[b]);
    w.set_page(1, &[c, a]);
    sleep(Duration::from_secs(1)).await;

    let pages = w.scanner.tree().snapshot_pages();
    let wallets = |page_id: u32| -> Vec<Pubkey> {
        pages
            .iter()
            .find(|p| p.page_id == page_id)
            .map(|p| p.users.iter().map(|u| u.wallet).collect())
            .unwrap_or_default()
    };
    assert_eq!(wallets(0), vec![b]);
    assert!(wallets(1).contains(&a));
    assert!(w.user_subscribed(a));
    assert_eq!(w.ledger.subscription_count(), 7);

    // Page 0 emptied
    w.set_page(0, &[Pubkey::NULL]);
    sleep(Duration::from_secs(1)).await;
    assert!(!w.user_subscribed(b));
    assert_eq!(w.ledger.subscription_count(), 6);
    assert_eq!(w.scanner.tree().counts().users, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_submission_is_journaled_and_cooled_down() {
    let path = std::env::temp_dir().join(format!("liquidator-e2e-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let mut cfg = config();
    cfg.liquidation.journal_path = Some(path.clone());
    let w = world(cfg, DryRunSubmitter::rejecting(LIQUIDATOR, "simulated failure"));
    let bob = Pubkey::repeat_byte(2);
    w.set_user(&borrower(bob, 1).with_asset(1, 0, 2));
    w.set_page(1, &[bob]);
    w.boot().await;

    assert_eq!(w.scanner.sweep(Instant::now()).submitted, 1);
    sleep(Duration::from_secs(1)).await;

    let entries = ActionJournal::read_all(&path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].wallet, bob);
    assert!(matches!(
        &entries[0].outcome,
        AttemptOutcome::Failed { error } if error.contains("simulated failure")
    ));
    assert_eq!(w.scanner.queue().stats().failed, 1);

    // A failed attempt still holds the wallet back
    let report = w.scanner.sweep(Instant::now());
    assert_eq!(report.skipped_cooldown, 1);
    assert_eq!(report.submitted, 0);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_loop_submits_until_shutdown() {
    let w = world(config(), DryRunSubmitter::new(LIQUIDATOR));
    let carol = Pubkey::repeat_byte(3);
    w.set_user(&borrower(carol, 0).with_asset(1, 0, 2));
    w.set_page(0, &[carol]);
    w.boot().await;

    let runner = w.scanner.clone();
    let rx = w.shutdown.subscribe();
    let handle = tokio::spawn(async move { runner.run(rx).await });

    // Ticks at 10s and 20s fall inside the 20s cooldown, 30s fires again
    sleep(Duration::from_secs(15)).await;
    assert_eq!(w.submitter.count(), 1);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(w.submitter.count(), 2);

    w.shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
