//! End-to-end lifecycle tests against the in-memory store: fee math, wallet
//! conservation, dispute handling, concurrent resolution, and webhook
//! idempotence.

use std::sync::Arc;

use rust_decimal::Decimal;

use escrow_engine::escrow::{
    Actor, EscrowAction, EscrowEngine, EscrowStore, FeeBearer, MemoryStore, NewTransaction,
    PartySide, ProductDetails, TradeStatus, Transaction,
};
use escrow_engine::funding::{DepositService, MemoryFunding, WithdrawService};
use escrow_engine::notify::{EventKind, EventNotifier};
use escrow_engine::EscrowError;

const BUYER: u64 = 1;
const SELLER: u64 = 2;
const MODERATOR: u64 = 50;

fn dec(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

struct Harness {
    store: Arc<MemoryStore>,
    engine: EscrowEngine,
    deposits: DepositService,
    withdrawals: WithdrawService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(EventNotifier::new());
    let funding = Arc::new(MemoryFunding::new(store.clone() as Arc<dyn EscrowStore>));
    Harness {
        store: store.clone(),
        engine: EscrowEngine::new(store, notifier),
        deposits: DepositService::new(funding.clone(), dec("0.5")),
        withdrawals: WithdrawService::new(funding),
    }
}

/// Create, join, and seed the buyer wallet; 100000 at 5%, 48h window.
async fn open_trade(h: &Harness, bearer: FeeBearer) -> Transaction {
    let txn = h
        .engine
        .create(
            &Actor::user(BUYER),
            NewTransaction {
                creator: BUYER,
                creator_side: PartySide::Buyer,
                details: ProductDetails {
                    product_name: "camera lens".into(),
                    description: "50mm f/1.8".into(),
                    category: "photo".into(),
                    images: vec![],
                },
                amount: dec("100000"),
                fee_percent: dec("5"),
                fee_bearer: bearer,
                dispute_window_hours: 48,
            },
        )
        .await
        .unwrap();
    h.engine
        .join(&Actor::user(SELLER), txn.id, PartySide::Seller, None)
        .await
        .unwrap();
    h.store.credit_wallet(BUYER, dec("150000")).await.unwrap();
    txn
}

async fn total_money(h: &Harness, escrowed: Decimal) -> Decimal {
    h.store.balance(BUYER).await.unwrap()
        + h.store.balance(SELLER).await.unwrap()
        + escrowed
}

#[tokio::test]
async fn lifecycle_fund_snapshots_fee() {
    // Scenario 1: 100000 at 5%, seller bears the fee
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;

    let funded = h
        .engine
        .transition(&Actor::user(BUYER), txn.id, EscrowAction::Fund)
        .await
        .unwrap();

    assert_eq!(funded.status, TradeStatus::Deposited);
    assert_eq!(funded.fee_amount, Some(dec("5000")));
    assert_eq!(funded.seller_receives, Some(dec("95000")));
    assert_eq!(h.store.balance(BUYER).await.unwrap(), dec("50000"));
}

#[tokio::test]
async fn lifecycle_completion_pays_seller() {
    // Scenario 2: fund -> ship -> confirm
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;
    let buyer = Actor::user(BUYER);
    let seller = Actor::user(SELLER);

    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(&seller, txn.id, EscrowAction::Ship)
        .await
        .unwrap();
    let done = h
        .engine
        .transition(&buyer, txn.id, EscrowAction::ConfirmReceipt)
        .await
        .unwrap();

    assert_eq!(done.status, TradeStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(h.store.balance(SELLER).await.unwrap(), dec("95000"));

    // Completed is terminal: every further action is rejected
    for action in [
        EscrowAction::Ship,
        EscrowAction::ConfirmReceipt,
        EscrowAction::Cancel,
        EscrowAction::Dispute {
            reason: "too late".into(),
        },
    ] {
        let err = h
            .engine
            .transition(&buyer, txn.id, action)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    }

    // Money conserved: 150000 seeded, nothing escrowed anymore
    assert_eq!(total_money(&h, Decimal::ZERO).await, dec("150000"));
}

#[tokio::test]
async fn lifecycle_dispute_and_refund() {
    // Scenario 3: dispute within the window, staff refunds the buyer in full
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;
    let buyer = Actor::user(BUYER);

    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(&Actor::user(SELLER), txn.id, EscrowAction::Ship)
        .await
        .unwrap();
    let disputed = h
        .engine
        .transition(
            &buyer,
            txn.id,
            EscrowAction::Dispute {
                reason: "item not as described".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(disputed.status, TradeStatus::Disputed);
    assert_eq!(disputed.dispute_reason.as_deref(), Some("item not as described"));

    let refunded = h
        .engine
        .transition(&Actor::moderator(MODERATOR), txn.id, EscrowAction::ResolveRefund)
        .await
        .unwrap();

    assert_eq!(refunded.status, TradeStatus::Refunded);
    assert_eq!(h.store.balance(BUYER).await.unwrap(), dec("150000"));
    assert_eq!(h.store.balance(SELLER).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn lifecycle_concurrent_resolutions_one_winner() {
    // Scenario 4: two staff members race release vs refund
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;

    h.engine
        .transition(&Actor::user(BUYER), txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(
            &Actor::user(SELLER),
            txn.id,
            EscrowAction::Dispute {
                reason: "buyer unreachable".into(),
            },
        )
        .await
        .unwrap();

    let engine = Arc::new(harness_engine(&h));
    let release = {
        let engine = engine.clone();
        let id = txn.id;
        tokio::spawn(async move {
            engine
                .transition(&Actor::moderator(50), id, EscrowAction::ResolveRelease)
                .await
        })
    };
    let refund = {
        let engine = engine.clone();
        let id = txn.id;
        tokio::spawn(async move {
            engine
                .transition(&Actor::moderator(51), id, EscrowAction::ResolveRefund)
                .await
        })
    };

    let results = [release.await.unwrap(), refund.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(EscrowError::Conflict { .. }) | Err(EscrowError::InvalidTransition { .. })
            )
        })
        .count();
    assert_eq!(wins, 1, "exactly one resolution must win");
    assert_eq!(conflicts, 1);

    // Whatever won, money moved exactly once: release pays the seller 95000
    // (5000 fee retained), refund returns the buyer's full 100000
    let expected = if h.store.balance(SELLER).await.unwrap() > Decimal::ZERO {
        dec("145000")
    } else {
        dec("150000")
    };
    assert_eq!(total_money(&h, Decimal::ZERO).await, expected);
}

// The engine is not Clone; rebuild one over the same store for racing tasks.
fn harness_engine(h: &Harness) -> EscrowEngine {
    EscrowEngine::new(h.store.clone(), Arc::new(EventNotifier::new()))
}

#[tokio::test]
async fn lifecycle_webhook_replay_credits_once() {
    // Scenario 5: the provider retries the same notification
    let h = harness();
    let intent = h.deposits.create_intent(BUYER, dec("2000")).await.unwrap();
    let content = format!("wire transfer, note: {}", intent.reference);

    h.deposits.handle_payment(&content, dec("2000")).await.unwrap();
    h.deposits.handle_payment(&content, dec("2000")).await.unwrap();

    assert_eq!(h.store.balance(BUYER).await.unwrap(), dec("2000"));
}

#[tokio::test]
async fn lifecycle_expired_window_blocks_dispute() {
    let h = harness();
    let txn = h
        .engine
        .create(
            &Actor::user(BUYER),
            NewTransaction {
                creator: BUYER,
                creator_side: PartySide::Buyer,
                details: ProductDetails::default(),
                amount: dec("100"),
                fee_percent: dec("5"),
                fee_bearer: FeeBearer::Seller,
                // Zero-hour window: expired the moment shipping is recorded
                dispute_window_hours: 0,
            },
        )
        .await
        .unwrap();
    h.engine
        .join(&Actor::user(SELLER), txn.id, PartySide::Seller, None)
        .await
        .unwrap();
    h.store.credit_wallet(BUYER, dec("100")).await.unwrap();

    let buyer = Actor::user(BUYER);
    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(&Actor::user(SELLER), txn.id, EscrowAction::Ship)
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let err = h
        .engine
        .transition(
            &buyer,
            txn.id,
            EscrowAction::Dispute {
                reason: "never arrived".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::WindowExpired { .. }));

    // Confirmation still works after the window closes
    let done = h
        .engine
        .transition(&buyer, txn.id, EscrowAction::ConfirmReceipt)
        .await
        .unwrap();
    assert_eq!(done.status, TradeStatus::Completed);
}

#[tokio::test]
async fn lifecycle_topup_trade_withdraw_roundtrip() {
    // Full money path: webhook top-up -> escrow trade -> seller withdraws
    let h = harness();

    let intent = h.deposits.create_intent(BUYER, dec("100000")).await.unwrap();
    h.deposits
        .handle_payment(&intent.reference, dec("100000"))
        .await
        .unwrap();

    let txn = h
        .engine
        .create(
            &Actor::user(SELLER),
            NewTransaction {
                creator: SELLER,
                creator_side: PartySide::Seller,
                details: ProductDetails {
                    product_name: "road bike".into(),
                    description: "size 56".into(),
                    category: "sports".into(),
                    images: vec![],
                },
                amount: dec("100000"),
                fee_percent: dec("5"),
                fee_bearer: FeeBearer::Seller,
                dispute_window_hours: 48,
            },
        )
        .await
        .unwrap();
    h.engine
        .join(&Actor::user(BUYER), txn.id, PartySide::Buyer, None)
        .await
        .unwrap();

    let buyer = Actor::user(BUYER);
    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(&Actor::user(SELLER), txn.id, EscrowAction::Ship)
        .await
        .unwrap();
    h.engine
        .transition(&buyer, txn.id, EscrowAction::ConfirmReceipt)
        .await
        .unwrap();

    let withdrawal = h.withdrawals.apply(SELLER, dec("95000")).await.unwrap();
    h.withdrawals
        .resolve(&Actor::admin(99), &withdrawal.id, true)
        .await
        .unwrap();

    assert_eq!(h.store.balance(BUYER).await.unwrap(), Decimal::ZERO);
    assert_eq!(h.store.balance(SELLER).await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn lifecycle_cancel_unfunded_only() {
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;

    let buyer = Actor::user(BUYER);
    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();

    // Once funded, cancel no longer exists as an edge
    let err = h
        .engine
        .transition(&buyer, txn.id, EscrowAction::Cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::InvalidTransition { .. }));

    let other = open_trade(&h, FeeBearer::Seller).await;
    let cancelled = h
        .engine
        .transition(&buyer, other.id, EscrowAction::Cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, TradeStatus::Cancelled);
}

#[tokio::test]
async fn lifecycle_events_follow_commits() {
    let h = harness();
    let txn = open_trade(&h, FeeBearer::Seller).await;
    let mut rx = h.engine.notifier().subscribe(txn.id);

    let buyer = Actor::user(BUYER);
    h.engine
        .transition(&buyer, txn.id, EscrowAction::Fund)
        .await
        .unwrap();
    h.engine
        .transition(&Actor::user(SELLER), txn.id, EscrowAction::Ship)
        .await
        .unwrap();

    let funded = rx.recv().await.unwrap();
    assert_eq!(funded.kind, EventKind::Funded);
    assert_eq!(funded.payload["seller_receives"], "95000");

    let shipped = rx.recv().await.unwrap();
    assert_eq!(shipped.kind, EventKind::Shipped);
    assert_ne!(funded.event_id, shipped.event_id);
}
