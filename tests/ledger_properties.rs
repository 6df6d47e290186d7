use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pointledger::config::SchedulerConfig;
use pointledger::db::models::{Benefits, Card, RequestMeta, SourceType, Wallet, WalletStatus};
use pointledger::db::redemption_service::NewPlan;
use pointledger::ledger::ConsumptionStatus;
use pointledger::ledger::consumption::calculate;
use pointledger::scheduler::AutoRefillScheduler;
use pointledger::{LedgerError, MemoryStore, PointLedger};
use uuid::Uuid;

fn ledger() -> (Arc<MemoryStore>, PointLedger<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), PointLedger::new(store))
}

async fn code_for(
    ledger: &PointLedger<MemoryStore>,
    level: i32,
    points: i64,
    days: i32,
    benefits: Benefits,
) -> String {
    let plan = ledger
        .redemptions()
        .create_plan(NewPlan {
            name: format!("plan-{level}-{points}"),
            level,
            points,
            validity_days: days,
            benefits,
        })
        .await
        .unwrap();
    ledger
        .redemptions()
        .issue_codes(plan.id, 1, None)
        .await
        .unwrap()
        .remove(0)
        .code
}

fn card(source_id: &str, points: i64, expires_at: DateTime<Utc>) -> Card {
    Card {
        id: Uuid::new_v4(),
        user_id: Uuid::nil(),
        source_type: SourceType::ActivationCode,
        source_id: source_id.into(),
        points_amount: points,
        activated_at: expires_at - Duration::days(30),
        expires_at,
        benefits: Benefits::default(),
        plan_level: 1,
        resets_history: false,
        reason: String::new(),
        granted_by: None,
    }
}

fn assert_balanced(w: &Wallet) {
    assert!(w.total_points >= 0 && w.available_points >= 0 && w.used_points >= 0);
    assert_eq!(w.total_points, w.available_points + w.used_points);
}

#[test]
fn test_expiry_order_attribution() {
    let day1 = Utc::now() + Duration::days(1);
    let cards = vec![card("B", 50, day1 + Duration::days(1)), card("A", 100, day1)];
    let breakdown = calculate(&cards, 120);

    let a = breakdown.entry("A").unwrap();
    assert_eq!((a.consumed, a.remaining), (100, 0));
    assert_eq!(a.status, ConsumptionStatus::FullyConsumed);
    let b = breakdown.entry("B").unwrap();
    assert_eq!((b.consumed, b.remaining), (20, 30));
    assert_eq!(b.status, ConsumptionStatus::PartiallyConsumed);
}

#[test]
fn test_equal_expiry_consumes_smaller_card_first() {
    let at = Utc::now() + Duration::days(3);
    let cards = vec![card("big", 30, at), card("small", 10, at)];
    let breakdown = calculate(&cards, 15);
    assert_eq!(breakdown.entries[0].source_id, "small");
    assert_eq!(breakdown.entry("small").unwrap().consumed, 10);
    assert_eq!(breakdown.entry("big").unwrap().consumed, 5);
}

#[tokio::test]
async fn test_invariant_holds_across_mixed_operations() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 100, 30, Benefits { daily_max_points: 1000, ..Benefits::default() }).await;
    let b = code_for(&ledger, 2, 50, 60, Benefits::default()).await;

    ledger.redeem(user_id, &a).await.unwrap();
    ledger.redeem(user_id, &b).await.unwrap();
    ledger.consume(user_id, 70, RequestMeta::default()).await.unwrap();
    assert_balanced(&store.wallet(user_id).await.unwrap());

    ledger.ban(user_id, &b, "dispute", admin_id).await.unwrap();
    assert_balanced(&store.wallet(user_id).await.unwrap());
    ledger.consume(user_id, 10, RequestMeta::default()).await.unwrap();
    assert_balanced(&store.wallet(user_id).await.unwrap());
    ledger.unban(user_id, &b, admin_id).await.unwrap();
    assert_balanced(&store.wallet(user_id).await.unwrap());

    ledger
        .redemptions()
        .gift(user_id, 15, 7, "support", admin_id)
        .await
        .unwrap();
    let _ = ledger.consume(user_id, 10_000, RequestMeta::default()).await.unwrap_err();
    let w = store.wallet(user_id).await.unwrap();
    assert_balanced(&w);
    assert_eq!(w.used_points, 80);
}

#[tokio::test]
async fn test_preview_is_idempotent() {
    let (_, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 100, 30, Benefits::default()).await;
    let b = code_for(&ledger, 2, 50, 60, Benefits::default()).await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.redeem(user_id, &b).await.unwrap();
    ledger
        .wallets()
        .deduct(user_id, 120)
        .await
        .unwrap();

    let first = ledger.preview_ban(user_id, &a).await.unwrap();
    let second = ledger.preview_ban(user_id, &a).await.unwrap();
    assert_eq!(first.calculation_method, second.calculation_method);
    assert_eq!(first.points_to_freeze, second.points_to_freeze);
    assert_eq!(first.breakdown.entries.len(), second.breakdown.entries.len());
    for (x, y) in first.breakdown.entries.iter().zip(&second.breakdown.entries) {
        assert_eq!((x.consumed, x.remaining), (y.consumed, y.remaining));
    }
}

#[tokio::test]
async fn test_ban_unban_round_trip_restores_points() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 100, 30, Benefits::default()).await;
    let b = code_for(&ledger, 2, 50, 60, Benefits::default()).await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.redeem(user_id, &b).await.unwrap();
    ledger.wallets().deduct(user_id, 40).await.unwrap();
    let before = store.wallet(user_id).await.unwrap();

    for code in [&a, &b] {
        ledger.ban(user_id, code, "audit", admin_id).await.unwrap();
        ledger.unban(user_id, code, admin_id).await.unwrap();
        let after = store.wallet(user_id).await.unwrap();
        assert_eq!(after.total_points, before.total_points);
        assert_eq!(after.available_points, before.available_points);
        assert_eq!(after.used_points, before.used_points);
    }
}

#[tokio::test]
async fn test_banning_only_card_collapses_wallet() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 100, 30, Benefits { daily_max_points: 50, ..Benefits::default() }).await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.consume(user_id, 25, RequestMeta::default()).await.unwrap();

    let record = ledger.ban(user_id, &a, "fraud", Uuid::new_v4()).await.unwrap();
    assert!(record.wallet_collapsed);
    let w = store.wallet(user_id).await.unwrap();
    assert_eq!((w.total_points, w.available_points, w.used_points), (0, 0, 0));
    assert_eq!(w.status, WalletStatus::Expired);

    let err = ledger.consume(user_id, 1, RequestMeta::default()).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletInactive));
}

#[tokio::test]
async fn test_daily_limit_through_consume() {
    let (_, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 500, 30, Benefits { daily_max_points: 100, ..Benefits::default() }).await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.consume(user_id, 80, RequestMeta::default()).await.unwrap();

    let err = ledger.consume(user_id, 30, RequestMeta::default()).await.unwrap_err();
    match err {
        LedgerError::DailyLimitExceeded { remaining, .. } => assert_eq!(remaining, 20),
        other => panic!("expected DailyLimitExceeded, got {other:?}"),
    }
    assert_eq!(ledger.consume(user_id, 20, RequestMeta::default()).await.unwrap(), 400);
}

#[tokio::test]
async fn test_auto_refill_tops_up_low_wallet() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let a = code_for(
        &ledger,
        1,
        100,
        30,
        Benefits {
            auto_refill_enabled: true,
            auto_refill_threshold: 10,
            auto_refill_amount: 50,
            ..Benefits::default()
        },
    )
    .await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.wallets().deduct(user_id, 95).await.unwrap();

    let scheduler = AutoRefillScheduler::new(store.clone(), SchedulerConfig::default());
    let report = scheduler.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.refilled, 1);

    let w = store.wallet(user_id).await.unwrap();
    assert_eq!(w.available_points, 55);
    assert_balanced(&w);
    let cards = ledger.redemptions().cards(user_id).await.unwrap();
    assert!(cards.iter().any(|c| c.source_type == SourceType::AutoRefill && c.points_amount == 50));
}

#[tokio::test]
async fn test_same_level_renewal_restarts_attribution() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let first = code_for(&ledger, 3, 100, 30, Benefits::default()).await;
    let renewal = code_for(&ledger, 3, 100, 30, Benefits::default()).await;

    ledger.redeem(user_id, &first).await.unwrap();
    ledger.wallets().deduct(user_id, 60).await.unwrap();
    assert_eq!(ledger.redeem(user_id, &renewal).await.unwrap(), 100);

    // The first card no longer takes part in attribution.
    let err = ledger.preview_ban(user_id, &first).await.unwrap_err();
    assert!(matches!(err, LedgerError::CardNotFound(_)));
    let preview = ledger.preview_ban(user_id, &renewal).await.unwrap();
    assert_eq!(preview.points_to_freeze, 100);
    assert_balanced(&store.wallet(user_id).await.unwrap());
}

#[tokio::test]
async fn test_unban_after_collapsing_ban_leaves_wallet_spendable() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let a = code_for(&ledger, 1, 100, 30, Benefits { daily_max_points: 100, ..Benefits::default() }).await;
    let b = code_for(&ledger, 2, 50, 60, Benefits { daily_max_points: 500, ..Benefits::default() }).await;
    ledger.redeem(user_id, &a).await.unwrap();
    ledger.redeem(user_id, &b).await.unwrap();

    assert!(!ledger.ban(user_id, &a, "audit", admin_id).await.unwrap().wallet_collapsed);
    assert!(ledger.ban(user_id, &b, "audit", admin_id).await.unwrap().wallet_collapsed);
    ledger.unban(user_id, &a, admin_id).await.unwrap();

    let w = store.wallet(user_id).await.unwrap();
    assert_eq!((w.total_points, w.available_points), (100, 100));
    assert_eq!(w.status, WalletStatus::Active);
    assert_eq!(w.benefits.daily_max_points, 100);
    assert_eq!(ledger.consume(user_id, 10, RequestMeta::default()).await.unwrap(), 90);

    ledger.unban(user_id, &b, admin_id).await.unwrap();
    let w = store.wallet(user_id).await.unwrap();
    assert_balanced(&w);
    assert_eq!((w.total_points, w.available_points, w.used_points), (150, 140, 10));
    assert_eq!(w.benefits.daily_max_points, 500);
}

#[tokio::test]
async fn test_expired_card_is_ignored_by_benefits_and_bans() {
    let (store, ledger) = ledger();
    let user_id = Uuid::new_v4();
    let old = code_for(&ledger, 2, 100, 1, Benefits { daily_max_points: 1000, ..Benefits::default() }).await;
    let fresh = code_for(&ledger, 1, 100, 30, Benefits { daily_max_points: 100, ..Benefits::default() }).await;

    ledger
        .redemptions()
        .redeem_at(user_id, &old, Utc::now() - Duration::days(10))
        .await
        .unwrap();
    ledger.redeem(user_id, &fresh).await.unwrap();
    assert_eq!(store.wallet(user_id).await.unwrap().benefits.daily_max_points, 100);

    let err = ledger.consume(user_id, 101, RequestMeta::default()).await.unwrap_err();
    assert!(matches!(err, LedgerError::DailyLimitExceeded { .. }));

    let preview = ledger.preview_ban(user_id, &fresh).await.unwrap();
    assert!(preview.wallet_collapses);
}
