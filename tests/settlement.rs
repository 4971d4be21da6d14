mod common;

use std::sync::Arc;

use tombola_core::config::{Limits, SweeperConfig};
use tombola_core::error::Error;
use tombola_core::interfaces::TracingNotifier;
use tombola_core::model::PaymentStatus;
use tombola_core::services::{
    PaymentSettlement, PaymentSignal, PurchaseRequest, ReservationManager, SettlementOutcome,
    Sweeper,
};

fn settlement(pool: &sqlx::SqlitePool) -> PaymentSettlement {
    PaymentSettlement::new(pool.clone(), Limits::default(), Arc::new(TracingNotifier))
}

fn request(campaign_id: i64, ticket_count: i64) -> PurchaseRequest {
    PurchaseRequest {
        campaign_id,
        ticket_count,
        phone_number: Some("0812345678".to_string()),
    }
}

#[tokio::test]
async fn sequential_purchases_fill_campaign_without_gaps() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Moto", "A", 10, 1000).await;
    let svc = settlement(&pool);

    let mut numbers = Vec::new();
    for (user_id, count) in [(1, 4), (2, 3), (3, 3)] {
        let init = svc.initiate(user_id, &request(campaign_id, count)).await.unwrap();
        match svc.confirm(&init.transaction_id, PaymentSignal::Success).await.unwrap() {
            SettlementOutcome::Settled { tickets, .. } => {
                assert_eq!(tickets.len() as i64, count);
                numbers.extend(tickets.into_iter().map(|t| t.ticket_number));
            }
            other => panic!("expected settled, got {other:?}"),
        }
    }

    numbers.sort();
    let expected: Vec<String> = (1..=10).map(|n| format!("KA-{n:02}")).collect();
    assert_eq!(numbers, expected);

    let (sold, status) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(sold, 10);
    assert_eq!(status, "closed");
}

#[tokio::test]
async fn concurrent_settlement_cannot_oversell() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Last one", "B", 1, 1000).await;
    let svc = settlement(&pool);

    // Both purchases pass the advisory capacity check while the ticket
    // is still free; only one can win the allocation.
    let first = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    let second = svc.initiate(2, &request(campaign_id, 1)).await.unwrap();

    let (r1, r2) = tokio::join!(
        svc.confirm(&first.transaction_id, PaymentSignal::Success),
        svc.confirm(&second.transaction_id, PaymentSignal::Success),
    );

    let results = [r1, r2];
    let settled = results
        .iter()
        .filter(|r| matches!(r, Ok(SettlementOutcome::Settled { .. })))
        .count();
    let capacity = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Capacity { .. })))
        .count();
    assert_eq!(settled, 1);
    assert_eq!(capacity, 1);

    let (sold, _) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(sold, 1);
    assert_eq!(common::count_rows(&pool, "tickets").await, 1);
}

#[tokio::test]
async fn duplicate_confirmation_is_a_noop() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Dup", "C", 10, 500).await;
    let svc = settlement(&pool);

    let init = svc.initiate(7, &request(campaign_id, 2)).await.unwrap();
    let first = svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap();
    assert!(matches!(first, SettlementOutcome::Settled { .. }));

    let second = svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap();
    match second {
        SettlementOutcome::AlreadyProcessed { status } => {
            assert_eq!(status, PaymentStatus::Completed);
        }
        other => panic!("expected already-processed, got {other:?}"),
    }

    assert_eq!(common::count_rows(&pool, "tickets").await, 2);
    assert_eq!(common::count_rows(&pool, "invoices").await, 1);
    let (sold, _) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(sold, 2);
}

#[tokio::test]
async fn concurrent_duplicate_confirmations_settle_once() {
    // Two pool connections racing on the same transaction id; the
    // loser must report AlreadyProcessed, not a lock error.
    let pool = common::setup_shared("settle-dup", 2).await;
    let campaign_id = common::create_campaign(&pool, "Dup race", "Y", 10, 500).await;
    let svc = settlement(&pool);

    let init = svc.initiate(1, &request(campaign_id, 2)).await.unwrap();
    let (r1, r2) = tokio::join!(
        svc.confirm(&init.transaction_id, PaymentSignal::Success),
        svc.confirm(&init.transaction_id, PaymentSignal::Success),
    );

    let results = [r1.unwrap(), r2.unwrap()];
    let settled = results
        .iter()
        .filter(|r| matches!(r, SettlementOutcome::Settled { .. }))
        .count();
    let duplicate = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                SettlementOutcome::AlreadyProcessed { status: PaymentStatus::Completed }
            )
        })
        .count();
    assert_eq!(settled, 1);
    assert_eq!(duplicate, 1);

    assert_eq!(common::count_rows(&pool, "tickets").await, 2);
    assert_eq!(common::count_rows(&pool, "invoices").await, 1);
}

#[tokio::test]
async fn allocation_skips_numbers_held_by_others() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Held", "K", 10, 500).await;
    let reservations = ReservationManager::new(pool.clone(), Limits::default());
    let svc = settlement(&pool);

    // User 2 is holding number 1 mid-checkout.
    reservations.reserve(campaign_id, 2, &[1]).await.unwrap();

    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    match svc.confirm(&init.transaction_id, PaymentSignal::Success).await.unwrap() {
        SettlementOutcome::Settled { tickets, .. } => {
            assert_eq!(tickets[0].ticket_number, "KK-02");
        }
        other => panic!("expected settled, got {other:?}"),
    }

    // The buyer's own hold stays allocatable: user 1 holds number 3
    // and the scan hands it out (1 is still held by user 2).
    reservations.reserve(campaign_id, 1, &[3]).await.unwrap();
    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    match svc.confirm(&init.transaction_id, PaymentSignal::Success).await.unwrap() {
        SettlementOutcome::Settled { tickets, .. } => {
            assert_eq!(tickets[0].ticket_number, "KK-03");
        }
        other => panic!("expected settled, got {other:?}"),
    }
}

#[tokio::test]
async fn allocation_fails_when_all_free_numbers_are_held() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Blocked", "Q", 2, 500).await;
    let reservations = ReservationManager::new(pool.clone(), Limits::default());
    let svc = settlement(&pool);

    reservations.reserve(campaign_id, 2, &[1, 2]).await.unwrap();

    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    let err = svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Capacity { requested: 1, available: 0 }));

    // The settlement rolled back with the allocation.
    assert_eq!(common::count_rows(&pool, "tickets").await, 0);
    let (sold, _) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(sold, 0);
}

#[tokio::test]
async fn failure_signal_is_terminal() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Fail", "F", 5, 500).await;
    let svc = settlement(&pool);

    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    let failed = svc
        .confirm(&init.transaction_id, PaymentSignal::Failure)
        .await
        .unwrap();
    assert!(matches!(failed, SettlementOutcome::MarkedFailed));

    // A late success signal must not resurrect the purchase.
    let late = svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap();
    match late {
        SettlementOutcome::AlreadyProcessed { status } => {
            assert_eq!(status, PaymentStatus::Failed);
        }
        other => panic!("expected already-processed, got {other:?}"),
    }

    assert_eq!(common::count_rows(&pool, "tickets").await, 0);
    let (sold, _) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(sold, 0);
}

#[tokio::test]
async fn unknown_transaction_is_rejected() {
    let pool = common::setup().await;
    common::create_campaign(&pool, "X", "X", 5, 500).await;
    let svc = settlement(&pool);

    let err = svc
        .confirm("NO-SUCH-TX", PaymentSignal::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "purchase", .. }));
}

#[tokio::test]
async fn stale_pending_purchases_expire() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Stale", "S", 5, 500).await;
    let svc = settlement(&pool);

    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();

    // Age the purchase past the pending TTL.
    let old = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    sqlx::query("UPDATE purchases SET created_at = ? WHERE transaction_id = ?")
        .bind(&old)
        .bind(&init.transaction_id)
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(svc.expire_stale().await.unwrap(), 1);

    let late = svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap();
    match late {
        SettlementOutcome::AlreadyProcessed { status } => {
            assert_eq!(status, PaymentStatus::Expired);
        }
        other => panic!("expected already-processed, got {other:?}"),
    }
    assert_eq!(common::count_rows(&pool, "tickets").await, 0);
}

#[tokio::test]
async fn sweeper_pass_expires_purchases_and_holds() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Sweep", "Z", 5, 500).await;
    let svc = settlement(&pool);

    let sweeper = Sweeper::new(pool.clone(), SweeperConfig::default(), Limits::default());
    assert_eq!(sweeper.sweep_once().await.unwrap(), (0, 0));

    let init = svc.initiate(1, &request(campaign_id, 1)).await.unwrap();
    let old = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    sqlx::query("UPDATE purchases SET created_at = ? WHERE transaction_id = ?")
        .bind(&old)
        .bind(&init.transaction_id)
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(sweeper.sweep_once().await.unwrap(), (1, 0));
    assert_eq!(sweeper.sweep_once().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn initiate_validates_campaign_and_count() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Tight", "T", 3, 500).await;
    let svc = settlement(&pool);

    let err = svc.initiate(1, &request(campaign_id, 0)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = svc.initiate(1, &request(campaign_id, 4)).await.unwrap_err();
    assert!(matches!(err, Error::Capacity { requested: 4, available: 3 }));

    let err = svc.initiate(1, &request(999, 1)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "campaign", .. }));
}
