mod common;

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tombola_core::config::Limits;
use tombola_core::error::Error;
use tombola_core::interfaces::TracingNotifier;
use tombola_core::services::{
    DrawEngine, DrawRequest, PaymentSettlement, PaymentSignal, PurchaseRequest, SettlementOutcome,
};
use tombola_core::model::DrawMethod;

fn engine(pool: &SqlitePool) -> DrawEngine {
    DrawEngine::new(pool.clone(), Limits::default(), Arc::new(TracingNotifier))
}

async fn buy(pool: &SqlitePool, user_id: i64, campaign_id: i64, count: i64) -> Vec<String> {
    let svc = PaymentSettlement::new(pool.clone(), Limits::default(), Arc::new(TracingNotifier));
    let init = svc
        .initiate(
            user_id,
            &PurchaseRequest {
                campaign_id,
                ticket_count: count,
                phone_number: None,
            },
        )
        .await
        .unwrap();
    match svc
        .confirm(&init.transaction_id, PaymentSignal::Success)
        .await
        .unwrap()
    {
        SettlementOutcome::Settled { tickets, .. } => {
            tickets.into_iter().map(|t| t.ticket_number).collect()
        }
        other => panic!("expected settled, got {other:?}"),
    }
}

fn manual(campaign_id: i64, number: &str, bonus: usize) -> DrawRequest {
    DrawRequest {
        campaign_id,
        bonus_winners_count: bonus,
        method: DrawMethod::Manual,
        manual_ticket_number: Some(number.to_string()),
        admin_id: Some(99),
    }
}

#[tokio::test]
async fn manual_draw_settles_every_ticket() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Grand", "D", 5, 1000).await;

    // User 1 holds two tickets; users 2-4 one each.
    buy(&pool, 1, campaign_id, 2).await;
    buy(&pool, 2, campaign_id, 1).await;
    buy(&pool, 3, campaign_id, 1).await;
    buy(&pool, 4, campaign_id, 1).await;

    let outcome = engine(&pool)
        .perform(&manual(campaign_id, "KD-01", 3))
        .await
        .unwrap();

    assert_eq!(outcome.main_winner.ticket_number, "KD-01");
    assert_eq!(outcome.main_winner.user_id, 1);

    // The main winner's user is out of the bonus pool entirely, so the
    // three bonus prizes land on users 2, 3 and 4.
    let bonus_users: HashSet<i64> = outcome.bonus_winners.iter().map(|t| t.user_id).collect();
    assert_eq!(outcome.bonus_winners.len(), 3);
    assert_eq!(bonus_users.len(), 3);
    assert!(!bonus_users.contains(&1));

    let (status, is_winner, category) = common::ticket_state(&pool, campaign_id, "KD-01").await;
    assert_eq!(status, "winner");
    assert!(is_winner);
    assert_eq!(category.as_deref(), Some("main"));

    // The main winner's second ticket loses like everyone else's.
    let (status, is_winner, _) = common::ticket_state(&pool, campaign_id, "KD-02").await;
    assert_eq!(status, "lost");
    assert!(!is_winner);

    let (_, status) = common::campaign_state(&pool, campaign_id).await;
    assert_eq!(status, "completed");
    assert_eq!(common::count_rows(&pool, "draw_results").await, 1);
    assert_eq!(common::count_rows(&pool, "bonus_winners").await, 3);
    assert_eq!(common::count_rows(&pool, "admin_logs").await, 1);
}

#[tokio::test]
async fn bonus_pool_underfills_with_few_holders() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Small", "E", 3, 1000).await;

    buy(&pool, 1, campaign_id, 2).await;
    buy(&pool, 2, campaign_id, 1).await;

    let outcome = engine(&pool)
        .perform(&manual(campaign_id, "KE-01", 5))
        .await
        .unwrap();

    // Only user 2 is eligible; the draw still commits.
    assert_eq!(outcome.bonus_winners.len(), 1);
    assert_eq!(outcome.bonus_winners[0].user_id, 2);
}

#[tokio::test]
async fn automatic_draw_picks_from_active_tickets() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Auto", "G", 4, 1000).await;

    let mut all = Vec::new();
    for user in 1..=4 {
        all.extend(buy(&pool, user, campaign_id, 1).await);
    }

    let outcome = engine(&pool)
        .perform(&DrawRequest {
            campaign_id,
            bonus_winners_count: 0,
            method: DrawMethod::Automatic,
            manual_ticket_number: None,
            admin_id: None,
        })
        .await
        .unwrap();

    assert!(all.contains(&outcome.main_winner.ticket_number));
    assert!(outcome.bonus_winners.is_empty());
}

#[tokio::test]
async fn draw_cooldown_blocks_the_next_draw() {
    let pool = common::setup().await;
    let first = common::create_campaign(&pool, "One", "H", 2, 1000).await;
    let second = common::create_campaign(&pool, "Two", "J", 2, 1000).await;
    buy(&pool, 1, first, 1).await;
    buy(&pool, 2, second, 1).await;

    let svc = engine(&pool);
    svc.perform(&manual(first, "KH-01", 0)).await.unwrap();

    let err = svc.perform(&manual(second, "KJ-01", 0)).await.unwrap_err();
    match err {
        Error::CooldownActive { remaining_secs } => assert!(remaining_secs > 0),
        other => panic!("expected cooldown, got {other:?}"),
    }
    let (_, status) = common::campaign_state(&pool, second).await;
    assert_eq!(status, "open");
}

#[tokio::test]
async fn completed_campaign_cannot_be_redrawn() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Done", "L", 2, 1000).await;
    buy(&pool, 1, campaign_id, 1).await;

    let svc = engine(&pool);
    svc.perform(&manual(campaign_id, "KL-01", 0)).await.unwrap();

    let err = svc.perform(&manual(campaign_id, "KL-01", 0)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn draw_requires_tickets_and_valid_request() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Empty", "M", 5, 1000).await;
    let svc = engine(&pool);

    let err = svc.perform(&manual(campaign_id, "KM-01", 0)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = svc.perform(&manual(campaign_id, "KM-01", 11)).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = svc
        .perform(&DrawRequest {
            campaign_id,
            bonus_winners_count: 0,
            method: DrawMethod::Manual,
            manual_ticket_number: None,
            admin_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn manual_draw_rejects_unknown_ticket() {
    let pool = common::setup().await;
    let campaign_id = common::create_campaign(&pool, "Ghost", "N", 3, 1000).await;
    buy(&pool, 1, campaign_id, 1).await;

    let err = engine(&pool)
        .perform(&manual(campaign_id, "KN-99", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "ticket", .. }));

    // The failed draw rolled back; the ticket pool is untouched.
    let (status, _, _) = common::ticket_state(&pool, campaign_id, "KN-01").await;
    assert_eq!(status, "active");
    assert_eq!(common::count_rows(&pool, "draw_results").await, 0);
}
