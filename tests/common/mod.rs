#![allow(dead_code)]

use sea_query::{Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use tombola_core::model::CampaignStatus;
use tombola_core::storage::schema::Campaigns;
use tombola_core::storage::{connect, connect_memory, init_schema};

pub async fn setup() -> SqlitePool {
    let pool = connect_memory().await.unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

/// File-backed database with a real multi-connection pool, for tests
/// that exercise cross-connection locking.
pub async fn setup_shared(name: &str, max_connections: u32) -> SqlitePool {
    let path = std::env::temp_dir().join(format!("tombola-{}-{}.db", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    let url = format!("sqlite://{}", path.display());
    let pool = connect(&url, max_connections).await.unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

pub async fn create_campaign(
    pool: &SqlitePool,
    title: &str,
    prefix: &str,
    total_tickets: i64,
    ticket_price: i64,
) -> i64 {
    let now = chrono::Utc::now().to_rfc3339();
    let query = Query::insert()
        .into_table(Campaigns::Table)
        .columns([
            Campaigns::Title,
            Campaigns::TicketPrefix,
            Campaigns::TotalTickets,
            Campaigns::TicketPrice,
            Campaigns::Status,
            Campaigns::CreatedAt,
            Campaigns::UpdatedAt,
        ])
        .values_panic([
            title.into(),
            prefix.into(),
            total_tickets.into(),
            ticket_price.into(),
            CampaignStatus::Open.as_str().into(),
            now.clone().into(),
            now.into(),
        ])
        .returning_col(Campaigns::Id)
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_one(pool).await.unwrap();
    row.get(0)
}

/// (sold_tickets, status) of a campaign.
pub async fn campaign_state(pool: &SqlitePool, campaign_id: i64) -> (i64, String) {
    let row = sqlx::query("SELECT sold_tickets, status FROM campaigns WHERE id = ?")
        .bind(campaign_id)
        .fetch_one(pool)
        .await
        .unwrap();
    (row.get("sold_tickets"), row.get("status"))
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) AS n FROM {table}");
    let row = sqlx::query(&sql).fetch_one(pool).await.unwrap();
    row.get("n")
}

/// (status, is_winner, prize_category) of one ticket.
pub async fn ticket_state(
    pool: &SqlitePool,
    campaign_id: i64,
    ticket_number: &str,
) -> (String, bool, Option<String>) {
    let row = sqlx::query(
        "SELECT status, is_winner, prize_category FROM tickets \
         WHERE campaign_id = ? AND ticket_number = ?",
    )
    .bind(campaign_id)
    .bind(ticket_number)
    .fetch_one(pool)
    .await
    .unwrap();
    let is_winner: i64 = row.get("is_winner");
    (row.get("status"), is_winner != 0, row.get("prize_category"))
}
